use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Time;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A GPU-backed image buffer plus timing metadata.
///
/// A frame has exactly one owner at a time: the pool, the mixer filling it,
/// the scheduler waiting on its deadline, or the engine presenting it.
/// It is deliberately not [Clone].
pub struct Frame<S> {
	surface: Arc<S>,
	id: u64,

	// Stamped by the pool; a mismatch means the frame belongs to an old format.
	pub(crate) generation: u64,

	time: Option<Time>,
	duration: Option<Time>,
}

impl<S> Frame<S> {
	/// Wrap a backend surface in a new frame with a unique identity.
	pub fn new(surface: S) -> Self {
		Self {
			surface: Arc::new(surface),
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			generation: 0,
			time: None,
			duration: None,
		}
	}

	/// The surface the mixer writes into and the engine presents from.
	pub fn surface(&self) -> &S {
		&self.surface
	}

	/// A stable identity, used to recognise a specific frame after it is released.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// The presentation timestamp, if the mixer set one.
	pub fn time(&self) -> Option<Time> {
		self.time
	}

	pub fn set_time(&mut self, time: Option<Time>) {
		self.time = time;
	}

	pub fn duration(&self) -> Option<Time> {
		self.duration
	}

	pub fn set_duration(&mut self, duration: Option<Time>) {
		self.duration = duration;
	}

	/// Clear the timing metadata before the frame is reused.
	pub(crate) fn reset(&mut self) {
		self.time = None;
		self.duration = None;
	}
}

impl<S> std::fmt::Debug for Frame<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Frame")
			.field("id", &self.id)
			.field("generation", &self.generation)
			.field("time", &self.time)
			.field("duration", &self.duration)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unique_ids() {
		let a = Frame::new(());
		let b = Frame::new(());
		assert_ne!(a.id(), b.id());
	}

	#[test]
	fn test_reset() {
		let mut frame = Frame::new(7u8);
		frame.set_time(Some(Time::from_millis(40)));
		frame.set_duration(Some(Time::from_millis(33)));
		assert_eq!(*frame.surface(), 7);

		frame.reset();
		assert_eq!(frame.time(), None);
		assert_eq!(frame.duration(), None);
	}
}
