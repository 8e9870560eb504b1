use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{Error, Frame, Result};

/// Recycles a fixed set of frames so none are allocated per presentation.
///
/// Frames are handed out from the front and returned to the back.
/// Every batch is stamped with the pool's generation; [FramePool::clear] bumps
/// the generation, so frames from an older batch are dropped when they come back.
pub struct FramePool<S> {
	state: Mutex<PoolState<S>>,
}

struct PoolState<S> {
	free: VecDeque<Frame<S>>,
	pending: usize,
	initialized: bool,
	generation: u64,
}

impl<S> FramePool<S> {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(PoolState {
				free: VecDeque::new(),
				pending: 0,
				initialized: false,
				generation: 0,
			}),
		}
	}

	/// Seed the pool with a batch of frames.
	pub fn initialize(&self, frames: Vec<Frame<S>>) -> Result<()> {
		let mut state = self.state.lock();
		if state.initialized {
			return Err(Error::AlreadyInitialized);
		}

		let generation = state.generation;
		state.free = frames
			.into_iter()
			.map(|mut frame| {
				frame.generation = generation;
				frame
			})
			.collect();
		state.pending = 0;
		state.initialized = true;

		tracing::debug!(frames = state.free.len(), generation, "frame pool initialized");

		Ok(())
	}

	/// Take a free frame without blocking.
	pub fn acquire(&self) -> Result<Frame<S>> {
		let mut state = self.state.lock();
		if !state.initialized {
			return Err(Error::NotInitialized);
		}

		let mut frame = state.free.pop_front().ok_or(Error::PoolEmpty)?;
		frame.reset();
		state.pending += 1;

		Ok(frame)
	}

	/// Give a frame back.
	///
	/// Returns false when the frame was from an older generation and was dropped instead.
	pub fn release(&self, frame: Frame<S>) -> bool {
		let mut state = self.state.lock();
		if !state.initialized || frame.generation != state.generation {
			tracing::trace!(id = frame.id(), generation = frame.generation, "dropping stale frame");
			return false;
		}

		state.free.push_back(frame);
		state.pending = state.pending.saturating_sub(1);

		true
	}

	/// Whether any frame of the current generation is checked out.
	pub fn has_pending(&self) -> bool {
		self.state.lock().pending > 0
	}

	pub fn pending(&self) -> usize {
		self.state.lock().pending
	}

	pub fn free(&self) -> usize {
		self.state.lock().free.len()
	}

	/// The generation stamped on the current batch.
	pub fn generation(&self) -> u64 {
		self.state.lock().generation
	}

	pub fn is_initialized(&self) -> bool {
		self.state.lock().initialized
	}

	/// Drop every free frame and invalidate the ones still checked out.
	pub fn clear(&self) {
		let mut state = self.state.lock();
		state.free.clear();
		state.pending = 0;
		state.initialized = false;
		state.generation += 1;
	}
}

impl<S> Default for FramePool<S> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn frames(count: usize) -> Vec<Frame<()>> {
		(0..count).map(|_| Frame::new(())).collect()
	}

	#[test]
	fn test_not_initialized() {
		let pool = FramePool::<()>::new();
		assert_eq!(pool.acquire().unwrap_err(), Error::NotInitialized);
		assert!(!pool.has_pending());
	}

	#[test]
	fn test_initialize_twice() {
		let pool = FramePool::new();
		pool.initialize(frames(3)).unwrap();
		assert_eq!(pool.initialize(frames(3)), Err(Error::AlreadyInitialized));
	}

	#[test]
	fn test_acquire_release_accounting() {
		let pool = FramePool::new();
		pool.initialize(frames(3)).unwrap();

		let a = pool.acquire().unwrap();
		let b = pool.acquire().unwrap();
		let c = pool.acquire().unwrap();
		assert_eq!(pool.pending() + pool.free(), 3);

		// Never blocks, fails fast instead.
		assert_eq!(pool.acquire().unwrap_err(), Error::PoolEmpty);
		assert!(pool.has_pending());

		for frame in [b, a, c] {
			assert!(pool.release(frame));
			assert_eq!(pool.pending() + pool.free(), 3);
		}

		assert!(!pool.has_pending());
	}

	#[test]
	fn test_fifo_reuse() {
		let pool = FramePool::new();
		pool.initialize(frames(2)).unwrap();

		let first = pool.acquire().unwrap();
		let first_id = first.id();
		pool.release(first);

		// The released frame goes to the back.
		let next = pool.acquire().unwrap();
		assert_ne!(next.id(), first_id);
	}

	#[test]
	fn test_stale_generation_dropped() {
		let pool = FramePool::new();
		pool.initialize(frames(2)).unwrap();

		let old = pool.acquire().unwrap();
		assert_eq!(old.generation(), 0);

		pool.clear();
		pool.initialize(frames(3)).unwrap();
		assert_eq!(pool.generation(), 1);

		assert!(!pool.release(old));
		assert_eq!(pool.free(), 3);
		assert_eq!(pool.pending(), 0);
	}

	#[test]
	#[tracing_test::traced_test]
	fn test_stale_release_logged() {
		let pool = FramePool::new();
		pool.initialize(frames(1)).unwrap();
		let frame = pool.acquire().unwrap();

		pool.clear();
		pool.release(frame);
		assert!(logs_contain("dropping stale frame"));
	}

	#[test]
	fn test_release_after_clear() {
		let pool = FramePool::new();
		pool.initialize(frames(1)).unwrap();
		let frame = pool.acquire().unwrap();

		pool.clear();
		assert!(!pool.is_initialized());
		assert!(!pool.release(frame));
		assert!(!pool.has_pending());
	}

	#[test]
	fn test_acquire_resets_timing() {
		let pool = FramePool::new();
		pool.initialize(frames(1)).unwrap();

		let mut frame = pool.acquire().unwrap();
		frame.set_time(Some(crate::Time::from_millis(5)));
		pool.release(frame);

		let frame = pool.acquire().unwrap();
		assert_eq!(frame.time(), None);
	}
}
