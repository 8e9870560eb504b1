use crate::{Error, Time};

/// Notifications the presenter sends to the pipeline that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	/// The display or device changed; the owner should refresh its view.
	DisplayChanged,

	/// A fatal error while streaming.
	ErrorAbort(Error),

	/// Time spent pulling a frame from the mixer.
	ProcessingLatency(Time),

	/// A frame step finished or was cancelled.
	StepComplete { cancelled: bool },

	/// The position reached while scrubbing.
	ScrubTime(Time),

	/// Every frame of the stream has been presented.
	Complete,
}

impl Event {
	/// A stable integer used across the C ABI.
	pub fn code(&self) -> i32 {
		match self {
			Self::DisplayChanged => 1,
			Self::ErrorAbort(_) => 2,
			Self::ProcessingLatency(_) => 3,
			Self::StepComplete { .. } => 4,
			Self::ScrubTime(_) => 5,
			Self::Complete => 6,
		}
	}
}

/// Receives presenter events.
pub trait EventSink: Send + Sync {
	fn notify(&self, event: Event);
}

impl<F: Fn(Event) + Send + Sync> EventSink for F {
	fn notify(&self, event: Event) {
		self(event)
	}
}

impl EventSink for crossbeam_channel::Sender<Event> {
	fn notify(&self, event: Event) {
		// The receiver going away is not our problem.
		let _ = self.send(event);
	}
}
