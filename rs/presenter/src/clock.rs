use std::time::Instant;

use parking_lot::Mutex;

use crate::{Result, Time};

/// A presentation time paired with the system time it was sampled at.
#[derive(Debug, Clone, Copy)]
pub struct ClockTime {
	pub time: Time,
	pub system: Instant,
}

/// The presentation clock the scheduler times frames against.
pub trait Clock: Send + Sync + 'static {
	fn time(&self) -> Result<ClockTime>;
}

/// Receives presentation clock state changes.
pub trait ClockStateSink: Send + Sync {
	/// The clock started. `offset` is the new start position, or None to continue from the current position.
	fn on_clock_start(&self, offset: Option<Time>) -> Result<()>;
	fn on_clock_stop(&self) -> Result<()>;
	fn on_clock_pause(&self) -> Result<()>;
	/// The clock resumed from a pause.
	fn on_clock_restart(&self) -> Result<()>;
	fn on_clock_set_rate(&self, rate: f32) -> Result<()>;
}

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
	time: Mutex<Time>,
}

impl ManualClock {
	pub fn new(time: Time) -> Self {
		Self { time: Mutex::new(time) }
	}

	pub fn set(&self, time: Time) {
		*self.time.lock() = time;
	}

	pub fn advance(&self, delta: Time) {
		*self.time.lock() += delta;
	}

	pub fn now(&self) -> Time {
		*self.time.lock()
	}
}

impl Clock for ManualClock {
	fn time(&self) -> Result<ClockTime> {
		Ok(ClockTime {
			time: self.now(),
			system: Instant::now(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_manual_clock() {
		let clock = ManualClock::new(Time::from_millis(10));
		assert_eq!(clock.time().unwrap().time, Time::from_millis(10));

		clock.advance(Time::from_millis(5));
		assert_eq!(clock.now(), Time::from_millis(15));

		clock.set(Time::ZERO);
		assert_eq!(clock.now(), Time::ZERO);
	}
}
