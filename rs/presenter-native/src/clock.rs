use std::time::Instant;

use parking_lot::Mutex;
use presenter::{Clock, ClockStateSink, ClockTime, Error, Result, Time};

/// Whether a [SystemClock] is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
	Stopped,
	Running,
	Paused,
}

struct Position {
	state: ClockState,
	// The presentation time at `anchor`.
	base: Time,
	anchor: Instant,
	rate: f32,
}

impl Position {
	fn at(&self, now: Instant) -> Time {
		match self.state {
			ClockState::Running => {
				let elapsed = now.saturating_duration_since(self.anchor).as_secs_f64();
				self.base + Time::from_secs_f64(elapsed * self.rate as f64)
			}
			_ => self.base,
		}
	}

	fn rebase(&mut self, now: Instant) {
		self.base = self.at(now);
		self.anchor = now;
	}
}

/// A presentation clock driven by [Instant].
///
/// Time advances at `rate` while running, backwards when the rate is negative.
/// Every state change is forwarded to the registered [ClockStateSink]s, in registration order.
pub struct SystemClock {
	position: Mutex<Position>,
	sinks: Mutex<Vec<Box<dyn ClockStateSink>>>,
}

impl Default for SystemClock {
	fn default() -> Self {
		Self::new()
	}
}

impl SystemClock {
	pub fn new() -> Self {
		Self {
			position: Mutex::new(Position {
				state: ClockState::Stopped,
				base: Time::ZERO,
				anchor: Instant::now(),
				rate: 1.0,
			}),
			sinks: Mutex::new(Vec::new()),
		}
	}

	/// Forward state changes to `sink`.
	pub fn add_sink<S: ClockStateSink + 'static>(&self, sink: S) {
		self.sinks.lock().push(Box::new(sink));
	}

	/// Drop every sink, breaking any reference cycle with them.
	pub fn clear_sinks(&self) {
		self.sinks.lock().clear();
	}

	pub fn state(&self) -> ClockState {
		self.position.lock().state
	}

	pub fn rate(&self) -> f32 {
		self.position.lock().rate
	}

	/// Start running from `offset`, or from the current position when None.
	pub fn start(&self, offset: Option<Time>) -> Result<()> {
		{
			let mut position = self.position.lock();
			let now = Instant::now();
			position.rebase(now);
			if let Some(offset) = offset {
				position.base = offset;
			}
			position.state = ClockState::Running;
			tracing::debug!(base = %position.base, rate = position.rate, "clock started");
		}

		self.notify(|sink| sink.on_clock_start(offset))
	}

	/// Stop and rewind to zero.
	pub fn stop(&self) -> Result<()> {
		{
			let mut position = self.position.lock();
			position.state = ClockState::Stopped;
			position.base = Time::ZERO;
			tracing::debug!("clock stopped");
		}

		self.notify(|sink| sink.on_clock_stop())
	}

	/// Freeze the current position. Only valid while running.
	pub fn pause(&self) -> Result<()> {
		{
			let mut position = self.position.lock();
			if position.state != ClockState::Running {
				return Err(Error::InvalidRequest);
			}

			position.rebase(Instant::now());
			position.state = ClockState::Paused;
			tracing::debug!(base = %position.base, "clock paused");
		}

		self.notify(|sink| sink.on_clock_pause())
	}

	/// Resume from a pause.
	pub fn restart(&self) -> Result<()> {
		{
			let mut position = self.position.lock();
			if position.state != ClockState::Paused {
				return Err(Error::InvalidRequest);
			}

			position.anchor = Instant::now();
			position.state = ClockState::Running;
			tracing::debug!(base = %position.base, "clock restarted");
		}

		self.notify(|sink| sink.on_clock_restart())
	}

	/// Change the playback rate, keeping the current position.
	pub fn set_rate(&self, rate: f32) -> Result<()> {
		if !rate.is_finite() {
			return Err(Error::InvalidArgument);
		}

		{
			let mut position = self.position.lock();
			position.rebase(Instant::now());
			position.rate = rate;
			tracing::debug!(rate, "clock rate changed");
		}

		self.notify(|sink| sink.on_clock_set_rate(rate))
	}

	// Every sink is told, even after one fails. The first error is returned.
	fn notify<F: Fn(&dyn ClockStateSink) -> Result<()>>(&self, f: F) -> Result<()> {
		let sinks = self.sinks.lock();
		let mut res = Ok(());

		for sink in sinks.iter() {
			if let Err(err) = f(sink.as_ref()) {
				tracing::warn!(%err, "clock sink failed");
				if res.is_ok() {
					res = Err(err);
				}
			}
		}

		res
	}
}

impl Clock for SystemClock {
	fn time(&self) -> Result<ClockTime> {
		let now = Instant::now();
		let time = self.position.lock().at(now);
		Ok(ClockTime { time, system: now })
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;

	#[derive(Clone, Default)]
	struct Recorder {
		calls: Arc<Mutex<Vec<String>>>,
		fail: bool,
	}

	impl Recorder {
		fn record(&self, call: String) -> Result<()> {
			self.calls.lock().push(call);
			match self.fail {
				true => Err(Error::Unexpected),
				false => Ok(()),
			}
		}
	}

	impl ClockStateSink for Recorder {
		fn on_clock_start(&self, offset: Option<Time>) -> Result<()> {
			self.record(format!("start {offset:?}"))
		}

		fn on_clock_stop(&self) -> Result<()> {
			self.record("stop".into())
		}

		fn on_clock_pause(&self) -> Result<()> {
			self.record("pause".into())
		}

		fn on_clock_restart(&self) -> Result<()> {
			self.record("restart".into())
		}

		fn on_clock_set_rate(&self, rate: f32) -> Result<()> {
			self.record(format!("rate {rate}"))
		}
	}

	fn now(clock: &SystemClock) -> Time {
		clock.time().unwrap().time
	}

	#[test]
	fn test_stopped_clock_is_still() {
		let clock = SystemClock::new();
		assert_eq!(clock.state(), ClockState::Stopped);
		assert_eq!(now(&clock), Time::ZERO);

		std::thread::sleep(Duration::from_millis(5));
		assert_eq!(now(&clock), Time::ZERO);
	}

	#[test]
	fn test_start_offset() {
		let clock = SystemClock::new();
		clock.start(Some(Time::from_secs(10))).unwrap();

		std::thread::sleep(Duration::from_millis(20));
		let time = now(&clock);
		assert!(time >= Time::from_millis(10_020), "{time}");
		assert!(time < Time::from_secs(11), "{time}");
	}

	#[test]
	fn test_pause_freezes() {
		let clock = SystemClock::new();
		clock.start(Some(Time::ZERO)).unwrap();
		std::thread::sleep(Duration::from_millis(10));
		clock.pause().unwrap();

		let paused = now(&clock);
		assert!(paused >= Time::from_millis(10));

		std::thread::sleep(Duration::from_millis(10));
		assert_eq!(now(&clock), paused);

		clock.restart().unwrap();
		std::thread::sleep(Duration::from_millis(10));
		assert!(now(&clock) >= paused + Time::from_millis(10));
	}

	#[test]
	fn test_stop_rewinds() {
		let clock = SystemClock::new();
		clock.start(Some(Time::from_secs(3))).unwrap();
		clock.stop().unwrap();
		assert_eq!(now(&clock), Time::ZERO);
	}

	#[test]
	fn test_reverse_rate() {
		let clock = SystemClock::new();
		clock.set_rate(-2.0).unwrap();
		clock.start(Some(Time::from_secs(5))).unwrap();

		std::thread::sleep(Duration::from_millis(20));
		let time = now(&clock);
		assert!(time <= Time::from_millis(4_960), "{time}");
		assert_eq!(clock.rate(), -2.0);
	}

	#[test]
	fn test_invalid_transitions() {
		let clock = SystemClock::new();
		assert_eq!(clock.pause(), Err(Error::InvalidRequest));
		assert_eq!(clock.restart(), Err(Error::InvalidRequest));
		assert_eq!(clock.set_rate(f32::NAN), Err(Error::InvalidArgument));

		clock.start(None).unwrap();
		assert_eq!(clock.restart(), Err(Error::InvalidRequest));
	}

	#[test]
	fn test_sinks_notified() {
		let clock = SystemClock::new();
		let recorder = Recorder::default();
		clock.add_sink(recorder.clone());

		clock.start(Some(Time::ZERO)).unwrap();
		clock.pause().unwrap();
		clock.restart().unwrap();
		clock.set_rate(0.5).unwrap();
		clock.stop().unwrap();

		assert_eq!(
			*recorder.calls.lock(),
			vec!["start Some(0µs)", "pause", "restart", "rate 0.5", "stop"]
		);

		clock.clear_sinks();
		clock.start(None).unwrap();
		assert_eq!(recorder.calls.lock().len(), 5);
	}

	#[test]
	fn test_failing_sink() {
		let clock = SystemClock::new();
		let failing = Recorder {
			fail: true,
			..Default::default()
		};
		let healthy = Recorder::default();
		clock.add_sink(failing.clone());
		clock.add_sink(healthy.clone());

		assert_eq!(clock.start(None), Err(Error::Unexpected));
		assert_eq!(clock.state(), ClockState::Running);
		assert_eq!(healthy.calls.lock().len(), 1);
	}
}
