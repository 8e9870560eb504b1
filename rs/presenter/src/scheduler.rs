//! Times frame presentation against the presentation clock.
//!
//! A dedicated worker thread owns the wait: it drains the queue, presenting
//! every frame that is late or within a quarter frame of its deadline, and
//! sleeps until the first frame that is still early. Control happens through
//! a small command channel (terminate, flush, schedule). Terminate and flush
//! are handled ahead of any presentation still waiting in the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::{Clock, Error, Frame, Ratio, Result, SampleQueue, Time};

/// Where the scheduler sends frames.
pub trait FrameSink<S>: Send + Sync + 'static {
	/// Show the frame.
	fn present(&self, frame: &Frame<S>) -> Result<()>;

	/// The worker thread is done with a frame it presented.
	fn release(&self, frame: Frame<S>);
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// How long [Scheduler::stop] waits for the worker to exit.
	pub stop_timeout: Duration,

	/// How long [Scheduler::flush] waits for the worker to acknowledge.
	pub flush_timeout: Duration,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			stop_timeout: Duration::from_millis(500),
			flush_timeout: Duration::from_millis(2000),
		}
	}
}

/// The outcome of [Scheduler::schedule].
#[must_use]
pub enum Scheduled<S> {
	/// The worker will present the frame when it is due.
	Queued,

	/// The frame was presented on the calling thread and is handed back.
	Presented(Frame<S>, Result<()>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Timing {
	interval: Time,
	tolerance: Time,
	rate: f32,
	last: Time,
}

impl Timing {
	/// How long to sleep before a frame due at `pts` is close enough to present.
	///
	/// None means present now: the frame is late or within the tolerance band.
	fn delay(&self, pts: Time, now: Time) -> Option<Duration> {
		let mut delta = pts - now;
		if self.rate < 0.0 {
			// The clock runs backwards.
			delta = -delta;
		}

		if delta.is_negative() || delta <= self.tolerance {
			return None;
		}

		let millis = (delta - self.tolerance).as_millis();

		// The presentation clock runs at the rate, but sleeping uses the system clock.
		let rate = match self.rate.abs() {
			rate if rate < f32::EPSILON => 1.0,
			rate => rate as f64,
		};

		let millis = (millis as f64 / rate) as u64;
		Some(Duration::from_millis(millis.max(1)))
	}
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			interval: Time::ZERO,
			tolerance: Time::ZERO,
			rate: 1.0,
			last: Time::ZERO,
		}
	}
}

enum Command {
	Terminate,
	Flush,
	Schedule,
}

struct Shared<S> {
	queue: SampleQueue<Frame<S>>,
	timing: Mutex<Timing>,
	clock: Mutex<Option<Arc<dyn Clock>>>,
	sink: Arc<dyn FrameSink<S>>,

	// Set while a flush or terminate is on its way to the worker.
	interrupt: AtomicBool,
}

impl<S: Send + Sync + 'static> Shared<S> {
	fn present(&self, frame: &Frame<S>) -> Result<()> {
		if let Some(time) = frame.time() {
			self.timing.lock().last = time;
		}

		self.sink.present(frame)
	}

	/// Present everything that is due, returning how long to sleep for the rest.
	fn process_queue(&self) -> Option<Duration> {
		while !self.interrupt.load(Ordering::SeqCst) {
			let Some(frame) = self.queue.pop_front() else {
				break;
			};

			if let Some(wait) = self.delay(&frame) {
				self.queue.put_back(frame);
				return Some(wait);
			}

			if let Err(err) = self.present(&frame) {
				tracing::warn!(%err, id = frame.id(), "failed to present frame");
			}

			self.sink.release(frame);
		}

		None
	}

	fn delay(&self, frame: &Frame<S>) -> Option<Duration> {
		let clock = self.clock.lock().clone()?;

		// Frames without a timestamp are shown as soon as possible.
		let pts = frame.time()?;

		let now = match clock.time() {
			Ok(now) => now.time,
			Err(err) => {
				tracing::warn!(%err, "failed to query the clock");
				return None;
			}
		};

		let wait = self.timing.lock().delay(pts, now);
		tracing::trace!(id = frame.id(), %pts, %now, ?wait, "frame timing");

		wait
	}

	fn run(
		&self,
		commands: Receiver<Command>,
		ready: Sender<()>,
		flushed: Sender<Vec<Frame<S>>>,
		exited: Sender<Vec<Frame<S>>>,
	) {
		if ready.send(()).is_err() {
			return;
		}

		let mut wait = None;

		loop {
			let command = match wait {
				None => commands.recv().ok(),
				Some(timeout) => match commands.recv_timeout(timeout) {
					Ok(command) => Some(command),
					Err(RecvTimeoutError::Timeout) => Some(Command::Schedule),
					Err(RecvTimeoutError::Disconnected) => None,
				},
			};

			let Some(command) = command else {
				let _ = exited.send(self.queue.drain());
				return;
			};

			// Everything already waiting is handled together, most urgent first.
			let batch: Vec<Command> = std::iter::once(command).chain(commands.try_iter()).collect();

			if batch.iter().any(|command| matches!(command, Command::Terminate)) {
				let _ = exited.send(self.queue.drain());
				return;
			}

			let flushes = batch.iter().filter(|command| matches!(command, Command::Flush)).count();
			if flushes > 0 {
				self.interrupt.store(false, Ordering::SeqCst);
				wait = None;

				let frames = self.queue.drain();
				tracing::debug!(frames = frames.len(), "scheduler flushed");

				// One acknowledgement per caller; only the first carries frames.
				let _ = flushed.send(frames);
				for _ in 1..flushes {
					let _ = flushed.send(Vec::new());
				}
			}

			if batch.iter().any(|command| matches!(command, Command::Schedule)) {
				wait = self.process_queue();
			}
		}
	}
}

struct Worker<S> {
	commands: Sender<Command>,
	flushed: Receiver<Vec<Frame<S>>>,
	exited: Receiver<Vec<Frame<S>>>,
	thread: ThreadId,
	handle: JoinHandle<()>,
}

/// Queues frames until their presentation time and hands them to a [FrameSink].
pub struct Scheduler<S: Send + Sync + 'static> {
	shared: Arc<Shared<S>>,
	worker: Mutex<Option<Worker<S>>>,
	config: SchedulerConfig,
}

impl<S: Send + Sync + 'static> Scheduler<S> {
	pub fn new(sink: Arc<dyn FrameSink<S>>, config: SchedulerConfig) -> Self {
		Self {
			shared: Arc::new(Shared {
				queue: SampleQueue::new(),
				timing: Mutex::new(Timing::default()),
				clock: Mutex::new(None),
				sink,
				interrupt: AtomicBool::new(false),
			}),
			worker: Mutex::new(None),
			config,
		}
	}

	/// Set the nominal frame rate, which also sets the quarter-frame tolerance band.
	pub fn set_frame_rate(&self, rate: Ratio) {
		let interval = Time::from_timescale(rate.den as i64, rate.num as u64);

		let mut timing = self.shared.timing.lock();
		timing.interval = interval;
		timing.tolerance = interval / 4;
	}

	/// Set the signed playback rate. Negative plays in reverse and zero is scrubbing.
	///
	/// The rate only scales sleeps and flips the direction of the deadline check.
	/// A rate of zero does not make queued frames present immediately; callers
	/// that scrub pass `present_now` to [Self::schedule] instead.
	pub fn set_clock_rate(&self, rate: f32) {
		self.shared.timing.lock().rate = rate;
	}

	pub fn clock_rate(&self) -> f32 {
		self.shared.timing.lock().rate
	}

	/// The duration of one frame at the nominal frame rate.
	pub fn frame_duration(&self) -> Time {
		self.shared.timing.lock().interval
	}

	/// The timestamp of the most recently presented frame.
	pub fn last_sample_time(&self) -> Time {
		self.shared.timing.lock().last
	}

	pub fn is_running(&self) -> bool {
		self.worker.lock().is_some()
	}

	/// The number of frames waiting for their deadline.
	pub fn queued(&self) -> usize {
		self.shared.queue.len()
	}

	/// Spawn the worker, blocking until it is ready.
	///
	/// Without a clock every frame is presented immediately.
	pub fn start(&self, clock: Option<Arc<dyn Clock>>) -> Result<()> {
		let mut worker = self.worker.lock();
		if worker.is_some() {
			return Err(Error::InvalidRequest);
		}

		*self.shared.clock.lock() = clock;
		self.shared.interrupt.store(false, Ordering::SeqCst);

		let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
		let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
		let (flushed_tx, flushed_rx) = crossbeam_channel::unbounded();
		let (exited_tx, exited_rx) = crossbeam_channel::bounded(1);

		let shared = self.shared.clone();
		let handle = std::thread::Builder::new()
			.name("presenter-scheduler".into())
			.spawn(move || shared.run(commands_rx, ready_tx, flushed_tx, exited_tx))
			.map_err(|err| {
				tracing::warn!(%err, "failed to spawn scheduler thread");
				Error::Unexpected
			})?;

		// The ready sender is dropped if the worker dies first.
		if ready_rx.recv().is_err() {
			let _ = handle.join();
			*self.shared.clock.lock() = None;
			return Err(Error::Unexpected);
		}

		tracing::debug!("scheduler started");

		*worker = Some(Worker {
			commands: commands_tx,
			flushed: flushed_rx,
			exited: exited_rx,
			thread: handle.thread().id(),
			handle,
		});

		Ok(())
	}

	/// Terminate the worker, returning any frames it still held.
	///
	/// Waits a bounded time for the thread to exit and proceeds regardless.
	pub fn stop(&self) -> Vec<Frame<S>> {
		let worker = self.worker.lock().take();
		*self.shared.clock.lock() = None;

		let Some(worker) = worker else {
			return self.shared.queue.drain();
		};

		if std::thread::current().id() == worker.thread {
			let _ = worker.commands.send(Command::Terminate);
			// Called from a sink callback; the worker exits once it returns.
			return self.shared.queue.drain();
		}

		self.shared.interrupt.store(true, Ordering::SeqCst);
		let _ = worker.commands.send(Command::Terminate);

		let mut frames = match worker.exited.recv_timeout(self.config.stop_timeout) {
			Ok(frames) => {
				let _ = worker.handle.join();
				frames
			}
			Err(RecvTimeoutError::Disconnected) => {
				let _ = worker.handle.join();
				Vec::new()
			}
			Err(RecvTimeoutError::Timeout) => {
				tracing::warn!(timeout = ?self.config.stop_timeout, "scheduler thread did not exit in time");
				Vec::new()
			}
		};

		frames.extend(worker.flushed.try_iter().flatten());
		frames.extend(self.shared.queue.drain());

		tracing::debug!(frames = frames.len(), "scheduler stopped");

		frames
	}

	/// Present a frame now, or queue it for the worker.
	///
	/// Frames are presented on the calling thread when `present_now` is set or
	/// there is no clock to time them against.
	pub fn schedule(&self, frame: Frame<S>, present_now: bool) -> Result<Scheduled<S>> {
		let clock = self.shared.clock.lock().is_some();

		if present_now || !clock {
			let res = self.shared.present(&frame);
			return Ok(Scheduled::Presented(frame, res));
		}

		let commands = self.worker.lock().as_ref().map(|worker| worker.commands.clone());

		self.shared.queue.push_back(frame);

		// The frame stays queued on failure and comes back with the next flush.
		let commands = commands.ok_or(Error::NotInitialized)?;
		commands.send(Command::Schedule).map_err(|_| Error::Unexpected)?;

		Ok(Scheduled::Queued)
	}

	/// Discard every queued frame, returning them.
	///
	/// Blocks until the worker acknowledges, it dies, or the flush timeout expires.
	/// No frame queued before the call is presented afterwards.
	pub fn flush(&self) -> Vec<Frame<S>> {
		let worker = self
			.worker
			.lock()
			.as_ref()
			.map(|worker| (worker.commands.clone(), worker.flushed.clone(), worker.thread));

		let Some((commands, flushed, thread)) = worker else {
			return self.shared.queue.drain();
		};

		if std::thread::current().id() == thread {
			return self.shared.queue.drain();
		}

		// Acknowledgements from a flush that timed out earlier.
		let mut frames: Vec<_> = flushed.try_iter().flatten().collect();

		self.shared.interrupt.store(true, Ordering::SeqCst);
		if commands.send(Command::Flush).is_err() {
			self.shared.interrupt.store(false, Ordering::SeqCst);
			frames.extend(self.shared.queue.drain());
			return frames;
		}

		match flushed.recv_timeout(self.config.flush_timeout) {
			Ok(drained) => frames.extend(drained),
			Err(RecvTimeoutError::Disconnected) => frames.extend(self.shared.queue.drain()),
			Err(RecvTimeoutError::Timeout) => {
				tracing::warn!(timeout = ?self.config.flush_timeout, "scheduler flush timed out");
				frames.extend(self.shared.queue.drain());
			}
		}

		frames
	}
}

impl<S: Send + Sync + 'static> Drop for Scheduler<S> {
	fn drop(&mut self) {
		if self.is_running() {
			self.stop();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::time::Instant;

	use crate::{ClockTime, ManualClock};

	/// Records every present and release.
	struct Recorder {
		presented: Sender<(u64, Instant)>,
		released: Sender<u64>,
	}

	impl FrameSink<()> for Recorder {
		fn present(&self, frame: &Frame<()>) -> Result<()> {
			let _ = self.presented.send((frame.id(), Instant::now()));
			Ok(())
		}

		fn release(&self, frame: Frame<()>) {
			let _ = self.released.send(frame.id());
		}
	}

	/// A clock that follows the wall clock from zero.
	struct WallClock(Instant);

	impl Clock for WallClock {
		fn time(&self) -> Result<ClockTime> {
			Ok(ClockTime {
				time: self.0.elapsed().into(),
				system: Instant::now(),
			})
		}
	}

	fn setup() -> (Scheduler<()>, Receiver<(u64, Instant)>, Receiver<u64>) {
		let (presented, presented_rx) = crossbeam_channel::unbounded();
		let (released, released_rx) = crossbeam_channel::unbounded();
		let sink = Arc::new(Recorder { presented, released });
		let scheduler = Scheduler::new(sink, SchedulerConfig::default());
		scheduler.set_frame_rate(Ratio::new(30, 1));
		(scheduler, presented_rx, released_rx)
	}

	fn frame_at(time: Time) -> Frame<()> {
		let mut frame = Frame::new(());
		frame.set_time(Some(time));
		frame
	}

	fn timing(rate: f32) -> Timing {
		Timing {
			interval: Time::from_micros(33_333),
			tolerance: Time::from_micros(8_333),
			rate,
			last: Time::ZERO,
		}
	}

	#[test]
	fn test_delay_late() {
		let timing = timing(1.0);
		assert_eq!(timing.delay(Time::from_millis(100), Time::from_millis(150)), None);
	}

	#[test]
	fn test_delay_within_tolerance() {
		let timing = timing(1.0);
		assert_eq!(timing.delay(Time::from_millis(105), Time::from_millis(100)), None);
	}

	#[test]
	fn test_delay_early() {
		let timing = timing(1.0);
		let now = Time::from_millis(1000);
		let pts = now + Time::from_micros(8_333) + Time::from_millis(40);
		assert_eq!(timing.delay(pts, now), Some(Duration::from_millis(40)));
	}

	#[test]
	fn test_delay_scaled_by_rate() {
		let now = Time::from_millis(1000);
		let pts = now + Time::from_micros(8_333) + Time::from_millis(40);

		assert_eq!(timing(2.0).delay(pts, now), Some(Duration::from_millis(20)));
		assert_eq!(timing(0.5).delay(pts, now), Some(Duration::from_millis(80)));

		// Zero never divides.
		assert_eq!(timing(0.0).delay(pts, now), Some(Duration::from_millis(40)));
	}

	#[test]
	fn test_delay_reverse() {
		let timing = timing(-1.0);
		let now = Time::from_millis(1000);

		// Ahead of the clock is late when running backwards.
		assert_eq!(timing.delay(Time::from_millis(1100), now), None);

		let pts = now - Time::from_micros(8_333) - Time::from_millis(40);
		assert_eq!(timing.delay(pts, now), Some(Duration::from_millis(40)));
	}

	#[test]
	fn test_delay_rounds_up_to_one_ms() {
		let timing = timing(1.0);
		let now = Time::ZERO;
		let pts = Time::from_micros(8_333 + 500);
		assert_eq!(timing.delay(pts, now), Some(Duration::from_millis(1)));
	}

	#[test]
	fn test_frame_rate() {
		let (scheduler, _, _) = setup();
		assert_eq!(scheduler.frame_duration(), Time::from_micros(33_333));

		scheduler.set_frame_rate(Ratio::new(25, 1));
		assert_eq!(scheduler.frame_duration(), Time::from_millis(40));
	}

	#[test]
	fn test_present_now_is_synchronous() {
		let (scheduler, presented, _) = setup();
		scheduler.start(Some(Arc::new(ManualClock::default()))).unwrap();

		let frame = frame_at(Time::from_secs(100));
		let id = frame.id();

		match scheduler.schedule(frame, true).unwrap() {
			Scheduled::Presented(frame, res) => {
				assert_eq!(frame.id(), id);
				assert!(res.is_ok());
			}
			Scheduled::Queued => panic!("expected a synchronous present"),
		}

		// Already presented before schedule returned.
		assert_eq!(presented.try_recv().unwrap().0, id);
		assert_eq!(scheduler.last_sample_time(), Time::from_secs(100));
		scheduler.stop();
	}

	#[test]
	fn test_no_clock_is_synchronous() {
		let (scheduler, presented, _) = setup();

		let frame = frame_at(Time::from_secs(100));
		assert!(matches!(scheduler.schedule(frame, false).unwrap(), Scheduled::Presented(..)));
		assert!(presented.try_recv().is_ok());
	}

	#[test]
	fn test_late_frame_presented_immediately() {
		let (scheduler, presented, released) = setup();
		let clock = Arc::new(ManualClock::new(Time::from_secs(10)));
		scheduler.start(Some(clock)).unwrap();

		let frame = frame_at(Time::from_secs(1));
		let id = frame.id();
		let start = Instant::now();
		assert!(matches!(scheduler.schedule(frame, false).unwrap(), Scheduled::Queued));

		let (presented_id, at) = presented.recv_timeout(Duration::from_secs(1)).unwrap();
		assert_eq!(presented_id, id);
		assert!(at.duration_since(start) < Duration::from_millis(200));

		// The worker hands the frame back once presented.
		assert_eq!(released.recv_timeout(Duration::from_secs(1)).unwrap(), id);
		scheduler.stop();
	}

	#[test]
	fn test_early_frame_waits() {
		let (scheduler, presented, _) = setup();
		scheduler.start(Some(Arc::new(WallClock(Instant::now())))).unwrap();

		let start = Instant::now();
		let due = Time::from(start.elapsed()) + Time::from_micros(8_333) + Time::from_millis(40);
		assert!(matches!(scheduler.schedule(frame_at(due), false).unwrap(), Scheduled::Queued));

		let (_, at) = presented.recv_timeout(Duration::from_secs(2)).unwrap();
		let waited = at.duration_since(start);
		assert!(waited >= Duration::from_millis(35), "presented early after {waited:?}");
		assert!(waited < Duration::from_millis(500), "presented late after {waited:?}");

		scheduler.stop();
	}

	#[test]
	fn test_flush_discards_queued() {
		let (scheduler, presented, released) = setup();
		scheduler.start(Some(Arc::new(ManualClock::default()))).unwrap();

		let frame = frame_at(Time::from_secs(60));
		let id = frame.id();
		assert!(matches!(scheduler.schedule(frame, false).unwrap(), Scheduled::Queued));

		let flushed = scheduler.flush();
		assert_eq!(flushed.len(), 1);
		assert_eq!(flushed[0].id(), id);
		assert_eq!(scheduler.queued(), 0);

		std::thread::sleep(Duration::from_millis(50));
		assert!(presented.try_recv().is_err());
		assert!(released.try_recv().is_err());

		scheduler.stop();
	}

	/// Takes a while to present, so commands pile up behind it.
	struct Slow(Recorder);

	impl FrameSink<()> for Slow {
		fn present(&self, frame: &Frame<()>) -> Result<()> {
			self.0.present(frame)?;
			std::thread::sleep(Duration::from_millis(100));
			Ok(())
		}

		fn release(&self, frame: Frame<()>) {
			self.0.release(frame);
		}
	}

	#[test]
	fn test_flush_ahead_of_due_frames() {
		let (presented, presented_rx) = crossbeam_channel::unbounded();
		let (released, released_rx) = crossbeam_channel::unbounded();
		let sink = Arc::new(Slow(Recorder { presented, released }));

		let scheduler = Scheduler::new(sink, SchedulerConfig::default());
		scheduler.set_frame_rate(Ratio::new(30, 1));
		scheduler.start(Some(Arc::new(ManualClock::new(Time::from_secs(10))))).unwrap();

		// Every frame is already due.
		let first = frame_at(Time::from_secs(1));
		let first_id = first.id();
		assert!(matches!(scheduler.schedule(first, false).unwrap(), Scheduled::Queued));

		// The worker is busy with the first frame while the rest queue up.
		assert_eq!(presented_rx.recv_timeout(Duration::from_secs(1)).unwrap().0, first_id);
		for secs in [2, 3] {
			assert!(matches!(
				scheduler.schedule(frame_at(Time::from_secs(secs)), false).unwrap(),
				Scheduled::Queued
			));
		}

		let flushed = scheduler.flush();
		assert_eq!(flushed.len(), 2);

		assert_eq!(released_rx.recv_timeout(Duration::from_secs(1)).unwrap(), first_id);
		std::thread::sleep(Duration::from_millis(50));
		assert!(presented_rx.try_recv().is_err());

		// Frames scheduled after the flush are presented again.
		let next = frame_at(Time::from_secs(4));
		let next_id = next.id();
		assert!(matches!(scheduler.schedule(next, false).unwrap(), Scheduled::Queued));
		assert_eq!(presented_rx.recv_timeout(Duration::from_secs(1)).unwrap().0, next_id);

		scheduler.stop();
	}

	#[test]
	fn test_zero_rate_still_waits() {
		let (scheduler, presented, _) = setup();
		scheduler.start(Some(Arc::new(ManualClock::default()))).unwrap();
		scheduler.set_clock_rate(0.0);

		assert!(matches!(
			scheduler.schedule(frame_at(Time::from_secs(60)), false).unwrap(),
			Scheduled::Queued
		));
		std::thread::sleep(Duration::from_millis(50));
		assert!(presented.try_recv().is_err());

		// Scrubbing presents through present_now.
		assert!(matches!(
			scheduler.schedule(frame_at(Time::from_secs(61)), true).unwrap(),
			Scheduled::Presented(..)
		));
		assert!(presented.try_recv().is_ok());

		assert_eq!(scheduler.stop().len(), 1);
	}

	#[test]
	fn test_stop_returns_queued() {
		let (scheduler, _, _) = setup();
		scheduler.start(Some(Arc::new(ManualClock::default()))).unwrap();
		assert!(scheduler.is_running());

		for secs in [10, 20] {
			assert!(matches!(
				scheduler.schedule(frame_at(Time::from_secs(secs)), false).unwrap(),
				Scheduled::Queued
			));
		}

		let frames = scheduler.stop();
		assert_eq!(frames.len(), 2);
		assert!(!scheduler.is_running());

		// Without a clock, frames are presented immediately again.
		assert!(matches!(
			scheduler.schedule(frame_at(Time::from_secs(30)), false).unwrap(),
			Scheduled::Presented(..)
		));
	}

	#[test]
	fn test_start_twice() {
		let (scheduler, _, _) = setup();
		scheduler.start(None).unwrap();
		assert_eq!(scheduler.start(None), Err(Error::InvalidRequest));
		scheduler.stop();
	}

	#[test]
	fn test_flush_without_worker() {
		let (scheduler, _, _) = setup();
		assert!(scheduler.flush().is_empty());
	}
}
