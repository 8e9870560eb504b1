use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use presenter::{Clock, Event, Message, Presenter, Services};
use presenter_native::{Config, SoftwareDevice, SoftwareSurface, SystemClock};

use crate::pattern::TestPattern;

/// The window handle handed to the software device.
const WINDOW: u64 = 1;

/// A presenter wired to a test pattern, a system clock and an event channel.
pub struct Session {
	pub presenter: Presenter<SoftwareDevice>,
	pub clock: Arc<SystemClock>,
	pub pattern: Arc<TestPattern>,
	events: Receiver<Event>,
	presented: Arc<AtomicU64>,
}

impl Session {
	pub fn new(config: Config, pattern: TestPattern) -> anyhow::Result<Self> {
		let presenter = config.init()?;
		presenter
			.set_video_window(Some(WINDOW))
			.context("failed to set the video window")?;

		let clock = Arc::new(SystemClock::new());
		clock.add_sink(presenter.clone());

		let pattern = Arc::new(pattern);
		let (tx, events) = crossbeam_channel::unbounded();

		presenter
			.init_service_pointers(Services {
				mixer: pattern.clone(),
				clock: Some(clock.clone() as Arc<dyn Clock>),
				events: Arc::new(tx),
			})
			.context("failed to attach services")?;

		presenter
			.process_message(Message::InvalidateFormat)
			.context("format negotiation failed")?;

		let format = presenter.current_format()?;
		tracing::info!(pixel = ?format.pixel, size = %format.size, "negotiated format");

		let presented = Arc::new(AtomicU64::new(0));
		presenter.engine().register_callback(Some(Box::new({
			let presented = presented.clone();
			let clock = clock.clone();

			move |_: &SoftwareSurface| {
				let count = presented.fetch_add(1, Ordering::Relaxed) + 1;
				let time = clock.time().map(|now| now.time).unwrap_or_default();
				tracing::info!(frame = count, clock = %time, "frame presented");
			}
		})));

		Ok(Self {
			presenter,
			clock,
			pattern,
			events,
			presented,
		})
	}

	pub fn presented(&self) -> u64 {
		self.presented.load(Ordering::Relaxed)
	}

	/// Log events until `done` returns true.
	///
	/// Returns false when `cancel` was set or `timeout` elapsed first.
	pub fn wait(&self, timeout: Duration, cancel: &AtomicBool, done: impl Fn(&Event) -> bool) -> anyhow::Result<bool> {
		let deadline = Instant::now() + timeout;

		while !cancel.load(Ordering::Relaxed) {
			let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
				tracing::warn!(?timeout, "timed out waiting for the presenter");
				return Ok(false);
			};

			match self.events.recv_timeout(remaining.min(Duration::from_millis(100))) {
				Ok(Event::ErrorAbort(err)) => anyhow::bail!("presenter aborted: {err}"),
				Ok(event) => {
					tracing::debug!(?event, "event");
					if done(&event) {
						return Ok(true);
					}
				}
				Err(RecvTimeoutError::Timeout) => continue,
				Err(RecvTimeoutError::Disconnected) => anyhow::bail!("presenter went away"),
			}
		}

		Ok(false)
	}

	/// Stop the clock and tear everything down.
	pub fn close(self) -> anyhow::Result<()> {
		let res = self.clock.stop();

		self.presenter.engine().register_callback(None);
		self.presenter.shutdown();
		self.clock.clear_sinks();

		tracing::info!(presented = self.presented(), "session closed");

		res.context("failed to stop the clock")
	}
}
