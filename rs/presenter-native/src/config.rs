use std::time::Duration;

use anyhow::Context;
use presenter::{MIN_BUFFER_COUNT, Presenter, SchedulerConfig, Size};
use serde_with::{DisplayFromStr, serde_as};

use crate::SoftwareDevice;

const DEFAULT_DISPLAY: Size = Size::new(1920, 1080);
const DEFAULT_REFRESH: u32 = 60;

/// Settings for a presenter, from the command line, the environment or a TOML file.
///
/// Every field is optional so values loaded from a file survive re-applying the
/// command line with [clap::Parser::update_from]; the accessors fill in defaults.
#[serde_as]
#[derive(Clone, Debug, Default, clap::Parser, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct Config {
	/// The number of frame buffers to allocate, at least 3. [default: 3]
	#[arg(id = "buffers", long = "buffers", env = "PRESENTER_BUFFERS")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buffers: Option<usize>,

	/// The display size, as WIDTHxHEIGHT. [default: 1920x1080]
	#[arg(id = "display", long = "display", env = "PRESENTER_DISPLAY")]
	#[serde_as(as = "Option<DisplayFromStr>")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub display: Option<Size>,

	/// The display refresh rate in Hz. [default: 60]
	#[arg(id = "refresh", long = "refresh", env = "PRESENTER_REFRESH")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refresh: Option<u32>,

	/// How long to wait for the scheduler thread to exit. [default: 500ms]
	#[arg(
		id = "stop-timeout",
		long = "stop-timeout",
		env = "PRESENTER_STOP_TIMEOUT",
		value_parser = humantime::parse_duration,
	)]
	#[serde(with = "humantime_serde")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_timeout: Option<Duration>,

	/// How long to wait for the scheduler thread to acknowledge a flush. [default: 2s]
	#[arg(
		id = "flush-timeout",
		long = "flush-timeout",
		env = "PRESENTER_FLUSH_TIMEOUT",
		value_parser = humantime::parse_duration,
	)]
	#[serde(with = "humantime_serde")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub flush_timeout: Option<Duration>,
}

impl Config {
	pub fn buffers(&self) -> usize {
		self.buffers.unwrap_or(MIN_BUFFER_COUNT)
	}

	pub fn display(&self) -> Size {
		self.display.unwrap_or(DEFAULT_DISPLAY)
	}

	pub fn refresh(&self) -> u32 {
		self.refresh.unwrap_or(DEFAULT_REFRESH)
	}

	pub fn scheduler(&self) -> SchedulerConfig {
		let mut config = SchedulerConfig::default();
		if let Some(timeout) = self.stop_timeout {
			config.stop_timeout = timeout;
		}
		if let Some(timeout) = self.flush_timeout {
			config.flush_timeout = timeout;
		}
		config
	}

	pub fn validate(&self) -> anyhow::Result<()> {
		anyhow::ensure!(
			self.buffers() >= MIN_BUFFER_COUNT,
			"at least {MIN_BUFFER_COUNT} buffers are required, got {}",
			self.buffers()
		);

		let display = self.display();
		anyhow::ensure!(display.width > 0 && display.height > 0, "invalid display size: {display}");

		Ok(())
	}

	/// Create a presenter rendering with a [SoftwareDevice].
	pub fn init(self) -> anyhow::Result<Presenter<SoftwareDevice>> {
		self.validate()?;

		let device = SoftwareDevice::new(self.display(), self.refresh());
		let presenter = Presenter::new(device, self.scheduler());
		presenter
			.engine()
			.set_buffer_count(self.buffers())
			.context("failed to set buffer count")?;

		tracing::debug!(buffers = self.buffers(), display = %self.display(), refresh = self.refresh(), "presenter created");

		Ok(presenter)
	}
}
