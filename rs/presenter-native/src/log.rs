use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Logging configuration, flattened into a host's command line.
#[serde_as]
#[derive(Clone, Debug, clap::Args, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Log {
	/// The level of logs to print. `RUST_LOG` takes precedence when set.
	#[arg(id = "log-level", long = "log-level", default_value = "info", env = "PRESENTER_LOG_LEVEL")]
	#[serde_as(as = "DisplayFromStr")]
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	/// Install a global subscriber writing to stderr.
	///
	/// Only the first call wins; later calls are ignored.
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(LevelFilter::from_level(self.level).into())
			.from_env_lossy();

		let res = tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_writer(std::io::stderr)
			.with_thread_names(true)
			.try_init();

		if res.is_ok() {
			tracing::debug!(level = %self.level, "logging initialized");
		}
	}
}
