mod bmp;
mod pattern;
mod session;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use presenter::{Event, Message, Ratio, Size, Time};
use presenter_native::Config;

use pattern::TestPattern;
use session::Session;

#[derive(Parser, Clone, Debug)]
#[command(name = "presenter", about = "Drive the video presenter with a test pattern")]
pub struct Cli {
	/// Load presenter settings from a TOML file. Flags take precedence.
	#[arg(long, env = "PRESENTER_CONFIG")]
	config: Option<PathBuf>,

	#[command(flatten)]
	presenter: Config,

	#[command(flatten)]
	log: presenter_native::Log,

	/// The size of the test pattern.
	#[arg(long, default_value = "640x360")]
	size: Size,

	/// The frame rate of the test pattern.
	#[arg(long, default_value_t = 30)]
	fps: u32,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
	/// Play the pattern against the system clock.
	Play {
		/// How much of the pattern to play.
		#[arg(long, default_value_t = 3.0)]
		seconds: f64,

		/// The playback rate. Negative plays in reverse.
		#[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
		rate: f32,
	},
	/// Scrub to a frame by stepping.
	Step {
		#[arg(long, default_value_t = 1)]
		frames: u32,
	},
	/// Show the first frame and save it as a BMP.
	Snapshot {
		#[arg(long, default_value = "snapshot.bmp")]
		output: PathBuf,
	},
}

impl Cli {
	/// Parse the command line, layering it over the config file if one was given.
	pub fn load_from<I, T>(args: I) -> anyhow::Result<Self>
	where
		I: IntoIterator<Item = T>,
		T: Into<OsString> + Clone,
	{
		let matches = Self::command().get_matches_from(args);
		let mut cli = Self::from_arg_matches(&matches)?;

		if let Some(path) = &cli.config {
			let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
			let mut config: Config = toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
			config.update_from_arg_matches(&matches)?;
			cli.presenter = config;
		}

		Ok(cli)
	}

	fn pattern(&self) -> anyhow::Result<TestPattern> {
		anyhow::ensure!(self.fps > 0, "fps must be positive");
		Ok(TestPattern::new(self.size, Ratio::new(self.fps, 1)))
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::load_from(std::env::args_os())?;
	cli.log.init();

	let cancel = Arc::new(AtomicBool::new(false));
	let mut task = tokio::task::spawn_blocking({
		let cancel = cancel.clone();
		move || run(cli, &cancel)
	});

	tokio::select! {
		res = &mut task => res.context("presenter task panicked")?,
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("interrupted, stopping");
			cancel.store(true, Ordering::Relaxed);
			task.await.context("presenter task panicked")?
		}
	}
}

fn run(cli: Cli, cancel: &AtomicBool) -> anyhow::Result<()> {
	let pattern = cli.pattern()?;

	match cli.command {
		Command::Play { seconds, rate } => play(cli.presenter, pattern, seconds, rate, cancel),
		Command::Step { frames } => step(cli.presenter, pattern, frames, cancel),
		Command::Snapshot { output } => snapshot(cli.presenter, pattern, output),
	}
}

fn play(config: Config, pattern: TestPattern, seconds: f64, rate: f32, cancel: &AtomicBool) -> anyhow::Result<()> {
	anyhow::ensure!(seconds > 0.0, "seconds must be positive");
	anyhow::ensure!(rate != 0.0, "use the step command to scrub");

	let frames = (seconds * 1_000_000.0 / pattern.interval().as_micros() as f64).ceil() as u64;
	let pattern = pattern.with_limit(frames);
	pattern.set_reverse(rate < 0.0);

	let session = Session::new(config, pattern)?;
	let presenter = &session.presenter;

	presenter.is_rate_supported(false, rate).context("unsupported rate")?;

	let start = match rate < 0.0 {
		true => session.pattern.duration().unwrap_or(Time::ZERO),
		false => Time::ZERO,
	};

	tracing::info!(frames, rate, %start, "playing");

	presenter.process_message(Message::BeginStreaming)?;
	session.clock.set_rate(rate)?;
	session.clock.start(Some(start))?;
	presenter.process_message(Message::ProcessInputNotify)?;
	presenter.process_message(Message::EndOfStream)?;

	let timeout = Duration::from_secs_f64(seconds / rate.abs() as f64) + Duration::from_secs(5);
	let complete = session.wait(timeout, cancel, |event| *event == Event::Complete)?;

	presenter.process_message(Message::EndStreaming)?;

	tracing::info!(complete, presented = session.presented(), "playback finished");
	session.close()
}

fn step(config: Config, pattern: TestPattern, frames: u32, cancel: &AtomicBool) -> anyhow::Result<()> {
	anyhow::ensure!(frames > 0, "frames must be positive");

	let session = Session::new(config, pattern)?;
	let presenter = &session.presenter;

	// Scrubbing presents every frame as soon as it is produced.
	session.clock.set_rate(0.0)?;
	session.clock.start(Some(Time::ZERO))?;

	presenter.process_message(Message::Step(frames))?;
	presenter.process_message(Message::ProcessInputNotify)?;

	let done = session.wait(Duration::from_secs(5), cancel, |event| {
		if let Event::ScrubTime(time) = event {
			tracing::info!(%time, "scrubbed");
		}
		matches!(event, Event::StepComplete { .. })
	})?;

	tracing::info!(done, state = ?presenter.frame_step_state(), "frame step finished");

	presenter.process_message(Message::CancelStep)?;
	session.close()
}

fn snapshot(config: Config, pattern: TestPattern, output: PathBuf) -> anyhow::Result<()> {
	let session = Session::new(config, pattern)?;
	let presenter = &session.presenter;

	// While stopped only the first frame is shown.
	presenter.process_message(Message::ProcessInputNotify)?;
	presenter.repaint_video().context("failed to repaint")?;

	let image = presenter.current_image().context("failed to read the render target")?;
	bmp::write(&output, &image)?;

	tracing::info!(
		path = %output.display(),
		width = image.header.width,
		height = image.header.height,
		"snapshot written"
	);

	session.close()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cli_defaults() {
		let cli = Cli::load_from(["presenter", "play"]).unwrap();
		assert_eq!(cli.size, Size::new(640, 360));
		assert_eq!(cli.fps, 30);
		assert_eq!(cli.presenter.buffers(), 3);
		assert!(matches!(cli.command, Command::Play { rate, .. } if rate == 1.0));
	}

	#[test]
	fn test_cli_negative_rate() {
		let cli = Cli::load_from(["presenter", "play", "--rate", "-2"]).unwrap();
		assert!(matches!(cli.command, Command::Play { rate, .. } if rate == -2.0));
	}

	#[test]
	fn test_config_file_under_flags() {
		let path = std::env::temp_dir().join(format!("presenter-cli-{}.toml", std::process::id()));
		std::fs::write(&path, "buffers = 4\nrefresh = 50\n").unwrap();

		let cli = Cli::load_from([
			OsString::from("presenter"),
			OsString::from("--config"),
			path.clone().into_os_string(),
			OsString::from("--refresh"),
			OsString::from("75"),
			OsString::from("snapshot"),
		])
		.unwrap();

		std::fs::remove_file(&path).unwrap();

		assert_eq!(cli.presenter.buffers(), 4);
		assert_eq!(cli.presenter.refresh(), 75);
	}

	#[test]
	fn test_snapshot() {
		let path = std::env::temp_dir().join(format!("presenter-snapshot-{}.bmp", std::process::id()));
		let pattern = TestPattern::new(Size::new(32, 16), Ratio::new(30, 1));

		snapshot(Config::default(), pattern, path.clone()).unwrap();

		let data = std::fs::read(&path).unwrap();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(&data[0..2], b"BM");
		assert_eq!(data.len(), 54 + 32 * 16 * 4);
	}

	#[test]
	fn test_step() {
		let pattern = TestPattern::new(Size::new(32, 16), Ratio::new(30, 1)).with_limit(10);
		let cancel = AtomicBool::new(false);
		step(Config::default(), pattern, 3, &cancel).unwrap();
	}

	#[test]
	fn test_play_short() {
		// 60Hz and 25fps allow up to double speed.
		let pattern = TestPattern::new(Size::new(32, 16), Ratio::new(25, 1));
		let cancel = AtomicBool::new(false);
		play(Config::default(), pattern, 0.2, 2.0, &cancel).unwrap();
	}

	#[test]
	fn test_play_rejects_scrubbing() {
		let pattern = TestPattern::new(Size::new(32, 16), Ratio::new(30, 1));
		let cancel = AtomicBool::new(false);
		assert!(play(Config::default(), pattern, 1.0, 0.0, &cancel).is_err());
	}
}
