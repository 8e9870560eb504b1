use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use presenter::{DesiredTime, Error, Frame, Mixer, PixelFormat, Ratio, Result, Size, Time, VideoFormat};
use presenter_native::SoftwareSurface;

// White, yellow, cyan, green, magenta, red, blue, black.
const BARS: [[u8; 3]; 8] = [
	[255, 255, 255],
	[255, 255, 0],
	[0, 255, 255],
	[0, 255, 0],
	[255, 0, 255],
	[255, 0, 0],
	[0, 0, 255],
	[0, 0, 0],
];

/// A mixer producing colour bars with a sweeping white line.
///
/// It offers RGB32 first and NV12 second, so negotiation has a choice to make.
pub struct TestPattern {
	size: Size,
	rate: Ratio,
	frames: Option<u64>,
	reverse: AtomicBool,
	next: AtomicU64,
	format: Mutex<Option<VideoFormat>>,
}

impl TestPattern {
	pub fn new(size: Size, rate: Ratio) -> Self {
		Self {
			size,
			rate,
			frames: None,
			reverse: AtomicBool::new(false),
			next: AtomicU64::new(0),
			format: Mutex::new(None),
		}
	}

	/// Stop after this many frames.
	pub fn with_limit(mut self, frames: u64) -> Self {
		self.frames = Some(frames);
		self
	}

	/// Produce frames last to first. Requires a limit.
	pub fn set_reverse(&self, reverse: bool) {
		self.reverse.store(reverse, Ordering::Relaxed);
	}

	pub fn interval(&self) -> Time {
		Time::from_timescale(self.rate.den as i64, self.rate.num as u64)
	}

	/// The presentation time just past the last frame, if limited.
	pub fn duration(&self) -> Option<Time> {
		Some(Time::from_micros(self.interval().as_micros() * self.frames? as i64))
	}

	fn format(&self, pixel: PixelFormat) -> VideoFormat {
		VideoFormat::new(pixel, self.size.width, self.size.height).with_frame_rate(self.rate)
	}

	fn index(&self, count: u64) -> Option<u64> {
		match (self.frames, self.reverse.load(Ordering::Relaxed)) {
			(Some(frames), _) if count >= frames => None,
			(Some(frames), true) => Some(frames - 1 - count),
			_ => Some(count),
		}
	}
}

impl Mixer<SoftwareSurface> for TestPattern {
	fn output_type(&self, index: usize) -> Result<VideoFormat> {
		match index {
			0 => Ok(self.format(PixelFormat::X8r8g8b8)),
			1 => Ok(self.format(PixelFormat::Nv12)),
			_ => Err(Error::NoMoreTypes),
		}
	}

	fn set_output_type(&self, format: Option<&VideoFormat>, test_only: bool) -> Result<()> {
		if let Some(format) = format {
			if !matches!(format.pixel, Some(PixelFormat::X8r8g8b8 | PixelFormat::Nv12)) || format.size != self.size {
				return Err(Error::InvalidType);
			}
		}

		if !test_only {
			tracing::debug!(pixel = ?format.and_then(|f| f.pixel), "test pattern format");
			*self.format.lock() = format.cloned();
		}

		Ok(())
	}

	fn process_output(&self, frame: &mut Frame<SoftwareSurface>, desired: Option<DesiredTime>) -> Result<()> {
		let pixel = self.format.lock().as_ref().and_then(|f| f.pixel).ok_or(Error::TypeNotSet)?;
		let interval = self.interval();

		let index = match desired {
			Some(desired) => (desired.time.as_micros() / interval.as_micros().max(1)).max(0) as u64,
			None => {
				let count = self.next.fetch_add(1, Ordering::Relaxed);
				match self.index(count) {
					Some(index) => index,
					None => {
						self.next.fetch_sub(1, Ordering::Relaxed);
						return Err(Error::NeedMoreInput);
					}
				}
			}
		};

		draw(frame.surface(), pixel, index);

		frame.set_time(Some(Time::from_micros(interval.as_micros() * index as i64)));
		frame.set_duration(Some(interval));

		Ok(())
	}
}

fn rgb(size: Size, index: u64, x: u32, y: u32) -> [u8; 3] {
	let line = (index * 4 % size.width.max(1) as u64) as u32;
	if x.abs_diff(line) < 2 && y < size.height * 3 / 4 {
		return [255, 255, 255];
	}

	let bar = (x as usize * BARS.len()) / size.width.max(1) as usize;
	BARS[bar.min(BARS.len() - 1)]
}

fn draw(surface: &SoftwareSurface, pixel: PixelFormat, index: u64) {
	let size = surface.size();
	let (w, h) = (size.width as usize, size.height as usize);
	let mut data = surface.lock();

	match pixel {
		PixelFormat::Nv12 => {
			let chroma = w.div_ceil(2) * 2;
			for y in 0..h {
				for x in 0..w {
					let [r, g, b] = rgb(size, index, x as u32, y as u32);
					let (luma, u, v) = rgb_to_yuv(r, g, b);
					data[y * w + x] = luma;

					if x % 2 == 0 && y % 2 == 0 {
						let i = w * h + (y / 2) * chroma + x;
						data[i] = u;
						data[i + 1] = v;
					}
				}
			}
		}
		_ => {
			for y in 0..h {
				for x in 0..w {
					let [r, g, b] = rgb(size, index, x as u32, y as u32);
					let i = (y * w + x) * 4;
					data[i..i + 4].copy_from_slice(&[b, g, r, 0xff]);
				}
			}
		}
	}
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
	let (r, g, b) = (r as i32, g as i32, b as i32);
	let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
	let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
	let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
	(y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}
