use std::ffi::c_void;

use presenter::{
	DesiredTime, Error, Frame, Interlace, Mixer, NormalizedRect, PixelFormat, Ratio, Result, Time, VideoFormat,
};
use presenter_native::SoftwareSurface;

use crate::api::{VpDesiredTime, VpFormat, VpMixer};
use crate::ffi;

impl VpFormat {
	pub fn to_format(&self) -> VideoFormat {
		let mut format = VideoFormat::new(PixelFormat::from_code(self.pixel), self.width, self.height);

		let rate = Ratio::new(self.fps_num, self.fps_den);
		if rate.is_valid() {
			format.frame_rate = Some(rate);
		}

		let par = Ratio::new(self.par_num, self.par_den);
		if par.is_valid() {
			format.pixel_aspect = Some(par);
		}

		if self.interlaced {
			format.interlace = Interlace::Interlaced;
		}
		format.compressed = self.compressed;

		format
	}

	pub fn from_format(format: &VideoFormat) -> Self {
		let rate = format.frame_rate.unwrap_or(Ratio::new(0, 0));
		let par = format.pixel_aspect();

		Self {
			pixel: format.pixel.map(PixelFormat::code).unwrap_or_default(),
			width: format.size.width,
			height: format.size.height,
			fps_num: rate.num,
			fps_den: rate.den,
			par_num: par.num,
			par_den: par.den,
			interlaced: format.interlace != Interlace::Progressive,
			compressed: format.compressed,
		}
	}
}

/// A [Mixer] implemented by a table of C callbacks.
pub struct CMixer {
	table: VpMixer,
}

// SAFETY: The mixer is called from the presenter's threads.
// The C side MUST guarantee that user_data may be used from any thread
// and that the callbacks stay valid until the presenter is closed.
unsafe impl Send for CMixer {}
unsafe impl Sync for CMixer {}

impl CMixer {
	pub fn new(table: VpMixer) -> Self {
		Self { table }
	}

	fn user_data(&self) -> *mut c_void {
		self.table.user_data
	}
}

impl Mixer<SoftwareSurface> for CMixer {
	fn output_type(&self, index: usize) -> Result<VideoFormat> {
		let get_type = self.table.get_type.ok_or(Error::NoMoreTypes)?;
		let index = u32::try_from(index).map_err(|_| Error::NoMoreTypes)?;

		let mut format = VpFormat::default();
		ffi::parse_status(unsafe { get_type(self.user_data(), index, &mut format) })?;

		Ok(format.to_format())
	}

	fn set_output_type(&self, format: Option<&VideoFormat>, test_only: bool) -> Result<()> {
		let Some(set_type) = self.table.set_type else {
			return Ok(());
		};

		let format = format.map(VpFormat::from_format);
		let ptr = format.as_ref().map_or(std::ptr::null(), |format| format as *const VpFormat);

		ffi::parse_status(unsafe { set_type(self.user_data(), ptr, test_only) })
	}

	fn process_output(&self, frame: &mut Frame<SoftwareSurface>, desired: Option<DesiredTime>) -> Result<()> {
		let process_output = self.table.process_output.ok_or(Error::NeedMoreInput)?;

		let desired = desired.map(|desired| VpDesiredTime {
			time: desired.time.as_micros(),
			duration: desired.duration.as_micros(),
		});
		let desired_ptr = desired.as_ref().map_or(std::ptr::null(), |d| d as *const VpDesiredTime);

		let mut pts = -1i64;
		let mut duration = -1i64;

		let status = {
			let surface = frame.surface();
			let pitch = surface.pitch();
			let mut data = surface.lock();

			unsafe {
				process_output(
					self.user_data(),
					data.as_mut_ptr(),
					data.len(),
					pitch,
					desired_ptr,
					&mut pts,
					&mut duration,
				)
			}
		};
		ffi::parse_status(status)?;

		frame.set_time((pts >= 0).then(|| Time::from_micros(pts)));
		frame.set_duration((duration >= 0).then(|| Time::from_micros(duration)));

		Ok(())
	}

	fn set_zoom(&self, source: NormalizedRect) -> Result<()> {
		let Some(set_zoom) = self.table.set_zoom else {
			return Ok(());
		};

		ffi::parse_status(unsafe {
			set_zoom(self.user_data(), source.left, source.top, source.right, source.bottom)
		})
	}
}
