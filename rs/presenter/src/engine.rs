use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Error, Frame, PixelFormat, Result, Size, VideoFormat};

/// An opaque handle to the host window frames are shown in.
pub type WindowHandle = u64;

/// The fewest frame buffers the engine will allocate.
pub const MIN_BUFFER_COUNT: usize = 3;

/// The raw health of a device as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
	Ok,
	Lost,
	Hung,
	Removed,
	/// The window went away; not a device problem.
	WindowInvalid,
}

/// The health of the device after the engine has reacted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
	Ok,
	/// The device was lost and has been recreated; frame buffers and the render target must be reallocated.
	Reset,
	/// The device is gone for good.
	Removed,
}

/// The mode of the display the device renders to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMode {
	pub size: Size,
	/// Refresh rate in Hz, or zero when unknown.
	pub refresh_rate: u32,
	pub format: PixelFormat,
}

/// The pixels of a surface as read back by the device: 32 bits per pixel, top row first.
#[derive(Debug, Clone)]
pub struct SurfaceData {
	pub width: u32,
	pub height: u32,
	/// Bytes per row, at least `width * 4`.
	pub pitch: usize,
	pub data: Vec<u8>,
}

/// A graphics backend.
pub trait Device: Send + Sync + 'static {
	type Surface: Send + Sync + 'static;

	/// Create the device again, optionally bound to a window.
	fn recreate(&self, window: Option<WindowHandle>) -> Result<()>;

	fn display_mode(&self) -> Result<DisplayMode>;

	/// Check the pixel format can be used as a back buffer format.
	fn check_format(&self, pixel: PixelFormat) -> Result<()>;

	fn create_surface(&self, width: u32, height: u32, pixel: PixelFormat) -> Result<Self::Surface>;

	fn fill_black(&self, surface: &Self::Surface) -> Result<()>;

	/// Copy `src` into `dst`, converting and scaling as needed.
	fn copy(&self, src: &Self::Surface, dst: &Self::Surface) -> Result<()>;

	fn read_back(&self, surface: &Self::Surface) -> Result<SurfaceData>;

	fn check_state(&self, window: Option<WindowHandle>) -> DeviceHealth;
}

/// Called with the render target whenever a frame was presented.
pub type FrameCallback<S> = Box<dyn Fn(&S) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapHeader {
	pub width: u32,
	pub height: u32,
	pub planes: u16,
	pub bit_count: u16,
	pub compressed: bool,
	/// The size of the pixel data in bytes.
	pub size_image: u32,
}

/// A snapshot of the render target.
#[derive(Debug, Clone)]
pub struct Bitmap {
	pub header: BitmapHeader,
	/// Packed 32-bit pixels, top row first.
	pub data: Vec<u8>,
}

struct EngineState<S> {
	buffers: usize,
	window: Option<WindowHandle>,
	target: Option<Arc<S>>,
}

/// Owns the device, allocates frame buffers and presents frames to the render target.
pub struct RenderEngine<D: Device> {
	device: D,
	state: Mutex<EngineState<D::Surface>>,
	callback: Mutex<Option<Arc<FrameCallback<D::Surface>>>>,
}

impl<D: Device> RenderEngine<D> {
	pub fn new(device: D) -> Self {
		Self {
			device,
			state: Mutex::new(EngineState {
				buffers: MIN_BUFFER_COUNT,
				window: None,
				target: None,
			}),
			callback: Mutex::new(None),
		}
	}

	pub fn device(&self) -> &D {
		&self.device
	}

	/// Set how many frame buffers the next [Self::create_frames] allocates.
	pub fn set_buffer_count(&self, count: usize) -> Result<()> {
		if count < MIN_BUFFER_COUNT {
			return Err(Error::InvalidArgument);
		}

		self.state.lock().buffers = count;
		Ok(())
	}

	pub fn buffer_count(&self) -> usize {
		self.state.lock().buffers
	}

	/// Replace the frame-ready callback, or clear it with `None`.
	pub fn register_callback(&self, callback: Option<FrameCallback<D::Surface>>) {
		*self.callback.lock() = callback.map(Arc::new);
	}

	/// Bind the device to a new window, recreating it.
	pub fn set_video_window(&self, window: Option<WindowHandle>) -> Result<()> {
		let mut state = self.state.lock();
		self.device.recreate(window)?;

		state.window = window;
		state.target = None;

		tracing::debug!(?window, "video window changed");

		Ok(())
	}

	pub fn video_window(&self) -> Option<WindowHandle> {
		self.state.lock().window
	}

	pub fn display_size(&self) -> Result<Size> {
		Ok(self.device.display_mode()?.size)
	}

	pub fn refresh_rate(&self) -> Result<u32> {
		Ok(self.device.display_mode()?.refresh_rate)
	}

	pub fn check_format(&self, pixel: PixelFormat) -> Result<()> {
		self.device.check_format(pixel)
	}

	/// Allocate frame buffers for a format, along with a black render target.
	///
	/// Any previous render target is released first.
	pub fn create_frames(&self, format: &VideoFormat) -> Result<Vec<Frame<D::Surface>>> {
		let mut state = self.state.lock();
		if state.window.is_none() {
			return Err(Error::InvalidRequest);
		}

		let pixel = format.pixel.ok_or(Error::InvalidType)?;
		let Size { width, height } = format.size;

		state.target = None;

		let mut frames = Vec::with_capacity(state.buffers);
		for _ in 0..state.buffers {
			let surface = self.device.create_surface(width, height, pixel)?;
			frames.push(Frame::new(surface));
		}

		let target = self.device.create_surface(width, height, PixelFormat::X8r8g8b8)?;
		self.device.fill_black(&target)?;
		state.target = Some(Arc::new(target));

		tracing::debug!(width, height, %pixel, count = frames.len(), "created frames");

		Ok(frames)
	}

	/// Drop the render target.
	pub fn release_resources(&self) {
		self.state.lock().target = None;
	}

	/// Query the device, recreating it when it was lost or hung.
	///
	/// A recreated device drops the render target until [Self::create_frames] runs again.
	pub fn check_device_state(&self) -> Result<DeviceState> {
		let mut state = self.state.lock();

		match self.device.check_state(state.window) {
			DeviceHealth::Ok | DeviceHealth::WindowInvalid => Ok(DeviceState::Ok),
			health @ (DeviceHealth::Lost | DeviceHealth::Hung) => {
				tracing::warn!(?health, "recreating device");
				self.device.recreate(state.window)?;
				state.target = None;
				Ok(DeviceState::Reset)
			}
			DeviceHealth::Removed => Ok(DeviceState::Removed),
		}
	}

	/// Copy the frame into the render target and run the frame-ready callback.
	///
	/// Without a render target this does nothing. A failed copy is logged and skips the callback.
	pub fn present(&self, frame: &Frame<D::Surface>) -> Result<()> {
		let Some(target) = self.state.lock().target.clone() else {
			tracing::trace!(id = frame.id(), "no render target");
			return Ok(());
		};

		if let Err(err) = self.device.copy(frame.surface(), &target) {
			tracing::warn!(%err, id = frame.id(), "failed to copy frame");
			return Ok(());
		}

		tracing::trace!(id = frame.id(), time = ?frame.time(), "presented");

		let callback = self.callback.lock().clone();
		if let Some(callback) = callback {
			callback(&target);
		}

		Ok(())
	}

	/// Read back the render target as a packed 32-bit bitmap.
	pub fn current_image(&self) -> Result<Bitmap> {
		let target = self.state.lock().target.clone().ok_or(Error::Shutdown)?;
		let surface = self.device.read_back(&target)?;

		let row = surface.width as usize * 4;
		if surface.pitch < row || surface.data.len() < surface.pitch * surface.height as usize {
			return Err(Error::Device("read back buffer too small".into()));
		}

		let mut data = Vec::with_capacity(row * surface.height as usize);
		for line in surface.data.chunks(surface.pitch).take(surface.height as usize) {
			data.extend_from_slice(&line[..row]);
		}

		let size_image = u32::try_from(data.len()).map_err(|_| Error::OutOfMemory)?;

		Ok(Bitmap {
			header: BitmapHeader {
				width: surface.width,
				height: surface.height,
				planes: 1,
				bit_count: 32,
				compressed: false,
				size_image,
			},
			data,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::test::{FakeDevice, FakeSurface};

	fn engine() -> RenderEngine<FakeDevice> {
		let engine = RenderEngine::new(FakeDevice::default());
		engine.set_video_window(Some(1)).unwrap();
		engine
	}

	#[test]
	fn test_buffer_count() {
		let engine = engine();
		assert_eq!(engine.buffer_count(), 3);
		assert_eq!(engine.set_buffer_count(2), Err(Error::InvalidArgument));
		engine.set_buffer_count(5).unwrap();
		assert_eq!(engine.buffer_count(), 5);
	}

	#[test]
	fn test_create_frames_requires_window() {
		let engine = RenderEngine::new(FakeDevice::default());
		let format = VideoFormat::new(PixelFormat::Nv12, 64, 32);
		assert_eq!(engine.create_frames(&format).unwrap_err(), Error::InvalidRequest);
	}

	#[test]
	fn test_create_frames() {
		let engine = engine();
		engine.set_buffer_count(4).unwrap();

		let frames = engine.create_frames(&VideoFormat::new(PixelFormat::Nv12, 64, 32)).unwrap();
		assert_eq!(frames.len(), 4);
		assert_eq!(frames[0].surface().pixel, PixelFormat::Nv12);
		assert_eq!(frames[0].surface().size, Size::new(64, 32));

		// The render target starts black.
		let image = engine.current_image().unwrap();
		assert!(image.data.iter().all(|&b| b == 0));
	}

	#[test]
	fn test_present_runs_callback() {
		let engine = engine();
		let frames = engine.create_frames(&VideoFormat::new(PixelFormat::X8r8g8b8, 4, 2)).unwrap();

		let seen = Arc::new(Mutex::new(Vec::new()));
		let record = seen.clone();
		engine.register_callback(Some(Box::new(move |target: &FakeSurface| {
			record.lock().push(target.value());
		})));

		frames[0].surface().set_value(0x11223344);
		engine.present(&frames[0]).unwrap();
		assert_eq!(*seen.lock(), vec![0x11223344]);

		// A failed copy skips the callback.
		engine.device().fail_copy(true);
		engine.present(&frames[1]).unwrap();
		assert_eq!(seen.lock().len(), 1);

		engine.device().fail_copy(false);
		engine.register_callback(None);
		engine.present(&frames[1]).unwrap();
		assert_eq!(seen.lock().len(), 1);
	}

	#[test]
	fn test_present_without_target() {
		let engine = engine();
		let frames = engine.create_frames(&VideoFormat::new(PixelFormat::Nv12, 4, 2)).unwrap();
		engine.release_resources();

		engine.present(&frames[0]).unwrap();
		assert_eq!(engine.current_image().unwrap_err(), Error::Shutdown);
	}

	#[test]
	fn test_current_image() {
		let engine = engine();
		let frames = engine.create_frames(&VideoFormat::new(PixelFormat::X8r8g8b8, 3, 2)).unwrap();
		frames[0].surface().set_value(0x01020304);
		engine.present(&frames[0]).unwrap();

		let image = engine.current_image().unwrap();
		assert_eq!(
			image.header,
			BitmapHeader {
				width: 3,
				height: 2,
				planes: 1,
				bit_count: 32,
				compressed: false,
				size_image: 24,
			}
		);
		assert_eq!(&image.data[..4], &0x01020304u32.to_le_bytes());
	}

	#[test]
	fn test_device_state() {
		let engine = engine();
		engine.create_frames(&VideoFormat::new(PixelFormat::Nv12, 4, 2)).unwrap();
		assert_eq!(engine.check_device_state().unwrap(), DeviceState::Ok);

		engine.device().set_health(DeviceHealth::WindowInvalid);
		assert_eq!(engine.check_device_state().unwrap(), DeviceState::Ok);

		let recreated = engine.device().recreated();
		engine.device().set_health(DeviceHealth::Hung);
		assert_eq!(engine.check_device_state().unwrap(), DeviceState::Reset);
		assert_eq!(engine.device().recreated(), recreated + 1);

		// The render target belonged to the old device.
		assert_eq!(engine.current_image().unwrap_err(), Error::Shutdown);

		engine.device().set_health(DeviceHealth::Removed);
		assert_eq!(engine.check_device_state().unwrap(), DeviceState::Removed);
	}

	#[test]
	fn test_display() {
		let engine = engine();
		assert_eq!(engine.display_size().unwrap(), Size::new(1920, 1080));
		assert_eq!(engine.refresh_rate().unwrap(), 60);
		assert_eq!(engine.video_window(), Some(1));
	}
}
