//! A render backend that does everything on the CPU.
//!
//! Frames live in plain byte buffers and are converted to BGRA when copied to
//! the render target, using BT.601 limited-range coefficients.

use parking_lot::{Mutex, MutexGuard};
use presenter::{
	Device, DeviceHealth, DisplayMode, Error, PixelFormat, Result, Size, SurfaceData, WindowHandle,
};

/// A frame buffer in system memory, tightly packed.
pub struct SoftwareSurface {
	size: Size,
	pixel: PixelFormat,
	data: Mutex<Vec<u8>>,
}

impl SoftwareSurface {
	pub fn size(&self) -> Size {
		self.size
	}

	pub fn pixel(&self) -> PixelFormat {
		self.pixel
	}

	/// Bytes per row of the first plane.
	pub fn pitch(&self) -> usize {
		let width = self.size.width as usize;
		match self.pixel {
			PixelFormat::Nv12 | PixelFormat::Yv12 => width,
			PixelFormat::Yuy2 | PixelFormat::Uyvy | PixelFormat::R5g6b5 => width * 2,
			PixelFormat::R8g8b8 => width * 3,
			_ => width * 4,
		}
	}

	/// Lock the pixels for reading or writing.
	pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
		self.data.lock()
	}

	/// Replace the pixels. The length must match the surface exactly.
	pub fn write(&self, src: &[u8]) -> Result<()> {
		let mut data = self.data.lock();
		if src.len() != data.len() {
			return Err(Error::InvalidArgument);
		}

		data.copy_from_slice(src);
		Ok(())
	}
}

/// A [Device] backed by system memory.
///
/// It never loses its device, so hosts without a GPU can drive the presenter end to end.
pub struct SoftwareDevice {
	mode: DisplayMode,
	window: Mutex<Option<WindowHandle>>,
}

impl Default for SoftwareDevice {
	fn default() -> Self {
		Self::new(Size::new(1920, 1080), 60)
	}
}

impl SoftwareDevice {
	pub fn new(display: Size, refresh_rate: u32) -> Self {
		Self {
			mode: DisplayMode {
				size: display,
				refresh_rate,
				format: PixelFormat::X8r8g8b8,
			},
			window: Mutex::new(None),
		}
	}

	/// The window the device was last created for.
	pub fn window(&self) -> Option<WindowHandle> {
		*self.window.lock()
	}
}

impl Device for SoftwareDevice {
	type Surface = SoftwareSurface;

	fn recreate(&self, window: Option<WindowHandle>) -> Result<()> {
		*self.window.lock() = window;
		tracing::debug!(?window, "software device created");
		Ok(())
	}

	fn display_mode(&self) -> Result<DisplayMode> {
		Ok(self.mode)
	}

	fn check_format(&self, pixel: PixelFormat) -> Result<()> {
		match pixel {
			PixelFormat::Nv12
			| PixelFormat::Yv12
			| PixelFormat::Yuy2
			| PixelFormat::Uyvy
			| PixelFormat::X8r8g8b8
			| PixelFormat::A8r8g8b8 => Ok(()),
			_ => Err(Error::InvalidType),
		}
	}

	fn create_surface(&self, width: u32, height: u32, pixel: PixelFormat) -> Result<SoftwareSurface> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidArgument);
		}

		let len = pixel.frame_len(width, height).ok_or(Error::InvalidType)?;

		Ok(SoftwareSurface {
			size: Size::new(width, height),
			pixel,
			data: Mutex::new(vec![0; len]),
		})
	}

	fn fill_black(&self, surface: &SoftwareSurface) -> Result<()> {
		let mut data = surface.data.lock();
		let Size { width, height } = surface.size;

		match surface.pixel {
			PixelFormat::X8r8g8b8 | PixelFormat::A8r8g8b8 => {
				for pixel in data.chunks_exact_mut(4) {
					pixel.copy_from_slice(&[0, 0, 0, 0xff]);
				}
			}
			PixelFormat::Yuy2 => {
				for pair in data.chunks_exact_mut(4) {
					pair.copy_from_slice(&[16, 128, 16, 128]);
				}
			}
			PixelFormat::Uyvy => {
				for pair in data.chunks_exact_mut(4) {
					pair.copy_from_slice(&[128, 16, 128, 16]);
				}
			}
			PixelFormat::Nv12 | PixelFormat::Yv12 => {
				let luma = width as usize * height as usize;
				data[..luma].fill(16);
				data[luma..].fill(128);
			}
			_ => data.fill(0),
		}

		Ok(())
	}

	fn copy(&self, src: &SoftwareSurface, dst: &SoftwareSurface) -> Result<()> {
		if std::ptr::eq(src, dst) {
			return Ok(());
		}

		if !matches!(dst.pixel, PixelFormat::X8r8g8b8 | PixelFormat::A8r8g8b8) {
			return Err(Error::InvalidType);
		}

		let input = src.data.lock();
		let mut output = dst.data.lock();

		let (sw, sh) = (src.size.width as usize, src.size.height as usize);
		let (dw, dh) = (dst.size.width as usize, dst.size.height as usize);

		// Nearest neighbour when the sizes differ.
		for y in 0..dh {
			let sy = y * sh / dh;
			for x in 0..dw {
				let sx = x * sw / dw;
				let bgra = sample(src.pixel, &input, src.size, sx, sy).ok_or(Error::InvalidType)?;
				let i = (y * dw + x) * 4;
				output[i..i + 4].copy_from_slice(&bgra);
			}
		}

		Ok(())
	}

	fn read_back(&self, surface: &SoftwareSurface) -> Result<SurfaceData> {
		if !matches!(surface.pixel, PixelFormat::X8r8g8b8 | PixelFormat::A8r8g8b8) {
			return Err(Error::InvalidType);
		}

		Ok(SurfaceData {
			width: surface.size.width,
			height: surface.size.height,
			pitch: surface.pitch(),
			data: surface.data.lock().clone(),
		})
	}

	fn check_state(&self, _window: Option<WindowHandle>) -> DeviceHealth {
		DeviceHealth::Ok
	}
}

/// Read the pixel at (x, y) as BGRA.
fn sample(pixel: PixelFormat, data: &[u8], size: Size, x: usize, y: usize) -> Option<[u8; 4]> {
	let (w, h) = (size.width as usize, size.height as usize);
	let at = |i: usize| data.get(i).copied();

	match pixel {
		PixelFormat::X8r8g8b8 => {
			let i = (y * w + x) * 4;
			Some([at(i)?, at(i + 1)?, at(i + 2)?, 0xff])
		}
		PixelFormat::A8r8g8b8 => {
			let i = (y * w + x) * 4;
			Some([at(i)?, at(i + 1)?, at(i + 2)?, at(i + 3)?])
		}
		PixelFormat::R8g8b8 => {
			let i = (y * w + x) * 3;
			Some([at(i)?, at(i + 1)?, at(i + 2)?, 0xff])
		}
		PixelFormat::R5g6b5 => {
			let i = (y * w + x) * 2;
			let v = u16::from_le_bytes([at(i)?, at(i + 1)?]);
			let r = ((v >> 11) & 0x1f) as u8;
			let g = ((v >> 5) & 0x3f) as u8;
			let b = (v & 0x1f) as u8;
			Some([b << 3 | b >> 2, g << 2 | g >> 4, r << 3 | r >> 2, 0xff])
		}
		PixelFormat::Yuy2 => {
			let i = (y * w + (x & !1)) * 2;
			let luma = at(i + (x & 1) * 2)?;
			Some(yuv_to_bgra(luma, at(i + 1)?, at(i + 3)?))
		}
		PixelFormat::Uyvy => {
			let i = (y * w + (x & !1)) * 2;
			let luma = at(i + 1 + (x & 1) * 2)?;
			Some(yuv_to_bgra(luma, at(i)?, at(i + 2)?))
		}
		PixelFormat::Nv12 => {
			let chroma = w.div_ceil(2);
			let i = w * h + (y / 2) * chroma * 2 + (x / 2) * 2;
			Some(yuv_to_bgra(at(y * w + x)?, at(i)?, at(i + 1)?))
		}
		PixelFormat::Yv12 => {
			let chroma = w.div_ceil(2);
			let plane = chroma * h.div_ceil(2);
			let i = (y / 2) * chroma + x / 2;
			let v = at(w * h + i)?;
			let u = at(w * h + plane + i)?;
			Some(yuv_to_bgra(at(y * w + x)?, u, v))
		}
		PixelFormat::Other(_) => None,
	}
}

fn yuv_to_bgra(y: u8, u: u8, v: u8) -> [u8; 4] {
	let c = y as i32 - 16;
	let d = u as i32 - 128;
	let e = v as i32 - 128;

	let clamp = |v: i32| ((v + 128) >> 8).clamp(0, 255) as u8;

	let r = clamp(298 * c + 409 * e);
	let g = clamp(298 * c - 100 * d - 208 * e);
	let b = clamp(298 * c + 516 * d);

	[b, g, r, 0xff]
}
