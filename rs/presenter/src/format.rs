//! Video format description and the negotiation helpers built on it.
//!
//! A [VideoFormat] is what the mixer proposes and what the presenter commits.
//! The helpers here pick the display area, correct for the pixel aspect ratio
//! and derive the "optimal" variant the presenter asks the mixer for.

use std::str::FromStr;

use crate::{Error, Result};

/// The broad category of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MajorType {
	#[default]
	Video,
	Audio,
	Other,
}

/// The layout of a surface in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
	/// 8-bit Y plane followed by an interleaved UV plane at quarter resolution.
	Nv12,
	/// 8-bit Y plane followed by V and U planes at quarter resolution.
	Yv12,
	/// Packed 4:2:2, Y0 U Y1 V.
	Yuy2,
	/// Packed 4:2:2, U Y0 V Y1.
	Uyvy,
	/// 32-bit BGRX, the native display format.
	X8r8g8b8,
	/// 32-bit BGRA.
	A8r8g8b8,
	/// 24-bit BGR.
	R8g8b8,
	/// 16-bit 5:6:5.
	R5g6b5,
	/// Any other FourCC.
	Other(u32),
}

const fn fourcc(code: &[u8; 4]) -> u32 {
	(code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

impl PixelFormat {
	/// A fixed preference score used to pick between acceptable formats.
	///
	/// Planar and semi-planar YUV beat packed YUV, which beats 32-bit RGB.
	/// Legacy RGB layouts are never preferred.
	pub fn merit(self) -> i64 {
		match self {
			Self::Nv12 => 90_000_000,
			Self::Yv12 => 80_000_000,
			Self::Yuy2 => 70_000_000,
			Self::Uyvy => 60_000_000,
			Self::X8r8g8b8 => 1102,
			Self::A8r8g8b8 => 1101,
			Self::R8g8b8 | Self::R5g6b5 => 0,
			Self::Other(_) => 1000,
		}
	}

	/// The FourCC or legacy format code identifying this layout.
	pub fn code(self) -> u32 {
		match self {
			Self::Nv12 => fourcc(b"NV12"),
			Self::Yv12 => fourcc(b"YV12"),
			Self::Yuy2 => fourcc(b"YUY2"),
			Self::Uyvy => fourcc(b"UYVY"),
			Self::X8r8g8b8 => 22,
			Self::A8r8g8b8 => 21,
			Self::R8g8b8 => 20,
			Self::R5g6b5 => 23,
			Self::Other(code) => code,
		}
	}

	pub fn from_code(code: u32) -> Self {
		match code {
			c if c == fourcc(b"NV12") => Self::Nv12,
			c if c == fourcc(b"YV12") => Self::Yv12,
			c if c == fourcc(b"YUY2") => Self::Yuy2,
			c if c == fourcc(b"UYVY") => Self::Uyvy,
			22 => Self::X8r8g8b8,
			21 => Self::A8r8g8b8,
			20 => Self::R8g8b8,
			23 => Self::R5g6b5,
			other => Self::Other(other),
		}
	}

	/// The number of bytes needed for a frame of this format, if the layout is known.
	pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
		let (w, h) = (width as usize, height as usize);
		match self {
			Self::Nv12 | Self::Yv12 => Some(w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))),
			Self::Yuy2 | Self::Uyvy | Self::R5g6b5 => Some(w * h * 2),
			Self::R8g8b8 => Some(w * h * 3),
			Self::X8r8g8b8 | Self::A8r8g8b8 => Some(w * h * 4),
			Self::Other(_) => None,
		}
	}
}

impl std::fmt::Display for PixelFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Nv12 => write!(f, "NV12"),
			Self::Yv12 => write!(f, "YV12"),
			Self::Yuy2 => write!(f, "YUY2"),
			Self::Uyvy => write!(f, "UYVY"),
			Self::X8r8g8b8 => write!(f, "X8R8G8B8"),
			Self::A8r8g8b8 => write!(f, "A8R8G8B8"),
			Self::R8g8b8 => write!(f, "R8G8B8"),
			Self::R5g6b5 => write!(f, "R5G6B5"),
			Self::Other(code) => write!(f, "0x{code:08x}"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interlace {
	#[default]
	Progressive,
	Interlaced,
	Unknown,
}

/// A rational number, used for frame rates and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ratio {
	pub num: u32,
	pub den: u32,
}

impl Ratio {
	pub const fn new(num: u32, den: u32) -> Self {
		Self { num, den }
	}

	/// Both parts are non-zero.
	pub fn is_valid(&self) -> bool {
		self.num != 0 && self.den != 0
	}
}

/// The frame rate assumed when a format does not carry one.
pub const DEFAULT_FRAME_RATE: Ratio = Ratio::new(30, 1);

/// A size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
	pub width: u32,
	pub height: u32,
}

impl Size {
	pub const fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}
}

impl FromStr for Size {
	type Err = Error;

	/// Parses `WIDTHxHEIGHT`.
	fn from_str(s: &str) -> Result<Self> {
		let (width, height) = s.split_once(['x', 'X']).ok_or(Error::InvalidArgument)?;
		let width = width.trim().parse().map_err(|_| Error::InvalidArgument)?;
		let height = height.trim().parse().map_err(|_| Error::InvalidArgument)?;
		Ok(Self { width, height })
	}
}

impl std::fmt::Display for Size {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}x{}", self.width, self.height)
	}
}

/// A rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
	pub left: i32,
	pub top: i32,
	pub right: i32,
	pub bottom: i32,
}

impl Rect {
	pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
		Self {
			left,
			top,
			right,
			bottom,
		}
	}

	pub fn width(&self) -> i32 {
		self.right - self.left
	}

	pub fn height(&self) -> i32 {
		self.bottom - self.top
	}
}

/// A rectangle relative to the frame, where the full frame is 0,0 to 1,1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
	pub left: f32,
	pub top: f32,
	pub right: f32,
	pub bottom: f32,
}

impl NormalizedRect {
	pub const FULL: Self = Self::new(0.0, 0.0, 1.0, 1.0);

	pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
		Self {
			left,
			top,
			right,
			bottom,
		}
	}

	/// The rectangle is not flipped and lies within the frame.
	pub fn validate(&self) -> Result<()> {
		if self.left > self.right || self.top > self.bottom {
			return Err(Error::InvalidArgument);
		}

		if self.left < 0.0 || self.right > 1.0 || self.top < 0.0 || self.bottom > 1.0 {
			return Err(Error::InvalidArgument);
		}

		Ok(())
	}
}

impl Default for NormalizedRect {
	fn default() -> Self {
		Self::FULL
	}
}

/// A region of the frame with a fractional offset, ex. a cropping aperture.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Area {
	pub x: f32,
	pub y: f32,
	pub width: u32,
	pub height: u32,
}

impl Area {
	pub const fn new(x: f32, y: f32, width: u32, height: u32) -> Self {
		Self { x, y, width, height }
	}

	/// Returns an error if the area extends past a frame of the given size.
	pub fn validate(&self, size: Size) -> Result<()> {
		let right = self.x as i64 + self.width as i64;
		let bottom = self.y as i64 + self.height as i64;

		if right > size.width as i64 || bottom > size.height as i64 {
			return Err(Error::InvalidType);
		}

		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transfer {
	#[default]
	Unknown,
	Bt709,
	Srgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Primaries {
	#[default]
	Unknown,
	Bt709,
	Bt601,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NominalRange {
	#[default]
	Unknown,
	/// 0-255
	Full,
	/// 16-235
	Limited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lighting {
	#[default]
	Unknown,
	Bright,
	Office,
	Dim,
	Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
	pub transfer: Transfer,
	pub primaries: Primaries,
	pub range: NominalRange,
	pub lighting: Lighting,
}

/// A hint about the picture shape the source was authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentHint {
	#[default]
	None,
	/// 16:9 content letterboxed in 4:3.
	Wide16x9,
	/// 2.35:1 content letterboxed in 16:9 or 4:3.
	Wide235x1,
}

/// An uncompressed video format as proposed by the mixer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoFormat {
	pub major: MajorType,
	pub pixel: Option<PixelFormat>,
	pub compressed: bool,
	pub interlace: Interlace,
	pub size: Size,
	pub frame_rate: Option<Ratio>,
	pub pixel_aspect: Option<Ratio>,

	/// The picture aspect ratio from a legacy header, used when there is no content hint.
	pub picture_aspect: Option<Ratio>,
	pub content_hint: ContentHint,

	pub geometric_aperture: Option<Area>,
	pub min_display_aperture: Option<Area>,
	pub pan_scan_aperture: Option<Area>,
	pub pan_scan: bool,

	pub color: Color,
}

impl VideoFormat {
	/// A progressive, uncompressed video format.
	pub fn new(pixel: PixelFormat, width: u32, height: u32) -> Self {
		Self {
			major: MajorType::Video,
			pixel: Some(pixel),
			size: Size::new(width, height),
			..Default::default()
		}
	}

	pub fn with_frame_rate(mut self, rate: Ratio) -> Self {
		self.frame_rate = Some(rate);
		self
	}

	pub fn with_pixel_aspect(mut self, par: Ratio) -> Self {
		self.pixel_aspect = Some(par);
		self
	}

	/// The pixel aspect ratio, defaulting to square pixels.
	pub fn pixel_aspect(&self) -> Ratio {
		match self.pixel_aspect {
			Some(par) if par.is_valid() => par,
			_ => Ratio::new(1, 1),
		}
	}

	/// The frame rate when it is known and non-zero.
	pub fn valid_frame_rate(&self) -> Option<Ratio> {
		self.frame_rate.filter(Ratio::is_valid)
	}

	/// The picture aspect ratio, or 0x0 when unknown.
	pub fn aspect_ratio(&self) -> Size {
		match self.content_hint {
			ContentHint::Wide16x9 => Size::new(16, 9),
			ContentHint::Wide235x1 => Size::new(47, 20),
			ContentHint::None => match self.picture_aspect {
				Some(ratio) => Size::new(ratio.num, ratio.den),
				None => Size::default(),
			},
		}
	}

	/// The region of the frame meant to be shown.
	///
	/// Uses the pan/scan aperture when pan/scan is enabled, then the minimum
	/// display aperture, then the geometric aperture, then the whole frame.
	pub fn display_area(&self) -> Area {
		if let (true, Some(area)) = (self.pan_scan, self.pan_scan_aperture) {
			return area;
		}

		self.min_display_aperture
			.or(self.geometric_aperture)
			.unwrap_or(Area::new(0.0, 0.0, self.size.width, self.size.height))
	}

	/// Checks the parts of the format the presenter cannot handle.
	///
	/// Rejects non-video, compressed and non-progressive formats, along with
	/// any aperture that extends past the frame.
	pub fn validate(&self) -> Result<()> {
		if self.major != MajorType::Video {
			return Err(Error::InvalidType);
		}

		if self.compressed || self.interlace != Interlace::Progressive {
			return Err(Error::InvalidType);
		}

		if self.pixel.is_none() {
			return Err(Error::InvalidType);
		}

		for area in [self.pan_scan_aperture, self.geometric_aperture, self.min_display_aperture]
			.into_iter()
			.flatten()
		{
			area.validate(self.size)?;
		}

		Ok(())
	}

	/// The destination rectangle for this format on a square-pixel display.
	pub fn output_rect(&self) -> Rect {
		let area = self.display_area();
		let (x, y) = (area.x as i32, area.y as i32);

		let fits = area.width != 0
			&& area.height != 0
			&& x as i64 + area.width as i64 <= self.size.width as i64
			&& y as i64 + area.height as i64 <= self.size.height as i64;

		let rect = match fits {
			true => Rect::new(x, y, x + area.width as i32, y + area.height as i32),
			false => Rect::new(0, 0, self.size.width as i32, self.size.height as i32),
		};

		correct_aspect_ratio(rect, self.pixel_aspect(), Ratio::new(1, 1))
	}

	/// The variant of this format the presenter would like the mixer to produce.
	///
	/// Square pixels, BT.709 colour, full range, and a frame the size of the
	/// corrected output rectangle with every aperture covering it.
	pub fn optimal(&self) -> Self {
		let rect = self.output_rect();
		let width = rect.right.max(0) as u32;
		let height = rect.bottom.max(0) as u32;
		let area = Area::new(0.0, 0.0, width, height);

		Self {
			pixel_aspect: Some(Ratio::new(1, 1)),
			color: Color {
				transfer: Transfer::Bt709,
				primaries: Primaries::Bt709,
				range: NominalRange::Full,
				lighting: Lighting::Office,
			},
			size: Size::new(width, height),
			pan_scan: false,
			geometric_aperture: Some(area),
			pan_scan_aperture: Some(area),
			min_display_aperture: Some(area),
			..self.clone()
		}
	}

	/// Whether two formats would allocate the same frames and display the same way.
	pub fn is_equal(&self, other: &Self) -> bool {
		self.pixel == other.pixel
			&& self.size == other.size
			&& self.frame_rate == other.frame_rate
			&& self.pixel_aspect() == other.pixel_aspect()
			&& self.display_area() == other.display_area()
			&& self.interlace == other.interlace
			&& self.color == other.color
	}

	/// The preference score of this format's pixel layout.
	pub fn merit(&self) -> i64 {
		self.pixel.map(PixelFormat::merit).unwrap_or(0)
	}
}

/// Multiplies then divides, rounding to the nearest integer.
pub(crate) fn mul_div(value: i64, num: i64, den: i64) -> i64 {
	if den == 0 {
		return -1;
	}

	let product = value as i128 * num as i128;
	let den = den as i128;
	let half = den.abs() / 2;
	let rounded = match (product < 0) == (den < 0) {
		true => (product.abs() + half) / den.abs(),
		false => -((product.abs() + half) / den.abs()),
	};

	rounded as i64
}

/// Converts a rectangle from one pixel aspect ratio to another.
///
/// The result is moved to the origin. Wide source pixels stretch the width and
/// tall source pixels stretch the height, so the image is never shrunk.
pub fn correct_aspect_ratio(src: Rect, src_par: Ratio, dst_par: Ratio) -> Rect {
	let mut rect = Rect::new(0, 0, src.width(), src.height());

	if src_par == dst_par || !src_par.is_valid() || !dst_par.is_valid() {
		return rect;
	}

	if src_par.num > src_par.den {
		rect.right = mul_div(rect.right as i64, src_par.num as i64, src_par.den as i64) as i32;
	} else if src_par.num < src_par.den {
		rect.bottom = mul_div(rect.bottom as i64, src_par.den as i64, src_par.num as i64) as i32;
	}

	if dst_par.num > dst_par.den {
		rect.bottom = mul_div(rect.bottom as i64, dst_par.num as i64, dst_par.den as i64) as i32;
	} else if dst_par.num < dst_par.den {
		rect.right = mul_div(rect.right as i64, dst_par.den as i64, dst_par.num as i64) as i32;
	}

	rect
}
