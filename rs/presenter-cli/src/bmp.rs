use std::path::Path;

use anyhow::Context;
use presenter::Bitmap;

const FILE_HEADER: usize = 14;
const INFO_HEADER: usize = 40;

/// Encode a 32-bit snapshot as a top-down BMP file.
pub fn encode(bitmap: &Bitmap) -> anyhow::Result<Vec<u8>> {
	let header = &bitmap.header;
	anyhow::ensure!(header.bit_count == 32, "unsupported bit count: {}", header.bit_count);

	let offset = (FILE_HEADER + INFO_HEADER) as u32;
	let size = offset
		.checked_add(header.size_image)
		.context("bitmap too large")?;
	let height = i32::try_from(header.height).context("bitmap too tall")?;
	let width = i32::try_from(header.width).context("bitmap too wide")?;

	let mut out = Vec::with_capacity(size as usize);

	out.extend_from_slice(b"BM");
	out.extend_from_slice(&size.to_le_bytes());
	out.extend_from_slice(&[0; 4]);
	out.extend_from_slice(&offset.to_le_bytes());

	out.extend_from_slice(&(INFO_HEADER as u32).to_le_bytes());
	out.extend_from_slice(&width.to_le_bytes());
	// Negative for top-down rows.
	out.extend_from_slice(&(-height).to_le_bytes());
	out.extend_from_slice(&header.planes.to_le_bytes());
	out.extend_from_slice(&header.bit_count.to_le_bytes());
	out.extend_from_slice(&0u32.to_le_bytes());
	out.extend_from_slice(&header.size_image.to_le_bytes());
	// 72 DPI.
	out.extend_from_slice(&2835i32.to_le_bytes());
	out.extend_from_slice(&2835i32.to_le_bytes());
	out.extend_from_slice(&[0; 8]);

	out.extend_from_slice(&bitmap.data);

	Ok(out)
}

pub fn write(path: &Path, bitmap: &Bitmap) -> anyhow::Result<()> {
	let data = encode(bitmap)?;
	std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
	use super::*;

	use presenter::BitmapHeader;

	fn bitmap() -> Bitmap {
		Bitmap {
			header: BitmapHeader {
				width: 2,
				height: 1,
				planes: 1,
				bit_count: 32,
				compressed: false,
				size_image: 8,
			},
			data: vec![1, 2, 3, 4, 5, 6, 7, 8],
		}
	}

	#[test]
	fn test_encode() {
		let out = encode(&bitmap()).unwrap();
		assert_eq!(out.len(), 54 + 8);
		assert_eq!(&out[0..2], b"BM");
		assert_eq!(u32::from_le_bytes(out[2..6].try_into().unwrap()), 62);
		assert_eq!(u32::from_le_bytes(out[10..14].try_into().unwrap()), 54);
		assert_eq!(i32::from_le_bytes(out[18..22].try_into().unwrap()), 2);
		assert_eq!(i32::from_le_bytes(out[22..26].try_into().unwrap()), -1);
		assert_eq!(u16::from_le_bytes(out[28..30].try_into().unwrap()), 32);
		assert_eq!(&out[54..], &[1, 2, 3, 4, 5, 6, 7, 8]);
	}

	#[test]
	fn test_rejects_other_depths() {
		let mut bitmap = bitmap();
		bitmap.header.bit_count = 24;
		assert!(encode(&bitmap).is_err());
	}
}
