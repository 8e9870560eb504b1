use crate::{Frame, NormalizedRect, Result, Time, VideoFormat};

/// Asks the mixer for a specific earlier frame instead of the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredTime {
	pub time: Time,
	pub duration: Time,
}

/// The upstream stage that fills frames with decoded video.
pub trait Mixer<S>: Send + Sync {
	/// The output format the mixer offers at `index`.
	///
	/// Returns [crate::Error::NoMoreTypes] past the last one.
	fn output_type(&self, index: usize) -> Result<VideoFormat>;

	/// Commit an output format, or only check that it would be accepted.
	///
	/// `None` clears the output format.
	fn set_output_type(&self, format: Option<&VideoFormat>, test_only: bool) -> Result<()>;

	/// Fill `frame` with the next frame, or with the frame at `desired` when repainting.
	///
	/// Fails with [crate::Error::NeedMoreInput], [crate::Error::TypeNotSet] or
	/// [crate::Error::StreamChange] when no frame can be produced.
	fn process_output(&self, frame: &mut Frame<S>, desired: Option<DesiredTime>) -> Result<()>;

	/// Set the source rectangle to crop to.
	fn set_zoom(&self, _source: NormalizedRect) -> Result<()> {
		Ok(())
	}
}
