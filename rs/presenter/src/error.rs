/// A list of possible errors returned by the presenter and its components.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
	/// The pool or scheduler was used before it was set up.
	#[error("not initialized")]
	NotInitialized,

	#[error("already initialized")]
	AlreadyInitialized,

	/// No free frame is available; retry after a frame is released.
	#[error("pool empty")]
	PoolEmpty,

	/// The operation is not valid in the current state.
	#[error("invalid request")]
	InvalidRequest,

	/// The presenter was shut down.
	#[error("shutdown")]
	Shutdown,

	#[error("format not set")]
	TypeNotSet,

	/// The format was rejected during negotiation.
	#[error("invalid format")]
	InvalidType,

	/// The mixer ran out of formats to offer.
	#[error("no more formats")]
	NoMoreTypes,

	#[error("unsupported rate, nearest={nearest}")]
	UnsupportedRate { nearest: f32 },

	/// The mixer needs more input before it can produce a frame.
	#[error("need more input")]
	NeedMoreInput,

	/// The mixer changed its output format.
	#[error("stream change")]
	StreamChange,

	/// The graphics device is gone and cannot be recreated.
	#[error("device removed")]
	DeviceRemoved,

	/// A backend-specific device failure.
	#[error("device error: {0}")]
	Device(String),

	#[error("out of memory")]
	OutOfMemory,

	#[error("invalid argument")]
	InvalidArgument,

	#[error("unexpected")]
	Unexpected,

	#[error("timeout")]
	Timeout,
}

impl Error {
	/// A stable negative integer for the error, used across the C ABI.
	pub fn code(&self) -> i32 {
		match self {
			Self::NotInitialized => -10,
			Self::AlreadyInitialized => -11,
			Self::PoolEmpty => -12,
			Self::InvalidRequest => -13,
			Self::Shutdown => -14,
			Self::TypeNotSet => -15,
			Self::InvalidType => -16,
			Self::NoMoreTypes => -17,
			Self::UnsupportedRate { .. } => -18,
			Self::NeedMoreInput => -19,
			Self::StreamChange => -20,
			Self::DeviceRemoved => -21,
			Self::Device(_) => -22,
			Self::OutOfMemory => -23,
			Self::InvalidArgument => -24,
			Self::Unexpected => -25,
			Self::Timeout => -26,
		}
	}

	/// Decode an error from its integer code.
	///
	/// Codes that carry data decode with a default payload.
	pub fn from_code(code: i32) -> Option<Self> {
		Some(match code {
			-10 => Self::NotInitialized,
			-11 => Self::AlreadyInitialized,
			-12 => Self::PoolEmpty,
			-13 => Self::InvalidRequest,
			-14 => Self::Shutdown,
			-15 => Self::TypeNotSet,
			-16 => Self::InvalidType,
			-17 => Self::NoMoreTypes,
			-18 => Self::UnsupportedRate { nearest: 0.0 },
			-19 => Self::NeedMoreInput,
			-20 => Self::StreamChange,
			-21 => Self::DeviceRemoved,
			-22 => Self::Device(String::new()),
			-23 => Self::OutOfMemory,
			-24 => Self::InvalidArgument,
			-25 => Self::Unexpected,
			-26 => Self::Timeout,
			_ => return None,
		})
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_code_roundtrip() {
		for err in [
			Error::NotInitialized,
			Error::PoolEmpty,
			Error::Shutdown,
			Error::TypeNotSet,
			Error::DeviceRemoved,
			Error::Timeout,
		] {
			assert!(err.code() < 0);
			assert_eq!(Error::from_code(err.code()), Some(err));
		}
	}

	#[test]
	fn test_unknown_code() {
		assert_eq!(Error::from_code(0), None);
		assert_eq!(Error::from_code(-1), None);
	}

	#[test]
	fn test_unsupported_rate_display() {
		let err = Error::UnsupportedRate { nearest: -2.0 };
		assert_eq!(err.to_string(), "unsupported rate, nearest=-2");
	}
}
