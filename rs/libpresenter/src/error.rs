use std::sync::Arc;

/// Errors returned across the C ABI.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
	#[error(transparent)]
	Presenter(#[from] presenter::Error),

	#[error("panic")]
	Panic,

	#[error("invalid pointer")]
	InvalidPointer,

	#[error("invalid id")]
	InvalidId,

	#[error("not found")]
	NotFound,

	#[error("invalid code")]
	InvalidCode,

	#[error("invalid utf8: {0}")]
	Utf8(#[from] std::str::Utf8Error),

	#[error("invalid log level: {0}")]
	Level(Arc<tracing::metadata::ParseLevelError>),

	#[error("invalid config: {0}")]
	Config(Arc<anyhow::Error>),
}

impl From<tracing::metadata::ParseLevelError> for Error {
	fn from(err: tracing::metadata::ParseLevelError) -> Self {
		Self::Level(Arc::new(err))
	}
}

impl Error {
	/// The negative code returned to C.
	///
	/// Presenter errors keep their own codes, which never overlap with these.
	pub fn code(&self) -> i32 {
		match self {
			Self::Presenter(err) => err.code(),
			Self::Panic => -1,
			Self::InvalidPointer => -2,
			Self::InvalidId => -3,
			Self::NotFound => -4,
			Self::InvalidCode => -5,
			Self::Utf8(_) => -6,
			Self::Level(_) => -7,
			Self::Config(_) => -8,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_codes_are_distinct() {
		let codes = [
			Error::Panic.code(),
			Error::InvalidPointer.code(),
			Error::InvalidId.code(),
			Error::NotFound.code(),
			Error::InvalidCode.code(),
			Error::Level(Arc::new("loud".parse::<tracing::Level>().unwrap_err())).code(),
			Error::Config(Arc::new(anyhow::anyhow!("bad"))).code(),
		];

		for code in codes {
			assert!(code < 0);
			assert!(presenter::Error::from_code(code).is_none(), "{code} overlaps");
		}
	}

	#[test]
	fn test_presenter_code_passthrough() {
		let err: Error = presenter::Error::PoolEmpty.into();
		assert_eq!(err.code(), presenter::Error::PoolEmpty.code());
	}
}
