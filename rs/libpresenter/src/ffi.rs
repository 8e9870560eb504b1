use std::ffi::{CStr, c_char};

use crate::{Error, Id};

pub fn return_code<C: ReturnCode, F: FnOnce() -> C>(f: F) -> i32 {
	match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
		Ok(ret) => ret.code(),
		Err(_) => Error::Panic.code(),
	}
}

pub trait ReturnCode {
	fn code(&self) -> i32;
}

impl ReturnCode for () {
	fn code(&self) -> i32 {
		0
	}
}

impl ReturnCode for Result<(), Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(()) => 0,
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<usize, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(code) => i32::try_from(*code).unwrap_or_else(|_| Error::InvalidCode.code()),
			Err(e) => e.code(),
		}
	}
}

impl ReturnCode for Result<Id, Error> {
	fn code(&self) -> i32 {
		match self {
			Ok(id) => i32::try_from(*id).unwrap_or_else(|e| e.code()),
			Err(e) => e.code(),
		}
	}
}

pub fn parse_id(id: i32) -> Result<Id, Error> {
	Id::try_from(id)
}

/// # Safety
///
/// The caller must ensure that cstr is valid for 'a.
pub unsafe fn parse_str<'a>(cstr: *const c_char) -> Result<&'a str, Error> {
	if cstr.is_null() {
		return Ok("");
	}

	let string = unsafe { CStr::from_ptr(cstr) };
	Ok(string.to_str()?)
}

/// # Safety
///
/// The caller must ensure that ptr is either null or valid for 'a.
pub unsafe fn parse_ref<'a, T>(ptr: *const T) -> Result<&'a T, Error> {
	unsafe { ptr.as_ref() }.ok_or(Error::InvalidPointer)
}

/// # Safety
///
/// The caller must ensure that data is valid for writes of `size` bytes for 'a.
pub unsafe fn parse_slice_mut<'a>(data: *mut u8, size: usize) -> Result<&'a mut [u8], Error> {
	if data.is_null() {
		if size == 0 {
			return Ok(&mut []);
		}

		return Err(Error::InvalidPointer);
	}

	Ok(unsafe { std::slice::from_raw_parts_mut(data, size) })
}

/// Turn a status returned by a C callback into a result.
///
/// Unknown negative codes become [presenter::Error::Unexpected].
pub fn parse_status(code: i32) -> presenter::Result<()> {
	match code {
		0.. => Ok(()),
		code => Err(presenter::Error::from_code(code).unwrap_or(presenter::Error::Unexpected)),
	}
}
