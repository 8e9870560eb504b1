use std::ffi::{c_char, c_void};
use std::str::FromStr;

use presenter::{Message, Size, Time, WindowHandle};
use presenter_native::Config;
use tracing::Level;

use crate::state::{self, OnEvent, OnEventFn, OnFrame, OnFrameFn, State};
use crate::{Error, ffi};

pub const VP_MESSAGE_FLUSH: i32 = 0;
pub const VP_MESSAGE_INVALIDATE_FORMAT: i32 = 1;
pub const VP_MESSAGE_PROCESS_INPUT_NOTIFY: i32 = 2;
pub const VP_MESSAGE_BEGIN_STREAMING: i32 = 3;
pub const VP_MESSAGE_END_STREAMING: i32 = 4;
pub const VP_MESSAGE_END_OF_STREAM: i32 = 5;
/// Step forward by `param` frames.
pub const VP_MESSAGE_STEP: i32 = 6;
pub const VP_MESSAGE_CANCEL_STEP: i32 = 7;

/// The display changed; refresh the view.
pub const VP_EVENT_DISPLAY_CHANGED: i32 = 1;
/// A fatal error while streaming. The value is the error code.
pub const VP_EVENT_ERROR_ABORT: i32 = 2;
/// The value is the time spent pulling a frame, in microseconds.
pub const VP_EVENT_PROCESSING_LATENCY: i32 = 3;
/// A frame step finished. The value is 1 if it was cancelled.
pub const VP_EVENT_STEP_COMPLETE: i32 = 4;
/// The value is the position reached while scrubbing, in microseconds.
pub const VP_EVENT_SCRUB_TIME: i32 = 5;
pub const VP_EVENT_COMPLETE: i32 = 6;

/// Presenter settings. Zero fields use the defaults.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VpConfig {
	/// The number of frame buffers, at least 3.
	pub buffers: u32,
	pub display_width: u32,
	pub display_height: u32,
	/// The display refresh rate in Hz.
	pub refresh: u32,
}

/// An uncompressed video format.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VpFormat {
	/// A FourCC, or a legacy RGB format code.
	pub pixel: u32,
	pub width: u32,
	pub height: u32,
	/// Zero when unknown.
	pub fps_num: u32,
	pub fps_den: u32,
	/// Zero when unknown, meaning square pixels.
	pub par_num: u32,
	pub par_den: u32,
	pub interlaced: bool,
	pub compressed: bool,
}

/// A specific frame requested when repainting, in microseconds.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VpDesiredTime {
	pub time: i64,
	pub duration: i64,
}

/// The layout of a BGRA image.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VpImage {
	pub width: u32,
	pub height: u32,
	/// Bytes per row.
	pub pitch: usize,
}

/// The callbacks of a host mixer.
///
/// Each callback returns zero on success or a negative presenter error code,
/// e.g. need-more-input when no frame is ready.
#[repr(C)]
pub struct VpMixer {
	pub user_data: *mut c_void,

	/// Fill `format` with the output type at `index`, or return the no-more-types code.
	pub get_type: Option<unsafe extern "C" fn(user_data: *mut c_void, index: u32, format: *mut VpFormat) -> i32>,

	/// Commit a format, or only test it. A null format clears the output type.
	pub set_type: Option<unsafe extern "C" fn(user_data: *mut c_void, format: *const VpFormat, test_only: bool) -> i32>,

	/// Fill a frame buffer laid out in the committed format.
	///
	/// `desired` is null unless a specific frame is requested for a repaint.
	/// Write a negative pts or duration when unknown.
	pub process_output: Option<
		unsafe extern "C" fn(
			user_data: *mut c_void,
			data: *mut u8,
			size: usize,
			pitch: usize,
			desired: *const VpDesiredTime,
			pts: *mut i64,
			duration: *mut i64,
		) -> i32,
	>,

	/// Crop the source to a normalized rectangle.
	pub set_zoom: Option<unsafe extern "C" fn(user_data: *mut c_void, left: f32, top: f32, right: f32, bottom: f32) -> i32>,
}

impl Default for VpMixer {
	fn default() -> Self {
		Self {
			user_data: std::ptr::null_mut(),
			get_type: None,
			set_type: None,
			process_output: None,
			set_zoom: None,
		}
	}
}

fn parse_message(message: i32, param: u32) -> Result<Message, Error> {
	Ok(match message {
		VP_MESSAGE_FLUSH => Message::Flush,
		VP_MESSAGE_INVALIDATE_FORMAT => Message::InvalidateFormat,
		VP_MESSAGE_PROCESS_INPUT_NOTIFY => Message::ProcessInputNotify,
		VP_MESSAGE_BEGIN_STREAMING => Message::BeginStreaming,
		VP_MESSAGE_END_STREAMING => Message::EndStreaming,
		VP_MESSAGE_END_OF_STREAM => Message::EndOfStream,
		VP_MESSAGE_STEP => Message::Step(param),
		VP_MESSAGE_CANCEL_STEP => Message::CancelStep,
		_ => return Err(presenter::Error::InvalidArgument.into()),
	})
}

fn parse_config(config: Option<&VpConfig>) -> Config {
	let mut out = Config::default();
	let Some(config) = config else {
		return out;
	};

	if config.buffers != 0 {
		out.buffers = Some(config.buffers as usize);
	}
	if config.display_width != 0 && config.display_height != 0 {
		out.display = Some(Size::new(config.display_width, config.display_height));
	}
	if config.refresh != 0 {
		out.refresh = Some(config.refresh);
	}

	out
}

/// Initialize logging with a level.
///
/// The level is a string: "error", "warn", "info", "debug", "trace".
/// Null or empty uses the default. Only the first call takes effect.
///
/// Returns zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that level is null or a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_log_level(level: *const c_char) -> i32 {
	ffi::return_code(move || {
		match unsafe { ffi::parse_str(level) }? {
			"" => presenter_native::Log::default(),
			level => presenter_native::Log {
				level: Level::from_str(level)?,
			},
		}
		.init();

		Ok(())
	})
}

/// Create a presenter rendering in software.
///
/// A null config uses the defaults.
/// Returns a positive id on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that config is null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_presenter_create(config: *const VpConfig) -> i32 {
	ffi::return_code(move || {
		let config = parse_config(unsafe { config.as_ref() });
		State::lock().create(config)
	})
}

/// Shut down a presenter and free its id.
///
/// No callback runs after this returns.
#[unsafe(no_mangle)]
pub extern "C" fn vp_presenter_close(id: i32) -> i32 {
	ffi::return_code(move || state::close(ffi::parse_id(id)?))
}

/// Attach a mixer, moving the presenter to the stopped state.
///
/// The table is copied; the callbacks must stay valid until [vp_presenter_close].
///
/// # Safety
/// - The caller must ensure that mixer is a valid pointer.
/// - user_data must be usable from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_presenter_set_mixer(id: i32, mixer: *const VpMixer) -> i32 {
	ffi::return_code(move || {
		let id = ffi::parse_id(id)?;
		let mixer = unsafe { ffi::parse_ref(mixer) }?;

		let table = VpMixer {
			user_data: mixer.user_data,
			get_type: mixer.get_type,
			set_type: mixer.set_type,
			process_output: mixer.process_output,
			set_zoom: mixer.set_zoom,
		};

		state::get(id)?.set_mixer(table)
	})
}

/// Register a callback receiving the render target as BGRA after each presented frame.
///
/// A null callback clears it. The data is only valid during the call.
///
/// # Safety
/// - The callback must stay valid until replaced or [vp_presenter_close].
/// - user_data must be usable from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_presenter_on_frame(id: i32, user_data: *mut c_void, callback: Option<OnFrameFn>) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.on_frame(callback.map(|callback| OnFrame::new(user_data, callback)));
		Ok(())
	})
}

/// Register a callback receiving `VP_EVENT_*` notifications.
///
/// A null callback clears it.
///
/// # Safety
/// - The callback must stay valid until replaced or [vp_presenter_close].
/// - user_data must be usable from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_presenter_on_event(id: i32, user_data: *mut c_void, callback: Option<OnEventFn>) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.on_event(callback.map(|callback| OnEvent::new(user_data, callback)));
		Ok(())
	})
}

/// Send a `VP_MESSAGE_*` to the presenter. `param` is only used by [VP_MESSAGE_STEP].
#[unsafe(no_mangle)]
pub extern "C" fn vp_presenter_message(id: i32, message: i32, param: u32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.presenter.process_message(parse_message(message, param)?)?;
		Ok(())
	})
}

/// Set how many frame buffers are allocated on the next format change, at least 3.
#[unsafe(no_mangle)]
pub extern "C" fn vp_presenter_set_buffer_count(id: i32, count: u32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.presenter.engine().set_buffer_count(count as usize)?;
		Ok(())
	})
}

/// Bind the presenter to a window. Zero unbinds it.
///
/// Frames are only allocated while a window is set.
#[unsafe(no_mangle)]
pub extern "C" fn vp_presenter_set_window(id: i32, window: u64) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		let window: Option<WindowHandle> = (window != 0).then_some(window);
		handle.presenter.set_video_window(window)?;
		Ok(())
	})
}

/// Present the last frame again.
#[unsafe(no_mangle)]
pub extern "C" fn vp_presenter_repaint(id: i32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.presenter.repaint_video()?;
		Ok(())
	})
}

/// Copy the render target into `buffer` as packed BGRA rows.
///
/// Returns the image size in bytes. Pass a null buffer to only query the size.
/// `image` is optional and receives the layout.
///
/// # Safety
/// - buffer must be null or valid for writes of `size` bytes.
/// - image must be null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_presenter_current_image(id: i32, buffer: *mut u8, size: usize, image: *mut VpImage) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		let bitmap = handle.presenter.current_image()?;

		if let Some(image) = unsafe { image.as_mut() } {
			*image = VpImage {
				width: bitmap.header.width,
				height: bitmap.header.height,
				pitch: bitmap.header.width as usize * 4,
			};
		}

		if !buffer.is_null() {
			let buffer = unsafe { ffi::parse_slice_mut(buffer, size) }?;
			let dst = buffer
				.get_mut(..bitmap.data.len())
				.ok_or(presenter::Error::InvalidArgument)?;
			dst.copy_from_slice(&bitmap.data);
		}

		Ok(bitmap.data.len())
	})
}

/// Start the presentation clock at `offset` microseconds, or from the current position when negative.
#[unsafe(no_mangle)]
pub extern "C" fn vp_clock_start(id: i32, offset: i64) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		let offset = (offset >= 0).then(|| Time::from_micros(offset));
		handle.clock.start(offset)?;
		Ok(())
	})
}

/// Stop the clock and rewind it to zero.
#[unsafe(no_mangle)]
pub extern "C" fn vp_clock_stop(id: i32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.clock.stop()?;
		Ok(())
	})
}

#[unsafe(no_mangle)]
pub extern "C" fn vp_clock_pause(id: i32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.clock.pause()?;
		Ok(())
	})
}

/// Resume the clock after a pause.
#[unsafe(no_mangle)]
pub extern "C" fn vp_clock_restart(id: i32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		handle.clock.restart()?;
		Ok(())
	})
}

/// Change the playback rate. Zero scrubs; negative plays in reverse.
///
/// Rates the presenter cannot reach fail with the unsupported-rate code.
/// Requires a mixer, see [vp_presenter_set_mixer].
#[unsafe(no_mangle)]
pub extern "C" fn vp_clock_set_rate(id: i32, rate: f32) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		if rate != 0.0 {
			handle.presenter.is_rate_supported(false, rate)?;
		}
		handle.clock.set_rate(rate)?;
		Ok(())
	})
}

/// The current clock position in microseconds, or a negative code.
///
/// # Safety
/// - time must be a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn vp_clock_time(id: i32, time: *mut i64) -> i32 {
	ffi::return_code(move || {
		let handle = state::get(ffi::parse_id(id)?)?;
		let time = unsafe { time.as_mut() }.ok_or(Error::InvalidPointer)?;
		*time = presenter::Clock::time(handle.clock.as_ref())?.time.as_micros();
		Ok(())
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
	use std::time::{Duration, Instant};

	use parking_lot::Mutex;
	use presenter::PixelFormat;

	/// A host mixer producing white NV12 frames.
	#[derive(Default)]
	struct Host {
		next: AtomicI64,
		limit: i64,
		committed: AtomicUsize,
		frames: AtomicUsize,
		events: Mutex<Vec<(i32, i64)>>,
	}

	unsafe extern "C" fn get_type(_: *mut c_void, index: u32, format: *mut VpFormat) -> i32 {
		if index > 0 {
			return presenter::Error::NoMoreTypes.code();
		}

		unsafe {
			*format = VpFormat {
				pixel: PixelFormat::Nv12.code(),
				width: 8,
				height: 4,
				fps_num: 30,
				fps_den: 1,
				..Default::default()
			};
		}
		0
	}

	unsafe extern "C" fn set_type(user_data: *mut c_void, format: *const VpFormat, test_only: bool) -> i32 {
		let host = unsafe { &*(user_data as *const Host) };
		if !format.is_null() && !test_only {
			host.committed.fetch_add(1, Ordering::SeqCst);
		}
		0
	}

	unsafe extern "C" fn process_output(
		user_data: *mut c_void,
		data: *mut u8,
		size: usize,
		pitch: usize,
		desired: *const VpDesiredTime,
		pts: *mut i64,
		duration: *mut i64,
	) -> i32 {
		let host = unsafe { &*(user_data as *const Host) };
		assert_eq!(pitch, 8);

		let index = match unsafe { desired.as_ref() } {
			Some(desired) => desired.time / 33_333,
			None => {
				let index = host.next.fetch_add(1, Ordering::SeqCst);
				if index >= host.limit {
					return presenter::Error::NeedMoreInput.code();
				}
				index
			}
		};

		let data = unsafe { std::slice::from_raw_parts_mut(data, size) };
		data[..32].fill(235);
		data[32..].fill(128);

		unsafe {
			*pts = index * 33_333;
			*duration = 33_333;
		}
		0
	}

	unsafe extern "C" fn on_frame(user_data: *mut c_void, data: *const u8, size: usize, image: *const VpImage) {
		let host = unsafe { &*(user_data as *const Host) };
		let image = unsafe { &*image };
		assert_eq!((image.width, image.height, image.pitch), (8, 4, 32));
		assert_eq!(size, 8 * 4 * 4);
		assert!(!data.is_null());
		host.frames.fetch_add(1, Ordering::SeqCst);
	}

	unsafe extern "C" fn on_event(user_data: *mut c_void, event: i32, value: i64) {
		let host = unsafe { &*(user_data as *const Host) };
		host.events.lock().push((event, value));
	}

	fn mixer(host: &Host) -> VpMixer {
		VpMixer {
			user_data: host as *const Host as *mut c_void,
			get_type: Some(get_type),
			set_type: Some(set_type),
			process_output: Some(process_output),
			set_zoom: None,
		}
	}

	fn wait_until(f: impl Fn() -> bool) -> bool {
		let deadline = Instant::now() + Duration::from_secs(2);
		while Instant::now() < deadline {
			if f() {
				return true;
			}
			std::thread::sleep(Duration::from_millis(5));
		}
		false
	}

	#[test]
	fn test_invalid_ids() {
		assert_eq!(vp_presenter_close(0), Error::InvalidId.code());
		assert_eq!(vp_presenter_close(-5), Error::InvalidId.code());
		assert_eq!(vp_presenter_message(i32::MAX, VP_MESSAGE_FLUSH, 0), Error::NotFound.code());
	}

	#[test]
	fn test_log_level() {
		assert_eq!(unsafe { vp_log_level(c"loud".as_ptr()) }, -7);
	}

	#[test]
	fn test_create_rejects_few_buffers() {
		let config = VpConfig {
			buffers: 2,
			..Default::default()
		};
		assert_eq!(unsafe { vp_presenter_create(&config) }, -8);
	}

	#[test]
	fn test_create_and_close() {
		let id = unsafe { vp_presenter_create(std::ptr::null()) };
		assert!(id > 0);

		// No mixer yet.
		assert_eq!(
			vp_presenter_message(id, VP_MESSAGE_PROCESS_INPUT_NOTIFY, 0),
			presenter::Error::InvalidRequest.code()
		);
		assert_eq!(vp_presenter_set_buffer_count(id, 2), presenter::Error::InvalidArgument.code());
		assert_eq!(vp_presenter_set_buffer_count(id, 4), 0);
		assert_eq!(unsafe { vp_presenter_set_mixer(id, std::ptr::null()) }, Error::InvalidPointer.code());

		assert_eq!(vp_presenter_close(id), 0);
		assert_eq!(vp_presenter_close(id), Error::NotFound.code());
	}

	#[test]
	fn test_playback() {
		let host = Host {
			limit: 3,
			..Default::default()
		};
		let user_data = &host as *const Host as *mut c_void;

		let id = unsafe { vp_presenter_create(std::ptr::null()) };
		assert!(id > 0);

		assert_eq!(vp_presenter_set_window(id, 42), 0);
		assert_eq!(unsafe { vp_presenter_on_frame(id, user_data, Some(on_frame)) }, 0);
		assert_eq!(unsafe { vp_presenter_on_event(id, user_data, Some(on_event)) }, 0);
		assert_eq!(unsafe { vp_presenter_set_mixer(id, &mixer(&host)) }, 0);

		assert_eq!(vp_presenter_message(id, 99, 0), presenter::Error::InvalidArgument.code());
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_INVALIDATE_FORMAT, 0), 0);
		assert_eq!(host.committed.load(Ordering::SeqCst), 1);

		// Stopped: only the first frame is shown.
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_PROCESS_INPUT_NOTIFY, 0), 0);
		assert_eq!(host.frames.load(Ordering::SeqCst), 1);

		let mut image = VpImage::default();
		let size = unsafe { vp_presenter_current_image(id, std::ptr::null_mut(), 0, &mut image) };
		assert_eq!(size, 8 * 4 * 4);
		assert_eq!((image.width, image.height), (8, 4));

		let mut buffer = vec![0u8; size as usize];
		assert_eq!(
			unsafe { vp_presenter_current_image(id, buffer.as_mut_ptr(), buffer.len(), std::ptr::null_mut()) },
			size
		);
		assert!(buffer.iter().all(|&b| b == 255));

		let mut small = [0u8; 4];
		assert_eq!(
			unsafe { vp_presenter_current_image(id, small.as_mut_ptr(), small.len(), std::ptr::null_mut()) },
			presenter::Error::InvalidArgument.code()
		);

		// Play the rest.
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_BEGIN_STREAMING, 0), 0);
		assert_eq!(vp_clock_start(id, 0), 0);
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_PROCESS_INPUT_NOTIFY, 0), 0);
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_END_OF_STREAM, 0), 0);

		assert!(wait_until(|| host.events.lock().contains(&(VP_EVENT_COMPLETE, 0))));
		assert_eq!(host.frames.load(Ordering::SeqCst), 3);

		let mut time = -1;
		assert_eq!(unsafe { vp_clock_time(id, &mut time) }, 0);
		assert!(time >= 0);

		assert_eq!(vp_clock_pause(id), 0);
		assert_eq!(vp_clock_pause(id), presenter::Error::InvalidRequest.code());
		assert_eq!(vp_clock_restart(id), 0);
		assert_eq!(vp_clock_stop(id), 0);

		assert_eq!(vp_presenter_message(id, VP_MESSAGE_END_STREAMING, 0), 0);
		assert_eq!(vp_presenter_close(id), 0);
	}

	#[test]
	fn test_rate_limits() {
		let host = Host::default();

		let id = unsafe { vp_presenter_create(std::ptr::null()) };
		assert_eq!(vp_presenter_set_window(id, 1), 0);

		// The presenter ignores the clock until a mixer is attached.
		assert_eq!(vp_clock_set_rate(id, 1.0), presenter::Error::InvalidRequest.code());

		assert_eq!(unsafe { vp_presenter_set_mixer(id, &mixer(&host)) }, 0);
		assert_eq!(vp_presenter_message(id, VP_MESSAGE_INVALIDATE_FORMAT, 0), 0);

		// 60Hz at 30fps tops out at double speed.
		assert_eq!(vp_clock_set_rate(id, 2.0), 0);
		assert_eq!(vp_clock_set_rate(id, -2.0), 0);
		assert_eq!(vp_clock_set_rate(id, 0.0), 0);
		assert_eq!(
			vp_clock_set_rate(id, 3.0),
			presenter::Error::UnsupportedRate { nearest: 2.0 }.code()
		);

		assert_eq!(vp_presenter_close(id), 0);
	}
}
