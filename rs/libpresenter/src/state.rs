use std::ffi::c_void;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, MutexGuard};
use presenter::{Clock, Event, EventSink, Presenter, Services};
use presenter_native::{Config, SoftwareDevice, SoftwareSurface, SystemClock};

use crate::api::{VpImage, VpMixer};
use crate::mixer::CMixer;
use crate::{Error, Id, NonZeroSlab};

pub type OnEventFn = unsafe extern "C" fn(user_data: *mut c_void, event: i32, value: i64);
pub type OnFrameFn = unsafe extern "C" fn(user_data: *mut c_void, data: *const u8, size: usize, image: *const VpImage);

#[derive(Clone, Copy)]
pub struct OnEvent {
	user_data: *mut c_void,
	callback: OnEventFn,
}

// SAFETY: The C side MUST guarantee that user_data may be used from any thread
// and that the callback stays valid until it is replaced or the presenter is closed.
unsafe impl Send for OnEvent {}
unsafe impl Sync for OnEvent {}

impl OnEvent {
	pub fn new(user_data: *mut c_void, callback: OnEventFn) -> Self {
		Self { user_data, callback }
	}

	fn call(&self, event: &Event) {
		let value = match event {
			Event::ErrorAbort(err) => err.code() as i64,
			Event::ProcessingLatency(time) | Event::ScrubTime(time) => time.as_micros(),
			Event::StepComplete { cancelled } => *cancelled as i64,
			Event::DisplayChanged | Event::Complete => 0,
		};

		unsafe { (self.callback)(self.user_data, event.code(), value) }
	}
}

pub struct OnFrame {
	user_data: *mut c_void,
	callback: OnFrameFn,
}

// SAFETY: Same contract as [OnEvent].
unsafe impl Send for OnFrame {}
unsafe impl Sync for OnFrame {}

impl OnFrame {
	pub fn new(user_data: *mut c_void, callback: OnFrameFn) -> Self {
		Self { user_data, callback }
	}

	fn call(&self, surface: &SoftwareSurface) {
		let size = surface.size();
		let image = VpImage {
			width: size.width,
			height: size.height,
			pitch: surface.pitch(),
		};

		// Copied so the callback may read the render target again without deadlocking.
		let data = surface.lock().clone();

		unsafe { (self.callback)(self.user_data, data.as_ptr(), data.len(), &image) }
	}
}

/// Forwards presenter events to whichever callback is registered at the time.
#[derive(Default)]
pub struct EventForwarder {
	callback: Mutex<Option<OnEvent>>,
}

impl EventForwarder {
	pub fn set(&self, callback: Option<OnEvent>) {
		*self.callback.lock() = callback;
	}
}

impl EventSink for EventForwarder {
	fn notify(&self, event: Event) {
		tracing::trace!(?event, "event");

		let callback = *self.callback.lock();
		if let Some(callback) = callback {
			callback.call(&event);
		}
	}
}

/// Everything owned by one presenter id.
#[derive(Clone)]
pub struct Handle {
	pub presenter: Presenter<SoftwareDevice>,
	pub clock: Arc<SystemClock>,
	events: Arc<EventForwarder>,
}

impl Handle {
	fn new(config: Config) -> Result<Self, Error> {
		let presenter = config.init().map_err(|err| Error::Config(Arc::new(err)))?;

		let clock = Arc::new(SystemClock::new());
		clock.add_sink(presenter.clone());

		Ok(Self {
			presenter,
			clock,
			events: Default::default(),
		})
	}

	pub fn set_mixer(&self, mixer: VpMixer) -> Result<(), Error> {
		self.presenter.init_service_pointers(Services {
			mixer: Arc::new(CMixer::new(mixer)),
			clock: Some(self.clock.clone() as Arc<dyn Clock>),
			events: self.events.clone(),
		})?;

		Ok(())
	}

	pub fn on_event(&self, callback: Option<OnEvent>) {
		self.events.set(callback);
	}

	pub fn on_frame(&self, callback: Option<OnFrame>) {
		let callback = callback.map(|callback| {
			Box::new(move |surface: &SoftwareSurface| callback.call(surface)) as presenter::FrameCallback<SoftwareSurface>
		});

		self.presenter.engine().register_callback(callback);
	}

	fn close(self) {
		self.events.set(None);
		self.presenter.engine().register_callback(None);
		self.presenter.shutdown();
		self.clock.clear_sinks();
	}
}

#[derive(Default)]
pub struct State {
	presenters: NonZeroSlab<Handle>,
}

static STATE: LazyLock<Mutex<State>> = LazyLock::new(Default::default);

impl State {
	/// Lock the global state.
	///
	/// Only hold the guard long enough to look up a [Handle]; presenter calls may
	/// run C callbacks that re-enter the API.
	pub fn lock() -> MutexGuard<'static, State> {
		STATE.lock()
	}

	pub fn create(&mut self, config: Config) -> Result<Id, Error> {
		let handle = Handle::new(config)?;
		let id = self.presenters.insert(handle)?;
		tracing::debug!(?id, "presenter created");
		Ok(id)
	}

	pub fn get(&self, id: Id) -> Result<Handle, Error> {
		self.presenters.get(id).cloned().ok_or(Error::NotFound)
	}

	pub fn remove(&mut self, id: Id) -> Result<Handle, Error> {
		self.presenters.remove(id).ok_or(Error::NotFound)
	}
}

/// Remove a presenter and shut it down outside the global lock.
pub fn close(id: Id) -> Result<(), Error> {
	let handle = State::lock().remove(id)?;
	handle.close();
	tracing::debug!(?id, "presenter closed");
	Ok(())
}

/// Look up a presenter, releasing the global lock before returning it.
pub fn get(id: Id) -> Result<Handle, Error> {
	State::lock().get(id)
}
