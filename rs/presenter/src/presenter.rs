use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::{
	Bitmap, Clock, ClockStateSink, DEFAULT_FRAME_RATE, DesiredTime, Device, DeviceState, Error, Event, EventSink,
	Frame, FramePool, FrameSink, Mixer, NormalizedRect, Rect, RenderEngine, Result, Scheduled, Scheduler,
	SchedulerConfig, Size, Time, VideoFormat, WindowHandle, format::mul_div,
};

/// Whether the presenter is running, and whether it accepts requests at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
	Started,
	Stopped,
	Paused,
	/// Terminal until the services are initialized again.
	Shutdown,
}

/// Progress of an "advance by N frames" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameStepState {
	None,
	/// Waiting for the clock to start.
	WaitingStart,
	/// Discarding frames until the step count runs out.
	Pending,
	/// The final frame was handed to the scheduler.
	Scheduled,
	Complete,
}

/// Pipeline messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
	/// Drop every scheduled frame.
	Flush,
	/// The mixer's formats changed; negotiate again.
	InvalidateFormat,
	/// The mixer has new input.
	ProcessInputNotify,
	BeginStreaming,
	EndStreaming,
	/// Every input stream has ended.
	EndOfStream,
	/// Advance by this many frames.
	Step(u32),
	CancelStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDirection {
	Forward,
	Reverse,
}

/// The collaborators a presenter needs while streaming.
pub struct Services<S> {
	pub mixer: Arc<dyn Mixer<S>>,
	/// Frames are presented as soon as they are produced without a clock.
	pub clock: Option<Arc<dyn Clock>>,
	pub events: Arc<dyn EventSink>,
}

enum Pump {
	Continue,
	Stop,
}

struct FrameStep<S> {
	state: FrameStepState,
	steps: u32,
	/// Frames held back while stepping.
	frames: VecDeque<Frame<S>>,
	/// The frame whose release completes the step.
	target: Option<u64>,
}

struct State<S> {
	render: RenderState,

	mixer: Option<Arc<dyn Mixer<S>>>,
	clock: Option<Arc<dyn Clock>>,
	sink: Option<Arc<dyn EventSink>>,

	// Dispatched once the lock is released.
	events: Vec<Event>,

	format: Option<VideoFormat>,
	video_size: Size,
	aspect: Size,
	source: NormalizedRect,

	sample_notify: bool,
	repaint: bool,
	end_streaming: bool,
	prerolled: bool,
	flushing: bool,
	rate: f32,

	step: FrameStep<S>,
}

impl<S> State<S> {
	fn new() -> Self {
		Self {
			render: RenderState::Shutdown,
			mixer: None,
			clock: None,
			sink: None,
			events: Vec::new(),
			format: None,
			video_size: Size::default(),
			aspect: Size::default(),
			source: NormalizedRect::FULL,
			sample_notify: false,
			repaint: false,
			end_streaming: false,
			prerolled: false,
			flushing: false,
			rate: 1.0,
			step: FrameStep {
				state: FrameStepState::None,
				steps: 0,
				frames: VecDeque::new(),
				target: None,
			},
		}
	}

	fn check_shutdown(&self) -> Result<()> {
		match self.render {
			RenderState::Shutdown => Err(Error::InvalidRequest),
			_ => Ok(()),
		}
	}

	fn is_active(&self) -> bool {
		matches!(self.render, RenderState::Started | RenderState::Paused)
	}

	fn is_scrubbing(&self) -> bool {
		self.rate == 0.0
	}

	fn notify(&mut self, event: Event) {
		self.events.push(event);
	}

	fn clock_time(&self) -> Option<Time> {
		let clock = self.clock.as_ref()?;
		clock.time().ok().map(|now| now.time)
	}
}

type Guard<'a, S> = MutexGuard<'a, State<S>>;

struct Inner<D: Device> {
	engine: RenderEngine<D>,
	pool: FramePool<D::Surface>,
	scheduler: Scheduler<D::Surface>,
	state: Mutex<State<D::Surface>>,
}

/// Receives frames from the scheduler on behalf of the presenter.
struct PresenterSink<D: Device> {
	inner: Weak<Inner<D>>,
}

impl<D: Device> FrameSink<D::Surface> for PresenterSink<D> {
	fn present(&self, frame: &Frame<D::Surface>) -> Result<()> {
		match self.inner.upgrade() {
			Some(inner) => inner.engine.present(frame),
			None => Ok(()),
		}
	}

	fn release(&self, frame: Frame<D::Surface>) {
		if let Some(inner) = self.inner.upgrade() {
			inner.locked(|inner, state| inner.on_frame_released(state, frame));
		}
	}
}

/// Pulls frames from a mixer and presents them on time.
///
/// Control comes from pipeline [Message]s and [ClockStateSink] callbacks.
/// Frames come back from the scheduler asynchronously, which keeps the output
/// loop running while the clock is started.
pub struct Presenter<D: Device> {
	inner: Arc<Inner<D>>,
}

impl<D: Device> Clone for Presenter<D> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<D: Device> Presenter<D> {
	pub fn new(device: D, config: SchedulerConfig) -> Self {
		let inner = Arc::new_cyclic(|weak: &Weak<Inner<D>>| {
			let sink = Arc::new(PresenterSink { inner: weak.clone() });

			Inner {
				engine: RenderEngine::new(device),
				pool: FramePool::new(),
				scheduler: Scheduler::new(sink, config),
				state: Mutex::new(State::new()),
			}
		});

		Self { inner }
	}

	/// The render engine, for registering the frame callback and sizing the buffer pool.
	pub fn engine(&self) -> &RenderEngine<D> {
		&self.inner.engine
	}

	pub fn render_state(&self) -> RenderState {
		self.inner.state.lock().render
	}

	pub fn frame_step_state(&self) -> FrameStepState {
		self.inner.state.lock().step.state
	}

	/// Attach the mixer, clock and event sink, moving to the stopped state.
	///
	/// Rejected while playing or paused.
	pub fn init_service_pointers(&self, services: Services<D::Surface>) -> Result<()> {
		self.inner.locked(|_, state| {
			if state.is_active() {
				return Err(Error::InvalidRequest);
			}

			if let Err(err) = services.mixer.set_zoom(state.source) {
				tracing::warn!(%err, "failed to set the mixer source rectangle");
			}

			state.mixer = Some(services.mixer);
			state.clock = services.clock;
			state.sink = Some(services.events);
			state.render = RenderState::Stopped;

			tracing::debug!("services initialized");

			Ok(())
		})
	}

	/// Shut down, dropping every frame and the collaborators.
	pub fn release_service_pointers(&self) {
		self.inner.locked(|inner, state| {
			state.render = RenderState::Shutdown;
			inner.flush(state);
			inner.clear_media_type(state);

			state.mixer = None;
			state.clock = None;
			state.sink = None;
			state.events.clear();

			tracing::debug!("services released");
		})
	}

	/// Release the services and stop the scheduler thread.
	pub fn shutdown(&self) {
		self.release_service_pointers();
		self.inner.locked(|inner, state| inner.stop_scheduler(state));
	}

	pub fn process_message(&self, message: Message) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;
			tracing::trace!(?message, "message");

			match message {
				Message::Flush => {
					inner.flush(state);
					Ok(())
				}
				Message::InvalidateFormat => inner.renegotiate(state),
				Message::ProcessInputNotify => {
					state.sample_notify = true;
					if state.format.is_none() {
						return Err(Error::TypeNotSet);
					}

					inner.process_output_loop(state);
					Ok(())
				}
				Message::BeginStreaming => {
					let clock = state.clock.clone();
					MutexGuard::unlocked(state, || inner.scheduler.start(clock))
				}
				Message::EndStreaming => {
					inner.stop_scheduler(state);
					Ok(())
				}
				Message::EndOfStream => {
					state.end_streaming = true;
					inner.check_end_of_stream(state);
					Ok(())
				}
				Message::Step(steps) => inner.prepare_frame_step(state, steps),
				Message::CancelStep => {
					inner.cancel_frame_step(state);
					Ok(())
				}
			}
		})
	}

	/// The negotiated output format.
	pub fn current_format(&self) -> Result<VideoFormat> {
		let state = self.inner.state.lock();
		state.check_shutdown()?;
		state.format.clone().ok_or(Error::NotInitialized)
	}

	pub fn slowest_rate(&self, _direction: RateDirection, _thin: bool) -> Result<f32> {
		self.inner.state.lock().check_shutdown()?;
		Ok(0.0)
	}

	/// The fastest rate the display keeps up with, negative in reverse.
	pub fn fastest_rate(&self, direction: RateDirection, thin: bool) -> Result<f32> {
		let state = self.inner.state.lock();
		state.check_shutdown()?;

		let rate = self.inner.max_rate(&state, thin);
		Ok(match direction {
			RateDirection::Forward => rate,
			RateDirection::Reverse => -rate,
		})
	}

	/// Returns the rate when supported, or the nearest supported rate in the error.
	pub fn is_rate_supported(&self, thin: bool, rate: f32) -> Result<f32> {
		let state = self.inner.state.lock();
		state.check_shutdown()?;

		let max = self.inner.max_rate(&state, thin);
		if rate.abs() > max {
			let nearest = if rate < 0.0 { -max } else { max };
			return Err(Error::UnsupportedRate { nearest });
		}

		Ok(rate)
	}

	/// The frame size and the picture aspect ratio of the current format.
	pub fn native_video_size(&self) -> Result<(Size, Size)> {
		let state = self.inner.state.lock();
		state.check_shutdown()?;
		Ok((state.video_size, state.aspect))
	}

	/// The smallest and largest sizes worth rendering at.
	pub fn ideal_video_size(&self) -> Result<(Size, Size)> {
		Ok((Size::new(1, 1), self.inner.engine.display_size()?))
	}

	/// Move rendering to another window. Allowed after shutdown.
	pub fn set_video_window(&self, window: Option<WindowHandle>) -> Result<()> {
		self.inner.locked(|inner, state| {
			if inner.engine.video_window() == window {
				return Ok(());
			}

			let res = inner.engine.set_video_window(window);
			state.notify(Event::DisplayChanged);
			res
		})
	}

	pub fn video_window(&self) -> Option<WindowHandle> {
		self.inner.engine.video_window()
	}

	/// Crop the source to a normalized rectangle.
	///
	/// The destination always covers the frame, so `dest` is accepted and ignored.
	pub fn set_video_position(&self, source: Option<NormalizedRect>, dest: Option<Rect>) -> Result<()> {
		if source.is_none() && dest.is_none() {
			return Err(Error::InvalidArgument);
		}

		let Some(source) = source else {
			return Ok(());
		};

		source.validate()?;

		let mut state = self.inner.state.lock();
		state.source = source;

		match &state.mixer {
			Some(mixer) => mixer.set_zoom(source),
			None => Ok(()),
		}
	}

	/// The source rectangle, and a destination covering the current frame.
	pub fn video_position(&self) -> Result<(NormalizedRect, Option<Rect>)> {
		let state = self.inner.state.lock();
		state.check_shutdown()?;

		let dest = state.format.as_ref().map(|format| {
			Rect::new(0, 0, format.size.width as i32, format.size.height as i32)
		});

		Ok((state.source, dest))
	}

	/// Present the most recent frame again. Does nothing until a frame was shown.
	pub fn repaint_video(&self) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;

			if state.prerolled {
				state.repaint = true;
				if let Err(err) = inner.process_output(state) {
					tracing::debug!(%err, "repaint failed");
				}
			}

			Ok(())
		})
	}

	/// A snapshot of the last presented frame.
	pub fn current_image(&self) -> Result<Bitmap> {
		self.inner.state.lock().check_shutdown()?;
		self.inner.engine.current_image()
	}

	/// Output and input coordinates are the same space.
	pub fn map_output_coordinate_to_input_stream(&self, x: f32, y: f32) -> Result<(f32, f32)> {
		self.inner.state.lock().check_shutdown()?;
		Ok((x, y))
	}
}

impl<D: Device> ClockStateSink for Presenter<D> {
	fn on_clock_start(&self, offset: Option<Time>) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;
			tracing::debug!(?offset, "clock started");

			if state.is_active() {
				state.render = RenderState::Started;

				// A new position while running is a seek.
				if offset.is_some() {
					inner.flush(state);
				}
			} else {
				state.render = RenderState::Started;
				inner.start_frame_step(state)?;
			}

			inner.process_output_loop(state);
			Ok(())
		})
	}

	fn on_clock_stop(&self) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;
			tracing::debug!("clock stopped");

			if state.render != RenderState::Stopped {
				state.render = RenderState::Stopped;
				inner.flush(state);

				if state.step.state != FrameStepState::None {
					inner.cancel_frame_step(state);
				}
			}

			Ok(())
		})
	}

	fn on_clock_pause(&self) -> Result<()> {
		self.inner.locked(|_, state| {
			state.check_shutdown()?;
			tracing::debug!("clock paused");

			state.render = RenderState::Paused;
			Ok(())
		})
	}

	fn on_clock_restart(&self) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;
			tracing::debug!("clock restarted");

			state.render = RenderState::Started;
			inner.start_frame_step(state)?;
			inner.process_output_loop(state);

			Ok(())
		})
	}

	fn on_clock_set_rate(&self, rate: f32) -> Result<()> {
		self.inner.locked(|inner, state| {
			state.check_shutdown()?;
			tracing::debug!(rate, "clock rate changed");

			// Leaving scrubbing ends any frame step.
			if state.is_scrubbing() && rate != 0.0 {
				inner.cancel_frame_step(state);
				for frame in state.step.frames.drain(..) {
					inner.pool.release(frame);
				}
			}

			state.rate = rate;
			inner.scheduler.set_clock_rate(rate);

			Ok(())
		})
	}
}

impl<D: Device> Inner<D> {
	/// Run `f` with the state locked, then dispatch the events it raised.
	fn locked<R>(&self, f: impl FnOnce(&Self, &mut Guard<'_, D::Surface>) -> R) -> R {
		let mut state = self.state.lock();
		let res = f(self, &mut state);

		let events = std::mem::take(&mut state.events);
		let sink = state.sink.clone();
		drop(state);

		if let Some(sink) = sink {
			for event in events {
				sink.notify(event);
			}
		}

		res
	}

	fn max_rate(&self, state: &State<D::Surface>, thin: bool) -> f32 {
		if thin {
			return f32::MAX;
		}

		let Some(fps) = state.format.as_ref().and_then(VideoFormat::valid_frame_rate) else {
			return f32::MAX;
		};

		match self.engine.refresh_rate() {
			Ok(hz) if hz > 0 => mul_div(hz as i64, fps.den as i64, fps.num as i64) as f32,
			_ => f32::MAX,
		}
	}

	fn stop_scheduler(&self, state: &mut Guard<'_, D::Surface>) {
		let frames = MutexGuard::unlocked(state, || self.scheduler.stop());
		for frame in frames {
			self.pool.release(frame);
		}

		self.check_end_of_stream(state);
	}

	/// Drop every scheduled or held-back frame.
	fn flush(&self, state: &mut Guard<'_, D::Surface>) {
		state.prerolled = false;
		state.flushing = true;

		let frames = MutexGuard::unlocked(state, || self.scheduler.flush());
		state.flushing = false;

		let count = frames.len() + state.step.frames.len();
		for frame in frames.into_iter().chain(state.step.frames.drain(..)) {
			self.pool.release(frame);
		}

		tracing::debug!(frames = count, "flushed");

		// The returned frames may have been the last ones outstanding.
		self.check_end_of_stream(state);
	}

	fn release_resources(&self, state: &mut Guard<'_, D::Surface>) {
		self.flush(state);
		self.pool.clear();
		self.engine.release_resources();
	}

	fn clear_media_type(&self, state: &mut Guard<'_, D::Surface>) {
		state.format = None;
		self.release_resources(state);
	}

	/// Allocate frames for a new format. An identical format keeps the current frames.
	fn set_media_type(&self, state: &mut Guard<'_, D::Surface>, format: VideoFormat) -> Result<()> {
		state.check_shutdown()?;

		state.video_size = format.size;
		state.aspect = format.aspect_ratio();

		if state.format.as_ref().is_some_and(|current| current.is_equal(&format)) {
			return Ok(());
		}

		self.clear_media_type(state);
		self.allocate(state, format)
	}

	fn allocate(&self, state: &mut Guard<'_, D::Surface>, format: VideoFormat) -> Result<()> {
		let res = self
			.engine
			.create_frames(&format)
			.and_then(|frames| self.pool.initialize(frames));

		if let Err(err) = res {
			tracing::warn!(%err, "failed to allocate frames");
			self.release_resources(state);
			return Err(err);
		}

		self.scheduler
			.set_frame_rate(format.valid_frame_rate().unwrap_or(DEFAULT_FRAME_RATE));

		tracing::debug!(
			pixel = ?format.pixel,
			width = format.size.width,
			height = format.size.height,
			"format set"
		);

		state.format = Some(format);
		Ok(())
	}

	/// Rebuild the frames and render target for the current format on a recreated device.
	fn reallocate(&self, state: &mut Guard<'_, D::Surface>) -> Result<()> {
		let Some(format) = state.format.clone() else {
			return Ok(());
		};

		tracing::debug!("reallocating frames after device reset");

		self.clear_media_type(state);
		self.allocate(state, format)
	}

	/// React to the device health before a frame is pulled into its surfaces.
	fn check_device(&self, state: &mut Guard<'_, D::Surface>) -> Result<()> {
		let res = match self.engine.check_device_state() {
			Ok(DeviceState::Ok) => return Ok(()),
			Ok(DeviceState::Reset) => {
				state.notify(Event::DisplayChanged);
				self.reallocate(state)
			}
			Ok(DeviceState::Removed) => Err(Error::DeviceRemoved),
			Err(err) => Err(err),
		};

		if let Err(err) = &res {
			tracing::warn!(%err, "device unusable");
			state.notify(Event::ErrorAbort(err.clone()));
		}

		res
	}

	fn is_media_type_supported(&self, proposed: &VideoFormat) -> Result<()> {
		proposed.validate()?;

		let pixel = proposed.pixel.ok_or(Error::InvalidType)?;
		self.engine.check_format(pixel)
	}

	/// Pick the best format the mixer offers and commit it on both sides.
	fn renegotiate(&self, state: &mut Guard<'_, D::Surface>) -> Result<()> {
		let mixer = state.mixer.clone().ok_or(Error::InvalidRequest)?;

		let mut best: Option<VideoFormat> = None;

		for index in 0.. {
			let proposed = match mixer.output_type(index) {
				Ok(proposed) => proposed,
				Err(Error::NoMoreTypes) => break,
				Err(err) => {
					tracing::debug!(%err, index, "failed to query output type");
					break;
				}
			};

			if let Err(err) = self.is_media_type_supported(&proposed) {
				tracing::trace!(%err, index, pixel = ?proposed.pixel, "rejected format");
				continue;
			}

			let optimal = proposed.optimal();
			if let Err(err) = mixer.set_output_type(Some(&optimal), true) {
				tracing::trace!(%err, index, pixel = ?optimal.pixel, "mixer rejected format");
				continue;
			}

			if best.as_ref().is_none_or(|best| optimal.merit() > best.merit()) {
				best = Some(optimal);
			}
		}

		let res = match best {
			Some(format) => self
				.set_media_type(state, format.clone())
				.and_then(|_| mixer.set_output_type(Some(&format), false)),
			None => Err(Error::TypeNotSet),
		};

		if let Err(err) = res {
			tracing::warn!(%err, "no usable output format");
			self.clear_media_type(state);
			return Err(Error::TypeNotSet);
		}

		Ok(())
	}

	fn process_output_loop(&self, state: &mut Guard<'_, D::Surface>) {
		loop {
			if !state.sample_notify {
				self.check_end_of_stream(state);
				return;
			}

			match self.process_output(state) {
				Ok(Pump::Continue) => continue,
				Ok(Pump::Stop) => return,
				Err(Error::NeedMoreInput) => {
					self.check_end_of_stream(state);
					return;
				}
				Err(err) => {
					tracing::debug!(%err, "output loop stopped");
					return;
				}
			}
		}
	}

	/// Pull one frame from the mixer and deliver it.
	fn process_output(&self, state: &mut Guard<'_, D::Surface>) -> Result<Pump> {
		let repaint = state.repaint;

		// While not running, only the first frame is shown.
		if state.render != RenderState::Started && !repaint && state.prerolled {
			return Ok(Pump::Stop);
		}

		if state.flushing {
			return Ok(Pump::Stop);
		}

		let mixer = state.mixer.clone().ok_or(Error::InvalidRequest)?;

		self.check_device(state)?;

		let mut frame = match self.pool.acquire() {
			Ok(frame) => frame,
			// Resumes when a frame is released.
			Err(Error::PoolEmpty) => return Ok(Pump::Stop),
			Err(err) => return Err(err),
		};

		let (desired, start) = match repaint {
			true => {
				state.repaint = false;
				let desired = DesiredTime {
					time: self.scheduler.last_sample_time(),
					duration: self.scheduler.frame_duration(),
				};
				(Some(desired), None)
			}
			false => (None, state.clock_time()),
		};

		if let Err(err) = mixer.process_output(&mut frame, desired) {
			self.pool.release(frame);

			return match err {
				Error::NeedMoreInput => {
					state.sample_notify = false;
					Err(Error::NeedMoreInput)
				}
				Error::TypeNotSet => self.renegotiate(state).map(|_| Pump::Continue),
				Error::StreamChange => {
					tracing::debug!("stream change");
					self.clear_media_type(state);
					Ok(Pump::Stop)
				}
				err => {
					tracing::warn!(%err, "mixer failed");
					self.renegotiate(state).map(|_| Pump::Continue)
				}
			};
		}

		if let (Some(start), Some(end)) = (start, state.clock_time()) {
			state.notify(Event::ProcessingLatency(end - start));
		}

		if state.step.state == FrameStepState::None || repaint {
			self.deliver_sample(state, frame, repaint)?;
		} else {
			self.deliver_frame_step_sample(state, frame)?;
		}

		state.prerolled = true;

		Ok(Pump::Continue)
	}

	/// Present now, or schedule against the clock.
	fn deliver_sample(&self, state: &mut Guard<'_, D::Surface>, frame: Frame<D::Surface>, repaint: bool) -> Result<()> {
		let present_now = state.render != RenderState::Started || state.is_scrubbing() || repaint;

		if let Err(err) = self.schedule(state, frame, present_now) {
			tracing::warn!(%err, "failed to deliver frame");
			state.notify(Event::ErrorAbort(err.clone()));
			return Err(err);
		}

		Ok(())
	}

	fn schedule(&self, state: &mut Guard<'_, D::Surface>, frame: Frame<D::Surface>, present_now: bool) -> Result<()> {
		match self.scheduler.schedule(frame, present_now)? {
			Scheduled::Queued => Ok(()),
			Scheduled::Presented(frame, res) => {
				// Presented on this thread; no output loop since we are already in one.
				self.check_frame_step_release(state, &frame);
				self.pool.release(frame);
				res
			}
		}
	}

	fn deliver_frame_step_sample(&self, state: &mut Guard<'_, D::Surface>, frame: Frame<D::Surface>) -> Result<()> {
		if state.is_scrubbing() && self.is_time_passed(state, &frame) {
			tracing::trace!(id = frame.id(), "discarding late frame while scrubbing");
			self.pool.release(frame);
			return Ok(());
		}

		if state.step.state >= FrameStepState::Scheduled {
			state.step.frames.push_back(frame);
			return Ok(());
		}

		state.step.steps = state.step.steps.saturating_sub(1);

		if state.step.steps > 0 {
			// Not the frame we are stepping to.
			self.pool.release(frame);
			return Ok(());
		}

		if state.step.state == FrameStepState::WaitingStart {
			state.step.frames.push_back(frame);
			return Ok(());
		}

		state.step.target = Some(frame.id());
		state.step.state = FrameStepState::Scheduled;

		self.deliver_sample(state, frame, false)
	}

	fn is_time_passed(&self, state: &State<D::Surface>, frame: &Frame<D::Surface>) -> bool {
		let (Some(now), Some(time), Some(duration)) = (state.clock_time(), frame.time(), frame.duration()) else {
			return false;
		};

		time + duration < now
	}

	fn prepare_frame_step(&self, state: &mut Guard<'_, D::Surface>, steps: u32) -> Result<()> {
		state.step.steps = state.step.steps.saturating_add(steps);
		state.step.state = FrameStepState::WaitingStart;

		tracing::debug!(steps = state.step.steps, "frame step");

		match state.render {
			RenderState::Started => self.start_frame_step(state),
			_ => Ok(()),
		}
	}

	/// Deliver the frames held back while waiting for the clock.
	fn start_frame_step(&self, state: &mut Guard<'_, D::Surface>) -> Result<()> {
		match state.step.state {
			FrameStepState::WaitingStart => {
				state.step.state = FrameStepState::Pending;

				while state.step.state == FrameStepState::Pending {
					let Some(frame) = state.step.frames.pop_front() else {
						break;
					};
					self.deliver_frame_step_sample(state, frame)?;
				}
			}
			FrameStepState::None => {
				while let Some(frame) = state.step.frames.pop_front() {
					self.deliver_sample(state, frame, false)?;
				}
			}
			_ => {}
		}

		Ok(())
	}

	fn complete_frame_step(&self, state: &mut Guard<'_, D::Surface>, frame: &Frame<D::Surface>) {
		state.step.state = FrameStepState::Complete;
		state.step.target = None;

		tracing::debug!(id = frame.id(), "frame step complete");
		state.notify(Event::StepComplete { cancelled: false });

		if state.is_scrubbing() {
			let time = frame.time().or_else(|| state.clock_time()).unwrap_or_default();
			state.notify(Event::ScrubTime(time));
		}
	}

	fn cancel_frame_step(&self, state: &mut Guard<'_, D::Surface>) {
		let old = state.step.state;

		state.step.state = FrameStepState::None;
		state.step.steps = 0;
		state.step.target = None;

		if old > FrameStepState::None && old < FrameStepState::Complete {
			tracing::debug!(?old, "frame step cancelled");
			state.notify(Event::StepComplete { cancelled: true });
		}
	}

	fn check_frame_step_release(&self, state: &mut Guard<'_, D::Surface>, frame: &Frame<D::Surface>) {
		if state.step.state == FrameStepState::Scheduled && state.step.target == Some(frame.id()) {
			self.complete_frame_step(state, frame);
		}
	}

	/// The worker finished with a frame.
	fn on_frame_released(&self, state: &mut Guard<'_, D::Surface>, frame: Frame<D::Surface>) {
		self.check_frame_step_release(state, &frame);

		if self.pool.release(frame) {
			self.process_output_loop(state);
		} else {
			// A stale frame is not counted, but the stream may still be over.
			self.check_end_of_stream(state);
		}
	}

	/// Signal completion once the stream ended and every frame came back.
	fn check_end_of_stream(&self, state: &mut Guard<'_, D::Surface>) {
		if !state.end_streaming || state.sample_notify || self.pool.has_pending() {
			return;
		}

		tracing::debug!("end of stream");
		state.notify(Event::Complete);
		state.end_streaming = false;
	}
}
