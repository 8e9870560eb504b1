//! # presenter: a clock-driven video presenter
//!
//! `presenter` sits between an upstream mixer that produces decoded frames and a
//! graphics backend that shows them. It negotiates an output format with the
//! mixer, recycles a fixed set of GPU surfaces, and times each frame against a
//! presentation clock, including reverse playback, scrubbing and frame stepping.
//!
//! ## API
//!
//! The pieces, leaves first:
//! - [FramePool]: recycles the surfaces allocated for the current format.
//! - [Scheduler]: a worker thread that presents each [Frame] when the [Clock] reaches it.
//! - [RenderEngine]: owns a [Device], allocates surfaces and copies frames to the render target.
//! - [Presenter]: the state machine driving all of the above from pipeline [Message]s and clock events.
//!
//! A host provides a [Device] for its graphics API, a [Mixer] producing frames,
//! optionally a [Clock], and an [EventSink] for notifications like [Event::Complete].
//!
//! The core never installs a `tracing` subscriber; that is left to the host.

mod clock;
mod engine;
mod error;
mod event;
mod format;
mod mixer;
mod pool;
mod presenter;
mod queue;
mod sample;
mod scheduler;
mod time;


pub use clock::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use format::*;
pub use mixer::*;
pub use pool::*;
pub use presenter::*;
pub use queue::*;
pub use sample::*;
pub use scheduler::*;
pub use time::*;
