//! Helper library for native hosts of the video presenter.
//!
//! Everything a host needs to run a [presenter::Presenter] without writing its own glue:
//! - [Log]: installs a `tracing` subscriber.
//! - [SystemClock]: a presentation clock driven by the system's monotonic clock.
//! - [SoftwareDevice]: a CPU render backend that converts YUV frames to BGRA.
//! - [Config]: presenter settings from the command line, environment or a TOML file.

pub mod clock;
pub mod config;
pub mod log;
pub mod software;

pub use clock::*;
pub use config::*;
pub use log::*;
pub use software::*;

// Re-export the core.
pub use presenter;
