//! C bindings for the video presenter.
//!
//! Every function returns a non-negative value on success and a negative [Error] code on failure.
//! Presenters are referred to by positive ids; each one renders with a software device and
//! times frames against its own system clock.

mod api;
mod error;
mod ffi;
mod id;
mod mixer;
mod state;

pub use api::*;
pub use error::*;
pub use id::*;
