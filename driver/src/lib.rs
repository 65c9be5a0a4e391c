//! Resilient remote control for Band-in-a-Box and RealBand.
//!
//! This crate drives a closed desktop application through its window
//! hierarchy. It never touches the application's files or internals; every
//! decision is made from what the window tree shows. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (polling, label parsing, key
//!   sequences, session states). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting seams (desktop automation, OS processes,
//!   configuration, screenshots). Each seam is a trait so tests can script it.
//!
//! Orchestration modules ([`readiness`], [`dialog`], [`dispatch`], [`session`])
//! compose core logic with the I/O seams. [`session::Session`] is the public
//! operation set consumed by batch jobs.

pub mod core;
pub mod dialog;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod logging;
pub mod readiness;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{DriverError, ProcessError, UiError, UiErrorKind};
pub use session::Session;
