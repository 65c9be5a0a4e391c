//! Deterministic, pure logic shared by the driver.
//!
//! Core modules must be free of I/O side effects. Waiting goes through the
//! [`poll::Clock`] seam so the same loops run on virtual time in tests.

pub mod keys;
pub mod naming;
pub mod params;
pub mod poll;
pub mod state;
