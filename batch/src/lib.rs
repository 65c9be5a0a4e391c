//! Batch conversion jobs built on the `driver` session.
//!
//! Each job walks a list of inputs, skips outputs that already exist, and runs
//! one conversion per input through [`restart::with_restarts`], which kills
//! and relaunches the target when a recoverable driver error escapes.

pub mod jobs;
pub mod manifest;
pub mod naming;
pub mod restart;
