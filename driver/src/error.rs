//! Error taxonomy for the driver.
//!
//! Components retry only inside their own, explicitly listed set of
//! [`UiErrorKind`]s. Everything else propagates unchanged, so callers can
//! branch on [`DriverError`] variants to decide whether a restart makes sense.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::params::Parameter;
use crate::core::state::SessionState;
use crate::io::config::Target;

/// Coarse classification of capability-layer failures, used by retry sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiErrorKind {
    NotFound,
    Disabled,
    NotReady,
    Backend,
}

/// Failure reported by the desktop automation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UiError {
    /// The window, control, or menu item could not be resolved (yet).
    #[error("element not found: {0}")]
    NotFound(String),
    /// The element exists but does not accept input right now.
    #[error("element not enabled: {0}")]
    Disabled(String),
    /// The target did not answer the request in time (busy message loop).
    #[error("target not responding: {0}")]
    NotReady(String),
    #[error("automation backend error: {0}")]
    Backend(String),
}

impl UiError {
    pub fn kind(&self) -> UiErrorKind {
        match self {
            UiError::NotFound(_) => UiErrorKind::NotFound,
            UiError::Disabled(_) => UiErrorKind::Disabled,
            UiError::NotReady(_) => UiErrorKind::NotReady,
            UiError::Backend(_) => UiErrorKind::Backend,
        }
    }

    /// Disabled and unresponsive targets are expected to recover on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), UiErrorKind::Disabled | UiErrorKind::NotReady)
    }
}

/// Failure reported by the OS process layer.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process {pid} is no longer running")]
    Gone { pid: u32 },
    #[error("spawn {}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} exited during startup ({status})", .path.display())]
    ExitedEarly { path: PathBuf, status: String },
    #[error("could not kill process {pid}")]
    KillFailed { pid: u32 },
    #[error("read version of {}: {reason}", .path.display())]
    Version { path: PathBuf, reason: String },
}

/// Every outcome a driver operation can surface to its caller.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A readiness wait or a retry budget ran out.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        what: String,
        waited: Duration,
        #[source]
        last: Option<UiError>,
    },
    /// A control was momentarily unusable and no retry budget applied.
    #[error("transient control failure")]
    Transient(#[source] UiError),
    /// A dialog outside the known allow-list is blocking progress.
    #[error("unexpected dialog blocking progress: {text:?}")]
    UnexpectedDialog { text: String },
    /// The target process exited before the operation reached it.
    #[error("process {pid} already exited")]
    StaleProcess { pid: u32 },
    #[error("ui automation failed")]
    Ui(#[source] UiError),
    #[error("process management failed")]
    Process(#[from] ProcessError),
    #[error("cannot read {parameter} from menu label {label:?}")]
    ParameterFormat { parameter: Parameter, label: String },
    #[error("{parameter} can only be read")]
    ReadOnlyParameter { parameter: Parameter },
    #[error("invalid value {value:?} for {parameter}")]
    InvalidValue { parameter: String, value: String },
    #[error("{operation} is not supported by {target}")]
    Unsupported {
        operation: &'static str,
        target: Target,
    },
    #[error("cannot {operation}: session is {state}")]
    SessionUnavailable {
        operation: &'static str,
        state: SessionState,
    },
    #[error("{}: {reason}", .path.display())]
    Output { path: PathBuf, reason: String },
}

impl From<UiError> for DriverError {
    fn from(err: UiError) -> Self {
        if err.is_transient() {
            DriverError::Transient(err)
        } else {
            DriverError::Ui(err)
        }
    }
}

impl DriverError {
    /// Whether killing and relaunching the target may clear this failure.
    ///
    /// Validation and capability errors are deterministic and would fail the
    /// same way after a restart.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::Timeout { .. }
                | DriverError::Transient(_)
                | DriverError::UnexpectedDialog { .. }
                | DriverError::StaleProcess { .. }
                | DriverError::Ui(_)
                | DriverError::Process(_)
                | DriverError::Output { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_errors_split_into_transient_and_ui() {
        let disabled = DriverError::from(UiError::Disabled("File->Open".to_string()));
        assert!(matches!(disabled, DriverError::Transient(_)));

        let missing = DriverError::from(UiError::NotFound("Edit1".to_string()));
        assert!(matches!(missing, DriverError::Ui(_)));
    }

    #[test]
    fn only_environmental_failures_are_recoverable() {
        let timeout = DriverError::Timeout {
            what: "main window ready".to_string(),
            waited: Duration::from_secs(30),
            last: None,
        };
        assert!(timeout.is_recoverable());

        let read_only = DriverError::ReadOnlyParameter {
            parameter: Parameter::Tempo,
        };
        assert!(!read_only.is_recoverable());

        let unsupported = DriverError::Unsupported {
            operation: "load style",
            target: Target::BandInABox,
        };
        assert!(!unsupported.is_recoverable());
    }

    #[test]
    fn timeout_message_names_the_wait() {
        let err = DriverError::Timeout {
            what: "menu File->Open".to_string(),
            waited: Duration::from_millis(1500),
            last: Some(UiError::Disabled("File->Open".to_string())),
        };
        let message = err.to_string();
        assert!(message.contains("menu File->Open"));
        assert!(message.contains("1.5s"));
    }
}
