//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// Disconnected -> Launching -> Ready <-> Busy
///                                        |
///                                        v
///                                       Dead
/// ```
///
/// A failure while `Busy` leaves the target in an unknown state, so the session
/// moves to `Dead`; from there only shutdown is accepted. Shutdown always ends
/// in `Disconnected`, which accepts nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Launching,
    Ready,
    Busy,
    Dead,
}

impl SessionState {
    pub fn accepts_operations(self) -> bool {
        self == SessionState::Ready
    }

    pub fn accepts_shutdown(self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Launching => "launching",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Dead => "dead",
        };
        f.write_str(name)
    }
}
