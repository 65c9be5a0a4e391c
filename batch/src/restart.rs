//! Kill-and-relaunch retries around one unit of batch work.

use anyhow::{Context, Result};
use driver::core::poll::Clock;
use driver::io::desktop::Desktop;
use driver::io::process::ProcessHost;
use driver::{DriverError, Session};
use tracing::warn;

/// A connection that can be torn down before a relaunch.
pub trait Restartable {
    fn shutdown(&mut self) -> Result<(), DriverError>;
}

impl<D, H, C> Restartable for Session<'_, D, H, C>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    fn shutdown(&mut self) -> Result<(), DriverError> {
        Session::shutdown(self)
    }
}

/// Whether `err` carries a driver error worth a fresh target.
pub fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DriverError>()
        .is_some_and(DriverError::is_recoverable)
}

/// Run `op` up to `max_attempts` times.
///
/// After a recoverable failure with attempts left, the session is shut down and
/// replaced by `relaunch()`. The last failure, or any non-recoverable one, is
/// returned unchanged.
pub fn with_restarts<S, T>(
    session: &mut S,
    max_attempts: u32,
    mut relaunch: impl FnMut() -> Result<S>,
    mut op: impl FnMut(&mut S) -> Result<T>,
) -> Result<T>
where
    S: Restartable,
{
    let mut attempt = 1;
    loop {
        let err = match op(session) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= max_attempts || !is_recoverable(&err) {
            return Err(err);
        }
        warn!(attempt, max_attempts, err = %format!("{err:#}"), "restarting target");
        if let Err(shutdown_err) = session.shutdown() {
            warn!(err = %shutdown_err, "shutdown before restart failed");
        }
        *session = relaunch().context("relaunch target")?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use driver::UiError;
    use std::cell::Cell;

    struct Probe<'a> {
        generation: u32,
        shutdowns: &'a Cell<u32>,
    }

    impl Restartable for Probe<'_> {
        fn shutdown(&mut self) -> Result<(), DriverError> {
            self.shutdowns.set(self.shutdowns.get() + 1);
            Ok(())
        }
    }

    fn timeout() -> anyhow::Error {
        DriverError::Timeout {
            what: "RealBand main window ready".to_string(),
            waited: std::time::Duration::from_secs(30),
            last: None,
        }
        .into()
    }

    #[test]
    fn three_attempts_mean_two_relaunches() {
        let shutdowns = Cell::new(0);
        let relaunches = Cell::new(0);
        let mut probe = Probe {
            generation: 0,
            shutdowns: &shutdowns,
        };

        let err = with_restarts(
            &mut probe,
            3,
            || {
                relaunches.set(relaunches.get() + 1);
                Ok(Probe {
                    generation: relaunches.get(),
                    shutdowns: &shutdowns,
                })
            },
            |_| -> Result<()> { Err(timeout()) },
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::Timeout { .. })
        ));
        assert_eq!(shutdowns.get(), 2);
        assert_eq!(relaunches.get(), 2);
        assert_eq!(probe.generation, 2);
    }

    #[test]
    fn timeouts_then_success_restart_exactly_twice() {
        let shutdowns = Cell::new(0);
        let attempts = Cell::new(0);
        let mut probe = Probe {
            generation: 0,
            shutdowns: &shutdowns,
        };

        with_restarts(
            &mut probe,
            3,
            || {
                Ok(Probe {
                    generation: 0,
                    shutdowns: &shutdowns,
                })
            },
            |_| {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(timeout())
                } else {
                    Ok(())
                }
            },
        )
        .expect("third attempt");
        assert_eq!(attempts.get(), 3);
        assert_eq!(shutdowns.get(), 2);
    }

    #[test]
    fn success_after_restart_uses_new_session() {
        let shutdowns = Cell::new(0);
        let mut probe = Probe {
            generation: 0,
            shutdowns: &shutdowns,
        };

        let seen = with_restarts(
            &mut probe,
            3,
            || {
                Ok(Probe {
                    generation: 1,
                    shutdowns: &shutdowns,
                })
            },
            |probe| {
                if probe.generation == 0 {
                    Err(DriverError::Ui(UiError::NotReady("RealBand".to_string())).into())
                } else {
                    Ok(probe.generation)
                }
            },
        )
        .expect("second attempt");
        assert_eq!(seen, 1);
        assert_eq!(shutdowns.get(), 1);
    }

    #[test]
    fn non_driver_errors_are_not_retried() {
        let shutdowns = Cell::new(0);
        let mut probe = Probe {
            generation: 0,
            shutdowns: &shutdowns,
        };
        let calls = Cell::new(0);

        let err = with_restarts(
            &mut probe,
            3,
            || Err(anyhow!("must not relaunch")),
            |_| -> Result<()> {
                calls.set(calls.get() + 1);
                Err(anyhow!("manifest line 3 is malformed"))
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("manifest"));
        assert_eq!(calls.get(), 1);
        assert_eq!(shutdowns.get(), 0);
    }

    #[test]
    fn context_does_not_hide_recoverable_errors() {
        let err = timeout().context("render line 2");
        assert!(is_recoverable(&err));
    }
}
