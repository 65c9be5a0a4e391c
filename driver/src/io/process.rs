//! Process management for the target application.
//!
//! The [`ProcessHost`] trait covers the OS primitives (find, spawn, sample CPU,
//! enumerate, kill, read file version). The functions in this module build the
//! target lifecycle on top of it: attach or launch, advisory version check, and
//! a kill that also sweeps helper processes left behind by the main window.

use std::path::{Path, PathBuf};

use sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;
use tracing::{debug, info, instrument, warn};

use crate::core::poll::{Clock, Poll, PollError, poll};
use crate::error::{DriverError, ProcessError};
use crate::io::config::{TargetProfile, TimingConfig};

/// One entry of the OS process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Image name, e.g. `RealBand.exe`.
    pub name: String,
}

/// OS process primitives.
pub trait ProcessHost {
    /// Pid of a running process whose executable is `exe`, if any.
    fn find_by_path(&self, exe: &Path) -> Result<Option<u32>, ProcessError>;

    /// Start `exe` detached from this process and return its pid.
    fn spawn(&self, exe: &Path) -> Result<u32, ProcessError>;

    /// CPU usage of `pid` in percent since the previous sample.
    ///
    /// Returns [`ProcessError::Gone`] when the process has exited.
    fn cpu_usage(&self, pid: u32) -> Result<f32, ProcessError>;

    fn list(&self) -> Result<Vec<ProcessInfo>, ProcessError>;

    /// Force-kill `pid`. Returns [`ProcessError::Gone`] when it already exited.
    fn kill(&self, pid: u32) -> Result<(), ProcessError>;

    /// Version metadata embedded in the executable, read without running it.
    fn file_version(&self, exe: &Path) -> Result<String, ProcessError>;
}

/// The application instance a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProcess {
    pub exe_path: PathBuf,
    pub pid: u32,
    /// Image names swept on kill (primary plus helpers).
    pub image_names: Vec<String>,
    /// Whether this driver started the process (as opposed to attaching).
    pub launched: bool,
}

/// Read the target version and warn when it differs from the known-good one.
///
/// Never fails: an unreadable version is reported and treated as unknown.
pub fn check_version<H: ProcessHost + ?Sized>(
    host: &H,
    profile: &TargetProfile,
) -> Option<String> {
    match host.file_version(&profile.exe_path) {
        Ok(version) => {
            if version != profile.known_version {
                warn!(
                    target_app = %profile.target,
                    expected = %profile.known_version,
                    found = %version,
                    "automation was written for a different version, proceed with caution"
                );
            } else {
                debug!(version = %version, "target version matches");
            }
            Some(version)
        }
        Err(err) => {
            warn!(err = %err, "could not read target version");
            None
        }
    }
}

/// Bind to a running target or start a new one.
///
/// With `prefer_attach`, a running process at the profile's executable path is
/// reused. When none is found the target is launched exactly once, and the call
/// blocks until its CPU usage drops below the idle threshold.
#[instrument(skip_all, fields(exe = %profile.exe_path.display(), prefer_attach = prefer_attach))]
pub fn attach_or_launch<H, C>(
    host: &H,
    clock: &C,
    profile: &TargetProfile,
    timing: &TimingConfig,
    prefer_attach: bool,
) -> Result<TargetProcess, DriverError>
where
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    if prefer_attach {
        match host.find_by_path(&profile.exe_path)? {
            Some(pid) => {
                info!(pid, "attached to running target");
                return Ok(TargetProcess {
                    exe_path: profile.exe_path.clone(),
                    pid,
                    image_names: profile.image_names.clone(),
                    launched: false,
                });
            }
            None => debug!("no running target to attach to, launching"),
        }
    }

    let pid = host.spawn(&profile.exe_path)?;
    info!(pid, "launched target");
    if let Err(err) = wait_until_idle(host, clock, pid, timing) {
        warn!(pid, err = %err, "launched target never settled, killing it");
        match host.kill(pid) {
            Ok(()) | Err(ProcessError::Gone { .. }) => {}
            Err(kill_err) => warn!(pid, err = %kill_err, "could not kill unsettled target"),
        }
        return Err(err);
    }
    Ok(TargetProcess {
        exe_path: profile.exe_path.clone(),
        pid,
        image_names: profile.image_names.clone(),
        launched: true,
    })
}

/// Block until `pid` uses less CPU than the idle threshold.
///
/// A launched process gives no "initialized" signal; going quiet is the proxy.
fn wait_until_idle<H, C>(host: &H, clock: &C, pid: u32, timing: &TimingConfig) -> Result<(), DriverError>
where
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    let threshold = timing.launch_cpu_threshold;
    // Usage is measured between refreshes; spawning took the first one.
    clock.sleep(timing.launch_policy().interval.max(MINIMUM_CPU_UPDATE_INTERVAL));
    let outcome = poll(clock, timing.launch_policy(), || {
        let usage = host.cpu_usage(pid)?;
        debug!(pid, usage, threshold, "sampled cpu usage");
        if usage < threshold {
            Ok(Poll::Ready(()))
        } else {
            Ok(Poll::Pending)
        }
    });
    match outcome {
        Ok(()) => Ok(()),
        Err(PollError::Failed(ProcessError::Gone { pid })) => Err(DriverError::StaleProcess { pid }),
        Err(PollError::Failed(err)) => Err(DriverError::Process(err)),
        Err(PollError::Expired { waited, .. }) => Err(DriverError::Timeout {
            what: format!("process {pid} to go idle"),
            waited,
            last: None,
        }),
    }
}

/// Kill the target and every process sharing one of its image names.
///
/// Processes that already exited are logged and skipped, so calling this twice
/// in a row succeeds both times.
#[instrument(skip_all, fields(pid = process.pid))]
pub fn kill<H: ProcessHost + ?Sized>(host: &H, process: &TargetProcess) -> Result<(), DriverError> {
    kill_one(host, process.pid, "target")?;

    let strays: Vec<ProcessInfo> = host
        .list()?
        .into_iter()
        .filter(|info| {
            info.pid != process.pid
                && process
                    .image_names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&info.name))
        })
        .collect();
    for stray in strays {
        warn!(pid = stray.pid, name = %stray.name, "killing stray process");
        kill_one(host, stray.pid, "stray process")?;
    }
    Ok(())
}

/// A process that exits while being killed counts as killed.
fn kill_one<H: ProcessHost + ?Sized>(host: &H, pid: u32, what: &str) -> Result<(), DriverError> {
    match host.kill(pid) {
        Ok(()) => {
            info!(pid, "killed {what}");
            Ok(())
        }
        Err(ProcessError::Gone { pid }) => {
            warn!(pid, "{what} already exited");
            Ok(())
        }
        Err(err @ ProcessError::KillFailed { .. }) => {
            if host.list()?.iter().any(|info| info.pid == pid) {
                Err(err.into())
            } else {
                warn!(pid, "{what} exited while being killed");
                Ok(())
            }
        }
        Err(err) => Err(err.into()),
    }
}
