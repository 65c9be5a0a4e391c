//! [`ProcessHost`] backed by the operating system.

use std::cell::RefCell;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, instrument};
use wait_timeout::ChildExt;

use crate::error::ProcessError;
use crate::io::process::{ProcessHost, ProcessInfo};
use crate::io::version;

/// A freshly spawned target that dies this quickly never started properly.
const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(250);

/// Process table access through `sysinfo`, spawning through `std::process`.
///
/// CPU usage is computed between two refreshes, so the table is kept between
/// calls.
pub struct SystemHost {
    system: RefCell<System>,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            system: RefCell::new(System::new()),
        }
    }

    fn refresh_all(&self) {
        self.system
            .borrow_mut()
            .refresh_processes(ProcessesToUpdate::All, true);
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}

impl ProcessHost for SystemHost {
    fn find_by_path(&self, exe: &Path) -> Result<Option<u32>, ProcessError> {
        self.refresh_all();
        let system = self.system.borrow();
        let found = system
            .processes()
            .iter()
            .find(|(_, process)| process.exe().is_some_and(|path| same_path(path, exe)))
            .map(|(pid, _)| pid.as_u32());
        Ok(found)
    }

    #[instrument(skip_all, fields(exe = %exe.display()))]
    fn spawn(&self, exe: &Path) -> Result<u32, ProcessError> {
        let mut cmd = Command::new(exe);
        if let Some(dir) = exe.parent()
            && !dir.as_os_str().is_empty()
        {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

        debug!("spawning target");
        let mut child = cmd.spawn().map_err(|source| {
            error!(err = %source, "failed to spawn target");
            ProcessError::Spawn {
                path: exe.to_path_buf(),
                source,
            }
        })?;
        let pid = child.id();
        match child.wait_timeout(EARLY_EXIT_WINDOW) {
            Ok(Some(status)) => {
                return Err(ProcessError::ExitedEarly {
                    path: exe.to_path_buf(),
                    status: status.to_string(),
                });
            }
            Ok(None) => {}
            Err(source) => {
                return Err(ProcessError::Spawn {
                    path: exe.to_path_buf(),
                    source,
                });
            }
        }

        // First sample only primes the CPU counters.
        self.system
            .borrow_mut()
            .refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        Ok(pid)
    }

    fn cpu_usage(&self, pid: u32) -> Result<f32, ProcessError> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.borrow_mut();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system
            .process(sys_pid)
            .map(|process| process.cpu_usage())
            .ok_or(ProcessError::Gone { pid })
    }

    fn list(&self) -> Result<Vec<ProcessInfo>, ProcessError> {
        self.refresh_all();
        let system = self.system.borrow();
        let mut processes: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect();
        processes.sort_by_key(|info| info.pid);
        Ok(processes)
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.borrow_mut();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let Some(process) = system.process(sys_pid) else {
            return Err(ProcessError::Gone { pid });
        };
        if process.kill() {
            Ok(())
        } else {
            Err(ProcessError::KillFailed { pid })
        }
    }

    fn file_version(&self, exe: &Path) -> Result<String, ProcessError> {
        version::file_version(exe)
    }
}
