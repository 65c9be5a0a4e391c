//! Readiness of the target's main window.
//!
//! "Ready" is derived on every probe from the window hierarchy (exists,
//! visible, enabled) and never cached. While waiting, recovery prompts on the
//! profile's allow-list are declined so they cannot block startup forever.

use tracing::{debug, info, instrument, trace};

use crate::core::poll::{Clock, Poll, PollError, PollPolicy, poll};
use crate::error::{DriverError, UiError, UiErrorKind};
use crate::io::config::TargetProfile;
use crate::io::desktop::{Control, Desktop, WindowId, WindowQuery};

/// Static control holding the message text of a system message box.
pub const MESSAGE_TEXT: Control = Control::nth("Static", 2);
/// "No"/"Don't" button of a two-button system message box.
pub const DECLINE_BUTTON: Control = Control::nth("Button", 2);

pub struct ReadinessMonitor<'a, D: ?Sized, C: ?Sized> {
    desktop: &'a D,
    clock: &'a C,
    profile: &'a TargetProfile,
    pid: u32,
}

impl<'a, D, C> ReadinessMonitor<'a, D, C>
where
    D: Desktop + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(desktop: &'a D, clock: &'a C, profile: &'a TargetProfile, pid: u32) -> Self {
        Self {
            desktop,
            clock,
            profile,
            pid,
        }
    }

    pub fn main_window(&self) -> Result<Option<WindowId>, UiError> {
        self.desktop
            .find_window(self.pid, &WindowQuery::class(&self.profile.main_window_class))
    }

    /// Single probe; returns the main window when it accepts input.
    pub fn ready_window(&self) -> Result<Option<WindowId>, UiError> {
        let Some(window) = self.main_window()? else {
            return Ok(None);
        };
        let ready = self
            .desktop
            .window_state(window)?
            .is_some_and(|state| state.is_ready());
        Ok(ready.then_some(window))
    }

    pub fn is_ready(&self) -> Result<bool, UiError> {
        Ok(self.ready_window()?.is_some())
    }

    /// Poll until the main window is ready, declining known recovery prompts
    /// between probes.
    #[instrument(skip_all, fields(pid = self.pid, timeout_ms = policy.timeout.as_millis() as u64))]
    pub fn wait_ready(&self, policy: PollPolicy) -> Result<WindowId, DriverError> {
        let mut last: Option<UiError> = None;
        let outcome = poll(self.clock, policy, || {
            match self.ready_window() {
                Ok(Some(window)) => return Ok(Poll::Ready(window)),
                Ok(None) => {}
                Err(err) if pending_kind(&err) => {
                    trace!(err = %err, "readiness probe failed, still waiting");
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
            match self.dismiss_recovery() {
                Ok(_) => {}
                Err(err) if pending_kind(&err) => last = Some(err),
                Err(err) => return Err(err),
            }
            Ok(Poll::Pending)
        });
        match outcome {
            Ok(window) => {
                debug!("main window ready");
                Ok(window)
            }
            Err(PollError::Failed(err)) => Err(DriverError::from(err)),
            Err(PollError::Expired { waited, attempts }) => {
                debug!(attempts, "main window never became ready");
                Err(DriverError::Timeout {
                    what: format!("{} main window ready", self.profile.target),
                    waited,
                    last,
                })
            }
        }
    }

    /// Decline the active message box when its text is on the recovery
    /// allow-list. Returns whether a prompt was dismissed.
    pub fn dismiss_recovery(&self) -> Result<bool, UiError> {
        if self.profile.recovery_phrases.is_empty() {
            return Ok(false);
        }
        let Some(dialog) = self
            .desktop
            .find_window(self.pid, &WindowQuery::class(&self.profile.dialog_class))?
        else {
            return Ok(false);
        };
        let Some(text) = self.desktop.control_text(dialog, &MESSAGE_TEXT)? else {
            return Ok(false);
        };
        let known = self
            .profile
            .recovery_phrases
            .iter()
            .any(|phrase| text.contains(phrase.as_str()));
        if !known {
            return Ok(false);
        }
        info!(text = %text, "declining recovery prompt");
        self.desktop.click(dialog, &DECLINE_BUTTON)?;
        Ok(true)
    }
}

/// Failures that just mean "not there yet" while waiting.
fn pending_kind(err: &UiError) -> bool {
    matches!(err.kind(), UiErrorKind::NotFound | UiErrorKind::NotReady)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{TargetProfile, TimingConfig};
    use crate::test_support::{FakeClock, FakeControl, FakeDesktop};
    use std::time::Duration;

    const PID: u32 = 4242;

    #[test]
    fn busy_window_becomes_ready_after_a_few_probes() {
        let profile = TargetProfile::realband();
        let desktop = FakeDesktop::with_app(&profile);
        let main = desktop.screen().find_class("RealBand").expect("main");
        desktop.screen().set_busy(main, 3);
        let clock = FakeClock::new();

        let monitor = ReadinessMonitor::new(&desktop, &clock, &profile, PID);
        let window = monitor
            .wait_ready(TimingConfig::default().ready_policy())
            .expect("ready");
        assert_eq!(window, main);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn recovery_prompt_is_declined_while_waiting() {
        let profile = TargetProfile::realband();
        let desktop = FakeDesktop::with_app(&profile);
        let main = desktop.screen().find_class("RealBand").expect("main");
        {
            let mut screen = desktop.screen();
            let prompt = screen.open_window(None, "#32770", "RealBand");
            screen.add_control(prompt, FakeControl::new("Static", ""));
            screen.add_control(
                prompt,
                FakeControl::new("Static", "Recover data from last session?"),
            );
            screen.add_control(prompt, FakeControl::new("Button", "&Yes"));
            screen.add_control(prompt, FakeControl::new("Button", "&No"));
            screen.window_mut(main).expect("main").enabled = false;
        }
        desktop.on_click("#32770", &DECLINE_BUTTON, move |screen| {
            screen.close_class("#32770");
            if let Some(window) = screen.window_mut(main) {
                window.enabled = true;
            }
        });
        let clock = FakeClock::new();

        let monitor = ReadinessMonitor::new(&desktop, &clock, &profile, PID);
        monitor
            .wait_ready(TimingConfig::default().startup_policy())
            .expect("ready");
        assert_eq!(desktop.calls(), vec!["click #32770/Button2"]);
    }

    #[test]
    fn unknown_dialog_is_left_alone_until_timeout() {
        let profile = TargetProfile::realband();
        let desktop = FakeDesktop::with_app(&profile);
        {
            let mut screen = desktop.screen();
            let main = screen.find_class("RealBand").expect("main");
            screen.window_mut(main).expect("main").enabled = false;
            let prompt = screen.open_window(None, "#32770", "RealBand");
            screen.add_control(prompt, FakeControl::new("Static", ""));
            screen.add_control(prompt, FakeControl::new("Static", "Disk is full."));
            screen.add_control(prompt, FakeControl::new("Button", "OK"));
        }
        let clock = FakeClock::new();

        let monitor = ReadinessMonitor::new(&desktop, &clock, &profile, PID);
        let err = monitor
            .wait_ready(TimingConfig::default().startup_policy())
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert!(desktop.calls().is_empty());
        assert_eq!(clock.elapsed(), Duration::from_secs(15));
    }

    #[test]
    fn band_in_a_box_never_dismisses_dialogs() {
        let profile = TargetProfile::band_in_a_box();
        let desktop = FakeDesktop::with_app(&profile);
        let clock = FakeClock::new();
        let monitor = ReadinessMonitor::new(&desktop, &clock, &profile, PID);
        assert!(!monitor.dismiss_recovery().expect("probe"));
        assert!(monitor.is_ready().expect("probe"));
    }

    #[test]
    fn backend_failure_stops_the_wait() {
        let profile = TargetProfile::realband();
        let desktop = FakeDesktop::with_app(&profile);
        desktop
            .screen()
            .fail("find_window", vec![UiError::Backend("access denied".to_string())]);
        let clock = FakeClock::new();

        let monitor = ReadinessMonitor::new(&desktop, &clock, &profile, PID);
        let err = monitor
            .wait_ready(TimingConfig::default().ready_policy())
            .unwrap_err();
        assert!(matches!(err, DriverError::Ui(UiError::Backend(_))));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
