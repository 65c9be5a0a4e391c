//! Named UI actions with bounded retry.
//!
//! Every action first waits for the main window, then retries only the
//! failure kinds its [`PendingAction`] declares. Anything else propagates on
//! the first occurrence.

use std::fmt;

use tracing::{debug, instrument};

use crate::core::poll::{Clock, PollPolicy, retry_transient};
use crate::error::{DriverError, UiError, UiErrorKind};
use crate::io::config::{PopupProfile, TargetProfile, TimingConfig};
use crate::io::desktop::{Control, Desktop, WindowId};
use crate::readiness::ReadinessMonitor;

/// Menus report greyed-out items and busy message loops while the target
/// finishes earlier work.
pub const MENU_TRANSIENT: &[UiErrorKind] = &[UiErrorKind::Disabled, UiErrorKind::NotReady];
/// Popups take a moment to appear after the summoning click.
pub const POPUP_TRANSIENT: &[UiErrorKind] = &[UiErrorKind::NotFound];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Menu item given as `Top->Sub->Item`.
    Menu(String),
    /// Click inside a pane, then pick an item from the popup it summons.
    Popup(PopupProfile),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Menu(path) => write!(f, "menu {path}"),
            Action::Popup(popup) => write!(f, "popup {}", popup.item),
        }
    }
}

/// An action plus its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub action: Action,
    pub policy: PollPolicy,
    pub retry_on: &'static [UiErrorKind],
}

impl PendingAction {
    pub fn menu(path: &str, timing: &TimingConfig) -> Self {
        Self {
            action: Action::Menu(path.to_string()),
            policy: timing.menu_policy(),
            retry_on: MENU_TRANSIENT,
        }
    }

    pub fn popup(popup: &PopupProfile, timing: &TimingConfig) -> Self {
        Self {
            action: Action::Popup(popup.clone()),
            policy: timing.popup_policy(),
            retry_on: POPUP_TRANSIENT,
        }
    }
}

pub struct CommandDispatcher<'a, D: ?Sized, C: ?Sized> {
    desktop: &'a D,
    clock: &'a C,
    profile: &'a TargetProfile,
    timing: &'a TimingConfig,
    pid: u32,
}

impl<'a, D, C> CommandDispatcher<'a, D, C>
where
    D: Desktop + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(
        desktop: &'a D,
        clock: &'a C,
        profile: &'a TargetProfile,
        timing: &'a TimingConfig,
        pid: u32,
    ) -> Self {
        Self {
            desktop,
            clock,
            profile,
            timing,
            pid,
        }
    }

    fn ready_window(&self) -> Result<WindowId, DriverError> {
        ReadinessMonitor::new(self.desktop, self.clock, self.profile, self.pid)
            .wait_ready(self.timing.ready_policy())
    }

    /// Wait for readiness, then perform `pending` within its retry budget.
    #[instrument(skip_all, fields(action = %pending.action))]
    pub fn invoke(&self, pending: &PendingAction) -> Result<(), DriverError> {
        let window = self.ready_window()?;
        let what = pending.action.to_string();
        retry_transient(self.clock, pending.policy, pending.retry_on, &what, || {
            self.attempt(window, &pending.action)
        })?;
        debug!("action done");
        Ok(())
    }

    fn attempt(&self, window: WindowId, action: &Action) -> Result<(), UiError> {
        match action {
            Action::Menu(path) => self.desktop.select_menu(window, path),
            Action::Popup(popup) => match self.desktop.select_popup_item(self.pid, &popup.item) {
                Err(err) if err.kind() == UiErrorKind::NotFound => {
                    // Not shown yet: summon it and let the next attempt pick.
                    let anchor = Control::owned_nth(&popup.anchor_class, popup.anchor_ordinal);
                    self.desktop.click_at(window, &anchor, popup.x, popup.y)?;
                    Err(err)
                }
                other => other,
            },
        }
    }

    /// Live label of a menu item, with the menu retry set.
    pub fn query_text(&self, path: &str) -> Result<String, DriverError> {
        let window = self.ready_window()?;
        retry_transient(
            self.clock,
            self.timing.menu_policy(),
            MENU_TRANSIENT,
            &format!("menu label {path}"),
            || self.desktop.menu_item_text(window, path),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClock, FakeDesktop};
    use std::time::Duration;

    const PID: u32 = 4100;

    #[test]
    fn disabled_menu_is_retried_until_enabled() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        desktop.screen().fail(
            "select_menu",
            vec![
                UiError::Disabled("Generate".to_string()),
                UiError::NotReady("Generate".to_string()),
            ],
        );
        let clock = FakeClock::new();

        let dispatcher = CommandDispatcher::new(&desktop, &clock, &profile, &timing, PID);
        dispatcher
            .invoke(&PendingAction::menu("Generate->Generate All BB Tracks", &timing))
            .expect("invoke");
        assert_eq!(clock.elapsed(), Duration::from_millis(1000));
        assert_eq!(
            desktop.calls(),
            vec!["select_menu Generate->Generate All BB Tracks"]
        );
    }

    #[test]
    fn non_retryable_failure_is_raised_without_retry() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        let clock = FakeClock::new();

        let dispatcher = CommandDispatcher::new(&desktop, &clock, &profile, &timing, PID);
        let err = dispatcher
            .invoke(&PendingAction::menu("File->Export Lyrics", &timing))
            .unwrap_err();
        assert!(matches!(err, DriverError::Ui(UiError::NotFound(_))));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn menu_that_stays_disabled_times_out() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        desktop
            .screen()
            .set_menu("Generate->Generate All BB Tracks", "Generate All BB Tracks", false);
        let clock = FakeClock::new();

        let dispatcher = CommandDispatcher::new(&desktop, &clock, &profile, &timing, PID);
        let err = dispatcher
            .invoke(&PendingAction::menu("Generate->Generate All BB Tracks", &timing))
            .unwrap_err();
        match err {
            DriverError::Timeout { waited, last, .. } => {
                assert_eq!(waited, Duration::from_secs(10));
                assert!(matches!(last, Some(UiError::Disabled(_))));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn popup_is_summoned_then_picked() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        let clock = FakeClock::new();
        let popup = profile.style_popup.clone().expect("popup");

        let dispatcher = CommandDispatcher::new(&desktop, &clock, &profile, &timing, PID);
        dispatcher
            .invoke(&PendingAction::popup(&popup, &timing))
            .expect("popup");
        assert_eq!(
            desktop.calls(),
            vec![
                "click_at RealBand/TPanelWithCanvas11 (44,73)",
                "select_popup_item File Open Style",
            ]
        );
        assert_eq!(clock.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn query_text_reads_live_label() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        let clock = FakeClock::new();

        let dispatcher = CommandDispatcher::new(&desktop, &clock, &profile, &timing, PID);
        let label = dispatcher.query_text("Edit->Tempo").expect("label");
        assert_eq!(label, "Tempo [120]");
    }
}
