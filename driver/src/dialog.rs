//! Modal dialog sequences: file open/save and settings dialogs.
//!
//! Every step re-resolves the active dialog from the window tree instead of
//! holding on to handles across steps, because the target may replace a dialog
//! with another one (the "save changes?" prompt) at any point.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::core::keys::Key;
use crate::core::poll::{Clock, Poll, PollError, PollPolicy, poll};
use crate::dispatch::{CommandDispatcher, PendingAction};
use crate::error::{DriverError, UiError, UiErrorKind};
use crate::io::config::{PopupProfile, TargetProfile, TimingConfig};
use crate::io::desktop::{Control, Desktop, WindowId, WindowQuery};
use crate::readiness::{DECLINE_BUTTON, MESSAGE_TEXT, ReadinessMonitor};

/// Caption of a message box shown in place of the file dialog.
pub const PROMPT_TEXT: Control = MESSAGE_TEXT;
/// "No" on the "save changes?" prompt: discard and continue.
pub const DISCARD_BUTTON: Control = DECLINE_BUTTON;
pub const PATH_EDIT: Control = Control::nth("Edit", 1);
/// "Save as type" combo box of the save dialog.
pub const FORMAT_COMBO: Control = Control::nth("ComboBox", 2);

/// One file-dialog round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDialogRequest {
    pub path: PathBuf,
    /// Entry to pick in the format combo box before confirming.
    pub format: Option<String>,
}

impl FileDialogRequest {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            format: None,
        }
    }
}

/// A single interaction inside a settings dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogStep {
    Select(Control, String),
    SetText(Control, String),
    Check(Control, bool),
    Click(Control),
    /// Click, then wait for the dialog to close.
    Confirm(Control),
}

pub struct DialogNavigator<'a, D: ?Sized, C: ?Sized> {
    desktop: &'a D,
    clock: &'a C,
    profile: &'a TargetProfile,
    timing: &'a TimingConfig,
    pid: u32,
}

fn pending_kind(err: &UiError) -> bool {
    matches!(err.kind(), UiErrorKind::NotFound | UiErrorKind::NotReady)
}

impl<'a, D, C> DialogNavigator<'a, D, C>
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

    /// Wait until a dialog of `class` exists and accepts input.
    pub fn wait_dialog(&self, class: &str, policy: PollPolicy) -> Result<WindowId, DriverError> {
        let query = WindowQuery::class(class);
        let mut last: Option<UiError> = None;
        let outcome = poll(self.clock, policy, || {
            let probe = self.desktop.find_window(self.pid, &query).and_then(|found| {
                let Some(window) = found else {
                    return Ok(None);
                };
                let ready = self
                    .desktop
                    .window_state(window)?
                    .is_some_and(|state| state.is_ready());
                Ok(ready.then_some(window))
            });
            match probe {
                Ok(Some(window)) => Ok(Poll::Ready(window)),
                Ok(None) => Ok(Poll::Pending),
                Err(err) if pending_kind(&err) => {
                    last = Some(err);
                    Ok(Poll::Pending)
                }
                Err(err) => Err(err),
            }
        });
        match outcome {
            Ok(window) => Ok(window),
            Err(PollError::Failed(err)) => Err(err.into()),
            Err(PollError::Expired { waited, .. }) => Err(DriverError::Timeout {
                what: format!("dialog {class}"),
                waited,
                last,
            }),
        }
    }

    /// Wait until `window` no longer exists.
    pub fn wait_closed(&self, window: WindowId, policy: PollPolicy) -> Result<(), DriverError> {
        let outcome = poll(self.clock, policy, || match self.desktop.window_state(window) {
            Ok(None) => Ok(Poll::Ready(())),
            Ok(Some(_)) => Ok(Poll::Pending),
            Err(err) if pending_kind(&err) => Ok(Poll::Pending),
            Err(err) => Err(err),
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(PollError::Failed(err)) => Err(err.into()),
            Err(PollError::Expired { waited, .. }) => Err(DriverError::Timeout {
                what: "dialog to close".to_string(),
                waited,
                last: None,
            }),
        }
    }

    /// Drive an open/save dialog that a menu or popup just summoned.
    ///
    /// "Save changes?" prompts in front of the dialog are answered with
    /// discard, at most `max_discard_prompts` times. Returns the main window
    /// once the target is ready again.
    #[instrument(skip_all, fields(path = %request.path.display()))]
    pub fn run_file_dialog(&self, request: &FileDialogRequest) -> Result<WindowId, DriverError> {
        let mut discarded = 0u32;
        let dialog = loop {
            let dialog = self.wait_dialog(&self.profile.dialog_class, self.timing.dialog_policy())?;
            let caption = self.desktop.control_text(dialog, &PROMPT_TEXT)?;
            let Some(text) = caption.filter(|text| text.contains(&self.profile.discard_phrase))
            else {
                break dialog;
            };
            if discarded >= self.timing.max_discard_prompts {
                return Err(DriverError::UnexpectedDialog { text });
            }
            discarded += 1;
            info!(text = %text, discarded, "discarding unsaved changes");
            self.desktop.click(dialog, &DISCARD_BUTTON)?;
            self.wait_closed(dialog, self.timing.dialog_policy())?;
        };

        if let Some(format) = &request.format {
            debug!(format = %format, "selecting file format");
            self.desktop.select_item(dialog, &FORMAT_COMBO, format)?;
        }
        let path = absolute_path(&request.path)?;
        self.desktop
            .set_text(dialog, &PATH_EDIT, &path.to_string_lossy())?;
        self.desktop.send_keys(dialog, &PATH_EDIT, &[Key::Enter])?;
        ReadinessMonitor::new(self.desktop, self.clock, self.profile, self.pid)
            .wait_ready(self.timing.file_policy())
    }

    /// Summon a popup menu from a pane and pick its item.
    pub fn run_popup(&self, popup: &PopupProfile) -> Result<(), DriverError> {
        CommandDispatcher::new(self.desktop, self.clock, self.profile, self.timing, self.pid)
            .invoke(&PendingAction::popup(popup, self.timing))
    }

    /// Wait for a settings dialog of `class` and apply `steps` to it.
    #[instrument(skip_all, fields(class = %class))]
    pub fn run_settings_dialog(&self, class: &str, steps: &[DialogStep]) -> Result<(), DriverError> {
        let dialog = self.wait_dialog(class, self.timing.settings_policy())?;
        for step in steps {
            debug!(?step, "settings step");
            match step {
                DialogStep::Select(control, item) => self.desktop.select_item(dialog, control, item)?,
                DialogStep::SetText(control, text) => self.desktop.set_text(dialog, control, text)?,
                DialogStep::Check(control, checked) => {
                    self.desktop.set_checked(dialog, control, *checked)?
                }
                DialogStep::Click(control) => self.desktop.click(dialog, control)?,
                DialogStep::Confirm(control) => {
                    self.desktop.click(dialog, control)?;
                    self.wait_closed(dialog, self.timing.settings_policy())?;
                }
            }
        }
        Ok(())
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf, DriverError> {
    std::path::absolute(path).map_err(|err| DriverError::Output {
        path: path.to_path_buf(),
        reason: format!("resolve absolute path: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Target;
    use crate::test_support::{FakeClock, FakeDesktop, open_discard_prompt, open_file_dialog};

    const PID: u32 = 4300;

    fn navigator<'a>(
        desktop: &'a FakeDesktop,
        clock: &'a FakeClock,
        profile: &'a TargetProfile,
        timing: &'a TimingConfig,
    ) -> DialogNavigator<'a, FakeDesktop, FakeClock> {
        DialogNavigator::new(desktop, clock, profile, timing, PID)
    }

    #[test]
    fn plain_file_dialog_sets_path_and_confirms() {
        let profile = TargetProfile::band_in_a_box();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        open_file_dialog(&mut desktop.screen(), Target::BandInABox);
        let clock = FakeClock::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let song = temp.path().join("Misty.SGU");

        navigator(&desktop, &clock, &profile, &timing)
            .run_file_dialog(&FileDialogRequest::open(&song))
            .expect("dialog");
        assert_eq!(
            desktop.calls(),
            vec![
                format!("set_text #32770/Edit1 {}", song.display()),
                "send_keys #32770/Edit1 {ENTER}".to_string(),
            ]
        );
        assert!(desktop.screen().find_class("#32770").is_none());
    }

    #[test]
    fn discard_prompt_is_answered_then_dialog_driven() {
        let profile = TargetProfile::band_in_a_box();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        open_discard_prompt(&mut desktop.screen());
        desktop.on_click("#32770", &DISCARD_BUTTON, |screen| {
            screen.close_class("#32770");
            open_file_dialog(screen, Target::BandInABox);
        });
        let clock = FakeClock::new();
        let temp = tempfile::tempdir().expect("tempdir");

        navigator(&desktop, &clock, &profile, &timing)
            .run_file_dialog(&FileDialogRequest::open(&temp.path().join("a.SGU")))
            .expect("dialog");
        let calls = desktop.calls();
        assert_eq!(calls[0], "click #32770/Button2");
        assert!(calls[1].starts_with("set_text #32770/Edit1"));
    }

    #[test]
    fn repeating_discard_prompt_is_bounded() {
        let profile = TargetProfile::band_in_a_box();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        open_discard_prompt(&mut desktop.screen());
        desktop.on_click("#32770", &DISCARD_BUTTON, |screen| {
            screen.close_class("#32770");
            open_discard_prompt(screen);
        });
        let clock = FakeClock::new();

        let err = navigator(&desktop, &clock, &profile, &timing)
            .run_file_dialog(&FileDialogRequest::open(Path::new("a.SGU")))
            .unwrap_err();
        assert!(matches!(err, DriverError::UnexpectedDialog { .. }));
        assert_eq!(desktop.calls().len(), 3);
    }

    #[test]
    fn save_dialog_selects_format_first() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        open_file_dialog(&mut desktop.screen(), Target::RealBand);
        let clock = FakeClock::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let request = FileDialogRequest {
            path: temp.path().join("out.mid"),
            format: Some("MIDI File (.MID) (*.MID)".to_string()),
        };

        navigator(&desktop, &clock, &profile, &timing)
            .run_file_dialog(&request)
            .expect("dialog");
        assert_eq!(
            desktop.calls()[0],
            "select_item #32770/ComboBox2 MIDI File (.MID) (*.MID)"
        );
    }

    #[test]
    fn missing_dialog_times_out() {
        let profile = TargetProfile::band_in_a_box();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        let clock = FakeClock::new();

        let err = navigator(&desktop, &clock, &profile, &timing)
            .run_file_dialog(&FileDialogRequest::open(Path::new("a.SGU")))
            .unwrap_err();
        match err {
            DriverError::Timeout { what, waited, .. } => {
                assert_eq!(what, "dialog #32770");
                assert_eq!(waited, timing.dialog_policy().timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn settings_dialog_applies_steps_and_waits_for_close() {
        let profile = TargetProfile::realband();
        let timing = TimingConfig::default();
        let desktop = FakeDesktop::with_app(&profile);
        desktop.select_menu(WindowId(1), "Edit->Key Signature").expect("menu");
        let clock = FakeClock::new();

        navigator(&desktop, &clock, &profile, &timing)
            .run_settings_dialog(
                "TKEY",
                &[
                    DialogStep::Select(Control::nth("TComboBox", 1), "Eb".to_string()),
                    DialogStep::Click(Control::nth("TRadioButton", 4)),
                    DialogStep::Confirm(Control::nth("TButton", 3)),
                ],
            )
            .expect("settings");
        assert!(desktop.screen().find_class("TKEY").is_none());
        assert_eq!(
            desktop.screen().menu("Edit->Key Signature").map(|item| item.label.clone()),
            Some("Key Signature [Eb]".to_string())
        );
    }
}
