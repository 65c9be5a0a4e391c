//! The public operation set over one running target.
//!
//! A [`Session`] owns the bookkeeping (profile, timing, process, state, current
//! file) and borrows the three seams. Components are built on demand for each
//! operation, so nothing about the window tree outlives a call.
//!
//! Every operation runs `Ready -> Busy -> Ready`. A failure while `Busy` means
//! the target is in an unknown state: the session becomes `Dead` and only
//! [`Session::shutdown`] is accepted. Argument checks happen before `Busy`, so
//! a rejected request leaves the session usable.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::core::keys::parse_keys;
use crate::core::naming::screenshot_file_name;
use crate::core::params::{Parameter, ParameterValue, parse_label, validate_value};
use crate::core::poll::Clock;
use crate::core::state::SessionState;
use crate::dialog::{DialogNavigator, DialogStep, FileDialogRequest};
use crate::dispatch::{CommandDispatcher, PendingAction};
use crate::error::{DriverError, UiError};
use crate::io::config::{DriverConfig, Target, TargetProfile, TimingConfig};
use crate::io::desktop::{Control, Desktop, WindowQuery};
use crate::io::process::{self, ProcessHost, TargetProcess};
use crate::io::screenshot::write_png;
use crate::readiness::ReadinessMonitor;

const SONG_SETTINGS_DIALOG: &str = "TSONGSETTINGSDIALOG";
const TITLE_DIALOG: &str = "TSONGSETDIALOG";
const ENDING_CHECKBOX: Control = Control::titled("TCheckBox", "&Generate 2 bar Ending for this song");
const ALIASES_CHECKBOX: Control = Control::titled(
    "TCheckBox",
    "Allow Style Aliases (auto-substtution of style) for this song",
);
const TITLE_BUTTON: Control = Control::titled("TButton", "T&itle/Chorus");
const OK_BUTTON: Control = Control::titled("TButton", "&OK");
const TEMPO_EDIT: Control = Control::nth("TEdit", 3);
const LAST_BAR_EDIT: Control = Control::nth("TEdit", 1);

/// Song-form values written by [`Session::configure_song_form`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SongForm {
    pub tempo: u32,
    pub last_bar: u32,
}

impl Default for SongForm {
    fn default() -> Self {
        Self {
            tempo: 120,
            last_bar: 252,
        }
    }
}

pub struct Session<'a, D: ?Sized, H: ?Sized, C: ?Sized> {
    desktop: &'a D,
    host: &'a H,
    clock: &'a C,
    profile: TargetProfile,
    timing: TimingConfig,
    process: TargetProcess,
    version: Option<String>,
    state: SessionState,
    current_file: Option<PathBuf>,
}

impl<'a, D, H, C> Session<'a, D, H, C>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    /// Attach to (or launch) the target and wait until its main window is
    /// ready.
    ///
    /// A target launched here is killed again when it never becomes ready, so
    /// a failed connect leaves nothing running.
    #[instrument(skip_all, fields(target = %target, prefer_attach = prefer_attach))]
    pub fn connect(
        config: &DriverConfig,
        target: Target,
        desktop: &'a D,
        host: &'a H,
        clock: &'a C,
        prefer_attach: bool,
    ) -> Result<Self, DriverError> {
        let profile = config.profile(target);
        let timing = config.timing.clone();
        info!(state = %SessionState::Launching, "connecting");
        let version = process::check_version(host, &profile);
        let process = process::attach_or_launch(host, clock, &profile, &timing, prefer_attach)?;

        let mut session = Self {
            desktop,
            host,
            clock,
            profile,
            timing,
            process,
            version,
            state: SessionState::Launching,
            current_file: None,
        };
        let startup = session.timing.startup_policy();
        if let Err(err) = session.readiness().wait_ready(startup) {
            if session.process.launched
                && let Err(kill_err) = process::kill(session.host, &session.process)
            {
                warn!(err = %kill_err, "could not clean up unready target");
            }
            return Err(err);
        }
        session.state = SessionState::Ready;
        info!(pid = session.process.pid, "session ready");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> Target {
        self.profile.target
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn process(&self) -> &TargetProcess {
        &self.process
    }

    /// Version read from the executable, if it was readable.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// File most recently loaded through [`Session::load`].
    pub fn current_file(&self) -> Option<&Path> {
        self.current_file.as_deref()
    }

    fn readiness(&self) -> ReadinessMonitor<'_, D, C> {
        ReadinessMonitor::new(self.desktop, self.clock, &self.profile, self.process.pid)
    }

    fn dispatcher(&self) -> CommandDispatcher<'_, D, C> {
        CommandDispatcher::new(
            self.desktop,
            self.clock,
            &self.profile,
            &self.timing,
            self.process.pid,
        )
    }

    fn navigator(&self) -> DialogNavigator<'_, D, C> {
        DialogNavigator::new(
            self.desktop,
            self.clock,
            &self.profile,
            &self.timing,
            self.process.pid,
        )
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), DriverError> {
        if self.state.accepts_operations() {
            Ok(())
        } else {
            Err(DriverError::SessionUnavailable {
                operation,
                state: self.state,
            })
        }
    }

    fn unsupported(&self, operation: &'static str) -> DriverError {
        DriverError::Unsupported {
            operation,
            target: self.profile.target,
        }
    }

    /// Run `body` as one `Busy` stretch.
    fn run<T>(
        &mut self,
        operation: &'static str,
        body: impl FnOnce(&mut Self) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        self.ensure_ready(operation)?;
        self.state = SessionState::Busy;
        match body(self) {
            Ok(value) => {
                self.state = SessionState::Ready;
                Ok(value)
            }
            Err(err) => {
                warn!(operation, err = %err, "operation failed, session is dead");
                self.state = SessionState::Dead;
                Err(err)
            }
        }
    }

    fn invoke_menu(&self, path: &str) -> Result<(), DriverError> {
        self.dispatcher()
            .invoke(&PendingAction::menu(path, &self.timing))
    }

    /// Minimize windows the target pops up after loading. Absent windows are
    /// fine.
    fn minimize_incidental(&self) -> Result<(), DriverError> {
        for title in &self.profile.incidental_windows {
            let found = self
                .desktop
                .find_window(self.process.pid, &WindowQuery::title(title))?;
            if let Some(window) = found {
                match self.desktop.minimize(window) {
                    Ok(()) => {}
                    Err(UiError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    /// Open a song file.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(&mut self, path: &Path) -> Result<(), DriverError> {
        self.run("load", |session| {
            session.invoke_menu(&session.profile.open_menu)?;
            session
                .navigator()
                .run_file_dialog(&FileDialogRequest::open(path))?;
            session.minimize_incidental()?;
            session.current_file = Some(path.to_path_buf());
            Ok(())
        })
    }

    /// Save the current song, optionally picking an output format in the
    /// save dialog.
    #[instrument(skip_all, fields(path = %path.display(), format = ?format))]
    pub fn save(&mut self, path: &Path, format: Option<&str>) -> Result<(), DriverError> {
        if format.is_some() && !self.profile.save_formats {
            return Err(self.unsupported("choose a save format"));
        }
        let request = FileDialogRequest {
            path: path.to_path_buf(),
            format: format.map(str::to_string),
        };
        self.run("save", |session| {
            session.invoke_menu(&session.profile.save_menu)?;
            session.navigator().run_file_dialog(&request)?;
            Ok(())
        })
    }

    /// Load a style file through the song pane's popup menu.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_style(&mut self, path: &Path) -> Result<(), DriverError> {
        let Some(popup) = self.profile.style_popup.clone() else {
            return Err(self.unsupported("load style"));
        };
        self.run("load style", |session| {
            let navigator = session.navigator();
            navigator.run_popup(&popup)?;
            navigator.run_file_dialog(&FileDialogRequest::open(path))?;
            Ok(())
        })
    }

    /// Render the accompaniment tracks.
    pub fn generate(&mut self) -> Result<(), DriverError> {
        let Some(menu) = self.profile.generate_menu.clone() else {
            return Err(self.unsupported("generate"));
        };
        self.run("generate", |session| {
            session.invoke_menu(&menu)?;
            session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            Ok(())
        })
    }

    /// Current value of a song parameter, read from its menu label.
    pub fn get_parameter(&mut self, parameter: Parameter) -> Result<ParameterValue, DriverError> {
        if !self.profile.menu_parameters {
            return Err(self.unsupported("read song parameters"));
        }
        let spec = parameter.spec();
        let label = self.run("get parameter", |session| {
            session.dispatcher().query_text(spec.menu_path)
        })?;
        parse_label(parameter, &label)
    }

    /// Change a song parameter through its settings dialog.
    #[instrument(skip_all, fields(parameter = %parameter, value = value))]
    pub fn set_parameter(&mut self, parameter: Parameter, value: &str) -> Result<(), DriverError> {
        if !self.profile.menu_parameters {
            return Err(self.unsupported("write song parameters"));
        }
        let spec = parameter.spec();
        let Some(recipe) = &spec.setter else {
            return Err(DriverError::ReadOnlyParameter { parameter });
        };
        validate_value(parameter, value)?;

        let (class, ordinal) = recipe.value_control;
        let mut steps = vec![DialogStep::Select(
            Control::nth(class, ordinal),
            value.to_string(),
        )];
        // The last click is the dialog's OK.
        let last = recipe.confirm_clicks.len().saturating_sub(1);
        for (index, &(class, ordinal)) in recipe.confirm_clicks.iter().enumerate() {
            let control = Control::nth(class, ordinal);
            steps.push(if index == last {
                DialogStep::Confirm(control)
            } else {
                DialogStep::Click(control)
            });
        }
        self.run("set parameter", |session| {
            session.invoke_menu(spec.menu_path)?;
            session
                .navigator()
                .run_settings_dialog(recipe.dialog_class, &steps)?;
            session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            Ok(())
        })
    }

    /// Activate an arbitrary menu item (`Top->Sub->Item`).
    pub fn select_menu(&mut self, path: &str) -> Result<(), DriverError> {
        self.run("select menu", |session| session.invoke_menu(path))
    }

    /// Type a key sequence such as `{HOME}p` into the chord-sheet grid.
    #[instrument(skip_all, fields(keys = sequence))]
    pub fn send_grid_keys(&mut self, sequence: &str) -> Result<(), DriverError> {
        let Some(grid_class) = self.profile.grid_class.clone() else {
            return Err(self.unsupported("send grid keys"));
        };
        let keys = parse_keys(sequence).map_err(|err| DriverError::InvalidValue {
            parameter: "key sequence".to_string(),
            value: format!("{sequence} ({err})"),
        })?;
        let grid = Control::owned_nth(&grid_class, 1);
        self.run("send grid keys", |session| {
            let window = session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            session.desktop.send_keys(window, &grid, &keys)?;
            Ok(())
        })
    }

    /// Fill in the song settings dialog: no generated ending, no style
    /// aliases, then tempo and last bar in the title/chorus dialog.
    #[instrument(skip_all, fields(tempo = form.tempo, last_bar = form.last_bar))]
    pub fn configure_song_form(&mut self, form: &SongForm) -> Result<(), DriverError> {
        let Some(menu) = self.profile.song_settings_menu.clone() else {
            return Err(self.unsupported("configure song form"));
        };
        self.run("configure song form", |session| {
            session.invoke_menu(&menu)?;
            let navigator = session.navigator();
            navigator.run_settings_dialog(
                SONG_SETTINGS_DIALOG,
                &[
                    DialogStep::Check(ENDING_CHECKBOX, false),
                    DialogStep::Check(ALIASES_CHECKBOX, false),
                    DialogStep::Click(TITLE_BUTTON),
                ],
            )?;
            navigator.run_settings_dialog(
                TITLE_DIALOG,
                &[
                    DialogStep::SetText(TEMPO_EDIT, form.tempo.to_string()),
                    DialogStep::SetText(LAST_BAR_EDIT, form.last_bar.to_string()),
                    DialogStep::Confirm(OK_BUTTON),
                ],
            )?;
            navigator.run_settings_dialog(SONG_SETTINGS_DIALOG, &[DialogStep::Confirm(OK_BUTTON)])?;
            session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            Ok(())
        })
    }

    /// Save a PNG of the main window into `dir`, named after `source`.
    pub fn capture_screenshot(&mut self, dir: &Path, source: &str) -> Result<PathBuf, DriverError> {
        let path = dir.join(screenshot_file_name(source));
        self.run("capture screenshot", |session| {
            let window = session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            let shot = session.desktop.capture(window)?;
            write_png(&path, &shot)?;
            Ok(path)
        })
    }

    /// Block until the main window accepts input again.
    pub fn wait_ready(&mut self) -> Result<(), DriverError> {
        self.run("wait ready", |session| {
            session
                .readiness()
                .wait_ready(session.timing.ready_policy())?;
            Ok(())
        })
    }

    /// Kill the target and its helpers. The session accepts nothing afterwards.
    #[instrument(skip_all, fields(pid = self.process.pid))]
    pub fn shutdown(&mut self) -> Result<(), DriverError> {
        if !self.state.accepts_shutdown() {
            return Err(DriverError::SessionUnavailable {
                operation: "shutdown",
                state: self.state,
            });
        }
        match process::kill(self.host, &self.process) {
            Ok(()) => {
                self.state = SessionState::Disconnected;
                self.current_file = None;
                info!("session shut down");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Dead;
                Err(err)
            }
        }
    }
}
