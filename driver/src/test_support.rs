//! Scripted fakes for the driver's seams: virtual time, a simulated desktop,
//! and an in-memory process table.
//!
//! [`FakeDesktop`] models just enough of the target applications to exercise
//! every session operation: windows with typed child controls, a menu table,
//! a popup menu, and hooks that run when the driver clicks, types, or selects
//! something (usually opening or closing a dialog).

use std::cell::{Cell, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::keys::Key;
use crate::core::poll::Clock;
use crate::error::{ProcessError, UiError};
use crate::io::config::{Target, TargetProfile};
use crate::io::desktop::{
    Control, ControlSelector, Desktop, Screenshot, WindowId, WindowQuery, WindowState,
};
use crate::io::process::{ProcessHost, ProcessInfo};

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug)]
pub struct FakeClock {
    start: Instant,
    offset: Cell<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Callback run against the simulated screen after a driver action.
pub type Hook = Rc<dyn Fn(&mut FakeScreen)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeControl {
    pub class: String,
    pub text: String,
    pub enabled: bool,
    pub checked: bool,
    /// Combo box entries.
    pub items: Vec<String>,
    pub selected: Option<String>,
}

impl FakeControl {
    pub fn new(class: &str, text: &str) -> Self {
        Self {
            class: class.to_string(),
            text: text.to_string(),
            enabled: true,
            checked: false,
            items: Vec::new(),
            selected: None,
        }
    }

    pub fn with_items(mut self, items: &[&str]) -> Self {
        self.items = items.iter().map(|item| item.to_string()).collect();
        self
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeWindow {
    /// `None` matches every pid, so one scripted app survives relaunches.
    pub pid: Option<u32>,
    pub class: String,
    pub title: String,
    pub visible: bool,
    pub enabled: bool,
    pub alive: bool,
    /// Remaining `window_state` probes that report the window disabled.
    pub busy_polls: u32,
    pub minimized: bool,
    pub controls: Vec<FakeControl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeMenuItem {
    pub label: String,
    pub enabled: bool,
}

/// Mutable state behind [`FakeDesktop`].
#[derive(Default)]
pub struct FakeScreen {
    windows: Vec<FakeWindow>,
    menus: BTreeMap<String, FakeMenuItem>,
    popup: Option<Vec<String>>,
    failures: HashMap<&'static str, VecDeque<UiError>>,
    calls: Vec<String>,
    menu_hooks: HashMap<String, Hook>,
    click_hooks: HashMap<String, Hook>,
    click_at_hooks: HashMap<String, Hook>,
    key_hooks: HashMap<String, Hook>,
    popup_hooks: HashMap<String, Hook>,
}

fn hook_key(window_class: &str, control: &str) -> String {
    format!("{window_class}/{control}")
}

fn render_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(|key| match key {
            Key::Char(ch) => ch.to_string(),
            other => format!("{{{}}}", format!("{other:?}").to_uppercase()),
        })
        .collect()
}

impl FakeScreen {
    /// Open a visible, enabled top-level window.
    pub fn open_window(&mut self, pid: Option<u32>, class: &str, title: &str) -> WindowId {
        self.windows.push(FakeWindow {
            pid,
            class: class.to_string(),
            title: title.to_string(),
            visible: true,
            enabled: true,
            alive: true,
            busy_polls: 0,
            minimized: false,
            controls: Vec::new(),
        });
        WindowId(self.windows.len() as isize)
    }

    pub fn add_control(&mut self, window: WindowId, control: FakeControl) {
        if let Some(target) = self.window_mut(window) {
            target.controls.push(control);
        }
    }

    pub fn window(&self, window: WindowId) -> Option<&FakeWindow> {
        usize::try_from(window.0 - 1)
            .ok()
            .and_then(|index| self.windows.get(index))
    }

    pub fn window_mut(&mut self, window: WindowId) -> Option<&mut FakeWindow> {
        usize::try_from(window.0 - 1)
            .ok()
            .and_then(|index| self.windows.get_mut(index))
    }

    /// Most recently opened live window of `class`.
    pub fn find_class(&self, class: &str) -> Option<WindowId> {
        self.windows
            .iter()
            .enumerate()
            .rev()
            .find(|(_, window)| window.alive && window.class == class)
            .map(|(index, _)| WindowId(index as isize + 1))
    }

    pub fn close_window(&mut self, window: WindowId) {
        if let Some(target) = self.window_mut(window) {
            target.alive = false;
        }
    }

    /// Close the newest live window of `class`, if any.
    pub fn close_class(&mut self, class: &str) {
        if let Some(window) = self.find_class(class) {
            self.close_window(window);
        }
    }

    pub fn set_busy(&mut self, window: WindowId, polls: u32) {
        if let Some(target) = self.window_mut(window) {
            target.busy_polls = polls;
        }
    }

    pub fn set_menu(&mut self, path: &str, label: &str, enabled: bool) {
        self.menus.insert(
            path.to_string(),
            FakeMenuItem {
                label: label.to_string(),
                enabled,
            },
        );
    }

    pub fn menu(&self, path: &str) -> Option<&FakeMenuItem> {
        self.menus.get(path)
    }

    pub fn show_popup(&mut self, items: &[&str]) {
        self.popup = Some(items.iter().map(|item| item.to_string()).collect());
    }

    /// Queue failures returned by the next calls of `operation`.
    pub fn fail(&mut self, operation: &'static str, errors: Vec<UiError>) {
        self.failures.entry(operation).or_default().extend(errors);
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Control state lookup by class and selector.
    pub fn control(&self, window: WindowId, control: &Control) -> Option<&FakeControl> {
        let target = self.window(window).filter(|w| w.alive)?;
        let index = Self::control_index(target, control)?;
        target.controls.get(index)
    }

    fn control_index(window: &FakeWindow, control: &Control) -> Option<usize> {
        let mut ordinal = 0usize;
        for (index, candidate) in window.controls.iter().enumerate() {
            if candidate.class != control.class {
                continue;
            }
            match &control.selector {
                ControlSelector::Nth(wanted) => {
                    ordinal += 1;
                    if ordinal == *wanted {
                        return Some(index);
                    }
                }
                ControlSelector::Titled(title) => {
                    if candidate.text == *title {
                        return Some(index);
                    }
                }
            }
        }
        None
    }

    fn take_failure(&mut self, operation: &'static str) -> Result<(), UiError> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn control_mut(
        &mut self,
        window: WindowId,
        control: &Control,
    ) -> Result<(String, &mut FakeControl), UiError> {
        let missing = || UiError::NotFound(control.to_string());
        let target = self
            .window_mut(window)
            .filter(|w| w.alive)
            .ok_or_else(missing)?;
        let index = Self::control_index(target, control).ok_or_else(missing)?;
        let class = target.class.clone();
        Ok((class, &mut target.controls[index]))
    }

    fn enabled_control_mut(
        &mut self,
        window: WindowId,
        control: &Control,
    ) -> Result<(String, &mut FakeControl), UiError> {
        let (class, found) = self.control_mut(window, control)?;
        if !found.enabled {
            return Err(UiError::Disabled(control.to_string()));
        }
        Ok((class, found))
    }
}

/// Scripted [`Desktop`].
#[derive(Default)]
pub struct FakeDesktop {
    screen: RefCell<FakeScreen>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self) -> RefMut<'_, FakeScreen> {
        self.screen.borrow_mut()
    }

    pub fn calls(&self) -> Vec<String> {
        self.screen.borrow().calls.clone()
    }

    pub fn on_menu(&self, path: &str, hook: impl Fn(&mut FakeScreen) + 'static) {
        self.screen().menu_hooks.insert(path.to_string(), Rc::new(hook));
    }

    pub fn on_click(&self, window_class: &str, control: &Control, hook: impl Fn(&mut FakeScreen) + 'static) {
        self.screen()
            .click_hooks
            .insert(hook_key(window_class, &control.to_string()), Rc::new(hook));
    }

    pub fn on_click_at(&self, window_class: &str, control: &Control, hook: impl Fn(&mut FakeScreen) + 'static) {
        self.screen()
            .click_at_hooks
            .insert(hook_key(window_class, &control.to_string()), Rc::new(hook));
    }

    pub fn on_keys(&self, window_class: &str, control: &Control, hook: impl Fn(&mut FakeScreen) + 'static) {
        self.screen()
            .key_hooks
            .insert(hook_key(window_class, &control.to_string()), Rc::new(hook));
    }

    pub fn on_popup(&self, item: &str, hook: impl Fn(&mut FakeScreen) + 'static) {
        self.screen().popup_hooks.insert(item.to_string(), Rc::new(hook));
    }

    fn run_hook(&self, hook: Option<Hook>) {
        if let Some(hook) = hook {
            hook(&mut self.screen.borrow_mut());
        }
    }

    /// A desktop showing `profile`'s main window with its menus and dialogs
    /// scripted: file dialogs close on Enter, settings dialogs close on OK.
    pub fn with_app(profile: &TargetProfile) -> Self {
        let desktop = Self::new();
        let main = {
            let mut screen = desktop.screen();
            let main = screen.open_window(None, &profile.main_window_class, &profile.target.to_string());
            screen.set_menu(&profile.open_menu, "&Open...", true);
            screen.set_menu(&profile.save_menu, "Save &As...", true);
            if let Some(generate) = &profile.generate_menu {
                screen.set_menu(generate, "Generate All BB Tracks", true);
            }
            if let Some(settings) = &profile.song_settings_menu {
                screen.set_menu(settings, "Settings (for This Song)", true);
            }
            if profile.menu_parameters {
                screen.set_menu("Edit->Key Signature", "Key Signature [C]", true);
                screen.set_menu("Edit->Meter (Time Signature)", "Meter (Time Signature) [4/4]", true);
                screen.set_menu("Edit->Tempo", "Tempo [120]", true);
            }
            if let Some(grid) = &profile.grid_class {
                screen.add_control(main, FakeControl::new(grid, ""));
            }
            if let Some(popup) = &profile.style_popup {
                for _ in 0..popup.anchor_ordinal {
                    screen.add_control(main, FakeControl::new(&popup.anchor_class, ""));
                }
            }
            main
        };

        desktop.script_file_dialog(&profile.open_menu, profile.target);
        desktop.script_file_dialog(&profile.save_menu, profile.target);
        if let Some(generate) = &profile.generate_menu {
            desktop.on_menu(generate, move |screen| screen.set_busy(main, 2));
        }
        if let Some(popup) = &profile.style_popup {
            let item = popup.item.clone();
            let anchor = Control::owned_nth(&popup.anchor_class, popup.anchor_ordinal);
            desktop.on_click_at(&profile.main_window_class, &anchor, move |screen| {
                screen.show_popup(&["File Open Song", item.as_str()]);
            });
            let target = profile.target;
            desktop.on_popup(&popup.item, move |screen| open_file_dialog(screen, target));
        }
        if profile.menu_parameters {
            desktop.script_key_dialog();
        }
        if let Some(settings) = &profile.song_settings_menu {
            desktop.script_song_settings(settings);
        }
        desktop
    }

    /// `menu` opens a file dialog; Enter in its path field closes it.
    pub fn script_file_dialog(&self, menu: &str, target: Target) {
        self.on_menu(menu, move |screen| open_file_dialog(screen, target));
        self.on_keys("#32770", &Control::nth("Edit", 1), |screen| {
            screen.close_class("#32770");
        });
    }

    /// The key settings dialog: OK copies the chosen key into the menu label.
    fn script_key_dialog(&self) {
        self.on_menu("Edit->Key Signature", |screen| {
            let dialog = screen.open_window(None, "TKEY", "Key Signature");
            screen.add_control(
                dialog,
                FakeControl::new("TComboBox", "C").with_items(&[
                    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
                ]),
            );
            for label in ["Transpose", "Transpose up", "Transpose down", "No Transpose"] {
                screen.add_control(dialog, FakeControl::new("TRadioButton", label));
            }
            for label in ["Cancel", "Help", "OK"] {
                screen.add_control(dialog, FakeControl::new("TButton", label));
            }
        });
        self.on_click("TKEY", &Control::nth("TButton", 3), |screen| {
            if let Some(dialog) = screen.find_class("TKEY") {
                let chosen = screen
                    .control(dialog, &Control::nth("TComboBox", 1))
                    .and_then(|combo| combo.selected.clone());
                if let Some(key) = chosen {
                    screen.set_menu("Edit->Key Signature", &format!("Key Signature [{key}]"), true);
                }
                screen.close_window(dialog);
            }
        });
    }

    /// Band-in-a-Box song settings and the nested title/chorus dialog.
    fn script_song_settings(&self, menu: &str) {
        self.on_menu(menu, |screen| {
            let dialog = screen.open_window(None, "TSONGSETTINGSDIALOG", "Song Settings");
            screen.add_control(
                dialog,
                FakeControl::new("TCheckBox", "&Generate 2 bar Ending for this song").checked(),
            );
            screen.add_control(
                dialog,
                FakeControl::new(
                    "TCheckBox",
                    "Allow Style Aliases (auto-substtution of style) for this song",
                )
                .checked(),
            );
            screen.add_control(dialog, FakeControl::new("TButton", "T&itle/Chorus"));
            screen.add_control(dialog, FakeControl::new("TButton", "&OK"));
        });
        self.on_click("TSONGSETTINGSDIALOG", &Control::titled("TButton", "T&itle/Chorus"), |screen| {
            let dialog = screen.open_window(None, "TSONGSETDIALOG", "Song Title / Chorus");
            for _ in 0..3 {
                screen.add_control(dialog, FakeControl::new("TEdit", ""));
            }
            screen.add_control(dialog, FakeControl::new("TButton", "&OK"));
        });
        self.on_click("TSONGSETDIALOG", &Control::titled("TButton", "&OK"), |screen| {
            screen.close_class("TSONGSETDIALOG");
        });
        self.on_click("TSONGSETTINGSDIALOG", &Control::titled("TButton", "&OK"), |screen| {
            screen.close_class("TSONGSETTINGSDIALOG");
        });
    }
}

/// Open a system file dialog with the controls the driver addresses.
pub fn open_file_dialog(screen: &mut FakeScreen, target: Target) {
    let dialog = screen.open_window(None, "#32770", "Open");
    screen.add_control(dialog, FakeControl::new("Static", "File name:"));
    screen.add_control(dialog, FakeControl::new("Static", ""));
    screen.add_control(dialog, FakeControl::new("Edit", ""));
    screen.add_control(dialog, FakeControl::new("ComboBox", ""));
    if target == Target::RealBand {
        screen.add_control(
            dialog,
            FakeControl::new("ComboBox", "").with_items(&[
                "RealBand Sequence (*.SEQ)",
                "MIDI File (.MID) (*.MID)",
                "Wave File (*.WAV)",
            ]),
        );
    }
    screen.add_control(dialog, FakeControl::new("Button", "&Save"));
    screen.add_control(dialog, FakeControl::new("Button", "Cancel"));
}

/// Open the "save changes?" message box; `Button2` dismisses it.
pub fn open_discard_prompt(screen: &mut FakeScreen) -> WindowId {
    let dialog = screen.open_window(None, "#32770", "Band-in-a-Box");
    screen.add_control(dialog, FakeControl::new("Static", ""));
    screen.add_control(
        dialog,
        FakeControl::new("Static", "This song has been changed. Save it?"),
    );
    screen.add_control(dialog, FakeControl::new("Button", "&Yes"));
    screen.add_control(dialog, FakeControl::new("Button", "&No"));
    dialog
}

impl Desktop for FakeDesktop {
    fn find_window(&self, pid: u32, query: &WindowQuery) -> Result<Option<WindowId>, UiError> {
        let mut screen = self.screen();
        screen.take_failure("find_window")?;
        let found = screen
            .windows
            .iter()
            .enumerate()
            .rev()
            .find(|(_, window)| {
                window.alive
                    && window.pid.is_none_or(|owner| owner == pid)
                    && query.class.as_ref().is_none_or(|class| *class == window.class)
                    && query.title.as_ref().is_none_or(|title| *title == window.title)
            })
            .map(|(index, _)| WindowId(index as isize + 1));
        Ok(found)
    }

    fn window_state(&self, window: WindowId) -> Result<Option<WindowState>, UiError> {
        let mut screen = self.screen();
        screen.take_failure("window_state")?;
        let Some(target) = screen.window_mut(window).filter(|w| w.alive) else {
            return Ok(None);
        };
        let busy = target.busy_polls > 0;
        target.busy_polls = target.busy_polls.saturating_sub(1);
        Ok(Some(WindowState {
            visible: target.visible,
            enabled: target.enabled && !busy,
        }))
    }

    fn control_text(&self, window: WindowId, control: &Control) -> Result<Option<String>, UiError> {
        let mut screen = self.screen();
        screen.take_failure("control_text")?;
        Ok(screen.control(window, control).map(|found| found.text.clone()))
    }

    fn click(&self, window: WindowId, control: &Control) -> Result<(), UiError> {
        let hook = {
            let mut screen = self.screen();
            screen.take_failure("click")?;
            let (class, _) = screen.enabled_control_mut(window, control)?;
            let key = hook_key(&class, &control.to_string());
            screen.calls.push(format!("click {key}"));
            screen.click_hooks.get(&key).cloned()
        };
        self.run_hook(hook);
        Ok(())
    }

    fn click_at(&self, window: WindowId, control: &Control, x: i32, y: i32) -> Result<(), UiError> {
        let hook = {
            let mut screen = self.screen();
            screen.take_failure("click_at")?;
            let (class, _) = screen.enabled_control_mut(window, control)?;
            let key = hook_key(&class, &control.to_string());
            screen.calls.push(format!("click_at {key} ({x},{y})"));
            screen.click_at_hooks.get(&key).cloned()
        };
        self.run_hook(hook);
        Ok(())
    }

    fn set_text(&self, window: WindowId, control: &Control, text: &str) -> Result<(), UiError> {
        let mut screen = self.screen();
        screen.take_failure("set_text")?;
        let (class, found) = screen.control_mut(window, control)?;
        found.text = text.to_string();
        let key = hook_key(&class, &control.to_string());
        screen.calls.push(format!("set_text {key} {text}"));
        Ok(())
    }

    fn set_checked(&self, window: WindowId, control: &Control, checked: bool) -> Result<(), UiError> {
        let mut screen = self.screen();
        screen.take_failure("set_checked")?;
        let (class, found) = screen.enabled_control_mut(window, control)?;
        found.checked = checked;
        let key = hook_key(&class, &control.to_string());
        screen.calls.push(format!("set_checked {key} {checked}"));
        Ok(())
    }

    fn select_item(&self, window: WindowId, control: &Control, item: &str) -> Result<(), UiError> {
        let mut screen = self.screen();
        screen.take_failure("select_item")?;
        let (class, found) = screen.enabled_control_mut(window, control)?;
        if !found.items.iter().any(|entry| entry == item) {
            return Err(UiError::NotFound(format!("{item:?} in {control}")));
        }
        found.selected = Some(item.to_string());
        found.text = item.to_string();
        let key = hook_key(&class, &control.to_string());
        screen.calls.push(format!("select_item {key} {item}"));
        Ok(())
    }

    fn send_keys(&self, window: WindowId, control: &Control, keys: &[Key]) -> Result<(), UiError> {
        let hook = {
            let mut screen = self.screen();
            screen.take_failure("send_keys")?;
            let (class, _) = screen.control_mut(window, control)?;
            let key = hook_key(&class, &control.to_string());
            screen.calls.push(format!("send_keys {key} {}", render_keys(keys)));
            if keys.last() == Some(&Key::Enter) {
                screen.key_hooks.get(&key).cloned()
            } else {
                None
            }
        };
        self.run_hook(hook);
        Ok(())
    }

    fn select_menu(&self, _window: WindowId, path: &str) -> Result<(), UiError> {
        let hook = {
            let mut screen = self.screen();
            screen.take_failure("select_menu")?;
            let Some(item) = screen.menus.get(path) else {
                return Err(UiError::NotFound(path.to_string()));
            };
            if !item.enabled {
                return Err(UiError::Disabled(path.to_string()));
            }
            screen.calls.push(format!("select_menu {path}"));
            screen.menu_hooks.get(path).cloned()
        };
        self.run_hook(hook);
        Ok(())
    }

    fn menu_item_text(&self, _window: WindowId, path: &str) -> Result<String, UiError> {
        let mut screen = self.screen();
        screen.take_failure("menu_item_text")?;
        screen
            .menus
            .get(path)
            .map(|item| item.label.clone())
            .ok_or_else(|| UiError::NotFound(path.to_string()))
    }

    fn select_popup_item(&self, _pid: u32, item: &str) -> Result<(), UiError> {
        let hook = {
            let mut screen = self.screen();
            screen.take_failure("select_popup_item")?;
            let shown = screen
                .popup
                .as_ref()
                .is_some_and(|items| items.iter().any(|entry| entry == item));
            if !shown {
                return Err(UiError::NotFound(format!("popup item {item:?}")));
            }
            screen.popup = None;
            screen.calls.push(format!("select_popup_item {item}"));
            screen.popup_hooks.get(item).cloned()
        };
        self.run_hook(hook);
        Ok(())
    }

    fn minimize(&self, window: WindowId) -> Result<(), UiError> {
        let mut screen = self.screen();
        screen.take_failure("minimize")?;
        let Some(target) = screen.window_mut(window).filter(|w| w.alive) else {
            return Err(UiError::NotFound(format!("window {}", window.0)));
        };
        target.minimized = true;
        let title = target.title.clone();
        screen.calls.push(format!("minimize {title}"));
        Ok(())
    }

    fn capture(&self, window: WindowId) -> Result<Screenshot, UiError> {
        let mut screen = self.screen();
        screen.take_failure("capture")?;
        if screen.window(window).filter(|w| w.alive).is_none() {
            return Err(UiError::NotFound(format!("window {}", window.0)));
        }
        screen.calls.push("capture".to_string());
        Ok(Screenshot {
            width: 2,
            height: 2,
            rgba: vec![0x40; 16],
        })
    }
}

#[derive(Debug, Clone)]
struct FakeProcess {
    pid: u32,
    exe: PathBuf,
    name: String,
    running: bool,
    /// Stays listed after a successful kill, like a process still tearing down.
    lingers: bool,
    terminating: bool,
}

#[derive(Debug, Default)]
struct HostState {
    next_pid: u32,
    processes: Vec<FakeProcess>,
    spawned: Vec<PathBuf>,
    killed: Vec<u32>,
    cpu_samples: VecDeque<f32>,
    version: Option<String>,
}

/// In-memory [`ProcessHost`]. Spawned processes are idle unless CPU samples
/// are queued.
#[derive(Debug)]
pub struct FakeHost {
    state: RefCell<HostState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

fn image_name(exe: &Path) -> String {
    let raw = exe.to_string_lossy();
    raw.rsplit(['\\', '/']).next().unwrap_or_default().to_string()
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HostState {
                next_pid: 4000,
                ..HostState::default()
            }),
        }
    }

    /// Register an already-running process and return its pid.
    pub fn add_process(&self, exe: &str, name: &str) -> u32 {
        let mut state = self.state.borrow_mut();
        state.next_pid += 4;
        let pid = state.next_pid;
        state.processes.push(FakeProcess {
            pid,
            exe: PathBuf::from(exe),
            name: name.to_string(),
            running: true,
            lingers: false,
            terminating: false,
        });
        pid
    }

    /// Keep `pid` listed after it is killed. Killing it again fails while it
    /// finishes exiting.
    pub fn linger_on_kill(&self, pid: u32) {
        if let Some(process) = self
            .state
            .borrow_mut()
            .processes
            .iter_mut()
            .find(|process| process.pid == pid)
        {
            process.lingers = true;
        }
    }

    pub fn push_cpu_samples(&self, samples: &[f32]) {
        self.state.borrow_mut().cpu_samples.extend(samples.iter().copied());
    }

    pub fn set_version(&self, version: &str) {
        self.state.borrow_mut().version = Some(version.to_string());
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.state.borrow().spawned.clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.state.borrow().killed.clone()
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.state
            .borrow()
            .processes
            .iter()
            .any(|process| process.pid == pid && process.running)
    }
}

impl ProcessHost for FakeHost {
    fn find_by_path(&self, exe: &Path) -> Result<Option<u32>, ProcessError> {
        let wanted = exe.to_string_lossy();
        Ok(self
            .state
            .borrow()
            .processes
            .iter()
            .find(|process| {
                process.running && process.exe.to_string_lossy().eq_ignore_ascii_case(&wanted)
            })
            .map(|process| process.pid))
    }

    fn spawn(&self, exe: &Path) -> Result<u32, ProcessError> {
        let mut state = self.state.borrow_mut();
        state.next_pid += 4;
        let pid = state.next_pid;
        state.processes.push(FakeProcess {
            pid,
            exe: exe.to_path_buf(),
            name: image_name(exe),
            running: true,
            lingers: false,
            terminating: false,
        });
        state.spawned.push(exe.to_path_buf());
        Ok(pid)
    }

    fn cpu_usage(&self, pid: u32) -> Result<f32, ProcessError> {
        if !self.is_running(pid) {
            return Err(ProcessError::Gone { pid });
        }
        Ok(self.state.borrow_mut().cpu_samples.pop_front().unwrap_or(0.0))
    }

    fn list(&self) -> Result<Vec<ProcessInfo>, ProcessError> {
        Ok(self
            .state
            .borrow()
            .processes
            .iter()
            .filter(|process| process.running)
            .map(|process| ProcessInfo {
                pid: process.pid,
                name: process.name.clone(),
            })
            .collect())
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let mut state = self.state.borrow_mut();
        let Some(process) = state
            .processes
            .iter_mut()
            .find(|process| process.pid == pid && process.running)
        else {
            return Err(ProcessError::Gone { pid });
        };
        if process.terminating {
            process.running = false;
            return Err(ProcessError::KillFailed { pid });
        }
        if process.lingers {
            process.terminating = true;
        } else {
            process.running = false;
        }
        state.killed.push(pid);
        Ok(())
    }

    fn file_version(&self, exe: &Path) -> Result<String, ProcessError> {
        self.state
            .borrow()
            .version
            .clone()
            .ok_or_else(|| ProcessError::Version {
                path: exe.to_path_buf(),
                reason: "no version resource".to_string(),
            })
    }
}
