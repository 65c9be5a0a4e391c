//! Desktop automation capability layer.
//!
//! The [`Desktop`] trait is the set of UI-automation primitives the driver
//! consumes: window lookup, control inspection, clicks, and keystrokes. It
//! decouples the driver from the automation backend (Win32 messages on
//! Windows). Tests use a scripted desktop that simulates the target's windows
//! without a GUI.
//!
//! Lookups that may legitimately find nothing return `Ok(None)`; errors are
//! reserved for failures.

use std::borrow::Cow;
use std::fmt;

use crate::core::keys::Key;
use crate::error::UiError;

/// Opaque handle of a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

/// Criteria for locating a top-level window of the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    pub class: Option<String>,
    pub title: Option<String>,
}

impl WindowQuery {
    pub fn class(class: &str) -> Self {
        Self {
            class: Some(class.to_string()),
            title: None,
        }
    }

    pub fn title(title: &str) -> Self {
        Self {
            class: None,
            title: Some(title.to_string()),
        }
    }
}

impl fmt::Display for WindowQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.class, &self.title) {
            (Some(class), Some(title)) => write!(f, "{class} {title:?}"),
            (Some(class), None) => f.write_str(class),
            (None, Some(title)) => write!(f, "{title:?}"),
            (None, None) => f.write_str("any window"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSelector {
    /// 1-based position among descendants of the same class.
    Nth(usize),
    /// Exact window text, e.g. `&OK`.
    Titled(Cow<'static, str>),
}

/// A child control inside a window, named by class plus selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub class: Cow<'static, str>,
    pub selector: ControlSelector,
}

impl Control {
    pub const fn nth(class: &'static str, ordinal: usize) -> Self {
        Self {
            class: Cow::Borrowed(class),
            selector: ControlSelector::Nth(ordinal),
        }
    }

    pub const fn titled(class: &'static str, title: &'static str) -> Self {
        Self {
            class: Cow::Borrowed(class),
            selector: ControlSelector::Titled(Cow::Borrowed(title)),
        }
    }

    pub fn owned_nth(class: &str, ordinal: usize) -> Self {
        Self {
            class: Cow::Owned(class.to_string()),
            selector: ControlSelector::Nth(ordinal),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            ControlSelector::Nth(ordinal) => write!(f, "{}{}", self.class, ordinal),
            ControlSelector::Titled(title) => write!(f, "{} {:?}", self.class, title),
        }
    }
}

/// Observable flags of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub visible: bool,
    pub enabled: bool,
}

impl WindowState {
    /// A window that exists, is visible, and is enabled accepts input.
    pub fn is_ready(self) -> bool {
        self.visible && self.enabled
    }
}

/// Captured window pixels, 8-bit RGBA, row-major, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// UI-automation primitives over the windows of one process.
pub trait Desktop {
    /// Find a top-level window of process `pid`.
    fn find_window(&self, pid: u32, query: &WindowQuery) -> Result<Option<WindowId>, UiError>;

    /// Current flags of `window`, or `None` once it no longer exists.
    fn window_state(&self, window: WindowId) -> Result<Option<WindowState>, UiError>;

    /// Text of a child control, or `None` if the control is absent.
    fn control_text(&self, window: WindowId, control: &Control)
    -> Result<Option<String>, UiError>;

    fn click(&self, window: WindowId, control: &Control) -> Result<(), UiError>;

    /// Click at client coordinates inside a child control.
    fn click_at(&self, window: WindowId, control: &Control, x: i32, y: i32)
    -> Result<(), UiError>;

    fn set_text(&self, window: WindowId, control: &Control, text: &str) -> Result<(), UiError>;

    fn set_checked(&self, window: WindowId, control: &Control, checked: bool)
    -> Result<(), UiError>;

    /// Select the entry labelled `item` in a combo box.
    fn select_item(&self, window: WindowId, control: &Control, item: &str)
    -> Result<(), UiError>;

    fn send_keys(&self, window: WindowId, control: &Control, keys: &[Key]) -> Result<(), UiError>;

    /// Activate a menu item given as `Top->Sub->Item`.
    fn select_menu(&self, window: WindowId, path: &str) -> Result<(), UiError>;

    /// Current label of a menu item given as `Top->Sub->Item`.
    fn menu_item_text(&self, window: WindowId, path: &str) -> Result<String, UiError>;

    /// Choose `item` in the popup menu currently shown by process `pid`.
    fn select_popup_item(&self, pid: u32, item: &str) -> Result<(), UiError>;

    fn minimize(&self, window: WindowId) -> Result<(), UiError>;

    fn capture(&self, window: WindowId) -> Result<Screenshot, UiError>;
}

/// Split `File->Save As` into its segments.
pub fn menu_path_segments(path: &str) -> Vec<&str> {
    path.split("->").map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Normalize a menu label for matching: drop `&` mnemonics and the
/// tab-separated accelerator, trim, and lowercase.
pub fn normalize_menu_label(label: &str) -> String {
    let visible = label.split('\t').next().unwrap_or_default();
    visible.replace('&', "").trim().to_lowercase()
}

/// Whether a menu label matches a requested path segment.
///
/// Labels may carry live values after the name (`Key Signature [C]`), so a
/// label also matches when it starts with the segment.
pub fn menu_label_matches(label: &str, segment: &str) -> bool {
    let label = normalize_menu_label(label);
    let segment = normalize_menu_label(segment);
    label == segment || label.starts_with(&segment)
}

/// Position of the label that best matches `segment`: an exact match wins over
/// a prefix match, earlier entries win ties.
pub fn pick_menu_entry<S: AsRef<str>>(labels: &[S], segment: &str) -> Option<usize> {
    let wanted = normalize_menu_label(segment);
    labels
        .iter()
        .position(|label| normalize_menu_label(label.as_ref()) == wanted)
        .or_else(|| {
            labels
                .iter()
                .position(|label| menu_label_matches(label.as_ref(), segment))
        })
}
