//! Driver configuration (TOML) and the built-in target profiles.
//!
//! Everything that differs between Band-in-a-Box and RealBand (install path,
//! window classes, menu paths, helper image names, recovery dialogs) lives in a
//! [`TargetProfile`]. The configuration file only carries overrides; missing
//! fields keep the built-in values.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::poll::PollPolicy;

/// Which application a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    BandInABox,
    RealBand,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::BandInABox => f.write_str("Band-in-a-Box"),
            Target::RealBand => f.write_str("RealBand"),
        }
    }
}

/// Popup menu summoned by clicking inside a pane of the main window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupProfile {
    /// Class of the pane that receives the click.
    pub anchor_class: String,
    /// 1-based ordinal of the pane among siblings of `anchor_class`.
    pub anchor_ordinal: usize,
    /// Click position in the pane's client coordinates.
    pub x: i32,
    pub y: i32,
    /// Label of the popup item to choose.
    pub item: String,
}

/// Per-application constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProfile {
    pub target: Target,
    pub exe_path: PathBuf,
    /// Version the automation was written against; mismatches are advisory.
    pub known_version: String,
    /// Image names swept by `kill` (primary plus helper processes).
    pub image_names: Vec<String>,
    pub main_window_class: String,
    /// Class shared by the system file dialogs and message boxes.
    pub dialog_class: String,
    /// Caption fragment of the "save changes?" prompt.
    pub discard_phrase: String,
    /// Caption fragments of recovery prompts that are declined automatically.
    pub recovery_phrases: Vec<String>,
    pub open_menu: String,
    pub save_menu: String,
    pub generate_menu: Option<String>,
    /// The save dialog offers an output format combo box.
    pub save_formats: bool,
    /// Titles of windows that pop up after loading and get minimized.
    pub incidental_windows: Vec<String>,
    pub style_popup: Option<PopupProfile>,
    /// Key, meter, and tempo are readable from menu labels.
    pub menu_parameters: bool,
    /// Class of the chord-sheet grid that receives keystrokes.
    pub grid_class: Option<String>,
    pub song_settings_menu: Option<String>,
}

impl TargetProfile {
    pub fn band_in_a_box() -> Self {
        Self {
            target: Target::BandInABox,
            exe_path: PathBuf::from(r"C:\bb\bbw.exe"),
            known_version: "2018.0.0.520".to_string(),
            image_names: vec!["bbw.exe".to_string()],
            main_window_class: "TBandWindow".to_string(),
            dialog_class: "#32770".to_string(),
            discard_phrase: "Save it?".to_string(),
            recovery_phrases: Vec::new(),
            open_menu: "File->Open".to_string(),
            save_menu: "File->Save song As".to_string(),
            generate_menu: None,
            save_formats: false,
            incidental_windows: Vec::new(),
            style_popup: None,
            menu_parameters: false,
            grid_class: Some("TCS".to_string()),
            song_settings_menu: Some("Edit->Song Form->Settings (for This Song)".to_string()),
        }
    }

    pub fn realband() -> Self {
        Self {
            target: Target::RealBand,
            exe_path: PathBuf::from(r"C:\RealBand\RealBand.exe"),
            known_version: "2018.0.2.5".to_string(),
            image_names: vec!["bbw2.exe".to_string(), "RealBand.exe".to_string()],
            main_window_class: "RealBand".to_string(),
            dialog_class: "#32770".to_string(),
            discard_phrase: "Save it?".to_string(),
            recovery_phrases: vec![
                "Okay to restore all the default settings".to_string(),
                "Recover data from last session".to_string(),
            ],
            open_menu: "File->Open".to_string(),
            save_menu: "File->Save As".to_string(),
            generate_menu: Some("Generate->Generate All BB Tracks".to_string()),
            save_formats: true,
            incidental_windows: vec!["Comments".to_string()],
            style_popup: Some(PopupProfile {
                anchor_class: "TPanelWithCanvas".to_string(),
                anchor_ordinal: 11,
                x: 44,
                y: 73,
                item: "File Open Style".to_string(),
            }),
            menu_parameters: true,
            grid_class: None,
            song_settings_menu: None,
        }
    }

    pub fn builtin(target: Target) -> Self {
        match target {
            Target::BandInABox => Self::band_in_a_box(),
            Target::RealBand => Self::realband(),
        }
    }
}

/// Overrides applied on top of a built-in profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfileOverrides {
    pub exe_path: Option<PathBuf>,
    pub known_version: Option<String>,
    /// Replaces the recovery-dialog allow-list.
    pub recovery_phrases: Option<Vec<String>>,
    pub image_names: Option<Vec<String>>,
}

/// Timeouts and intervals for every polling loop, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Readiness wait right after attaching or launching.
    pub startup_timeout_ms: u64,
    /// Steady-state readiness wait between operations.
    pub ready_timeout_ms: u64,
    pub ready_interval_ms: u64,
    /// Readiness wait after confirming a file dialog (slow loads).
    pub file_timeout_ms: u64,
    /// Wait for a modal dialog to appear or close.
    pub dialog_timeout_ms: u64,
    pub dialog_interval_ms: u64,
    /// Wait for a settings dialog opened from a menu.
    pub settings_timeout_ms: u64,
    pub menu_timeout_ms: u64,
    pub menu_interval_ms: u64,
    pub popup_timeout_ms: u64,
    pub popup_interval_ms: u64,
    /// Wait for a freshly launched process to go idle.
    pub launch_timeout_ms: u64,
    pub launch_sample_ms: u64,
    /// CPU usage (percent) below which a launched process counts as idle.
    pub launch_cpu_threshold: f32,
    /// Consecutive "save changes?" prompts tolerated by one file dialog.
    pub max_discard_prompts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 15_000,
            ready_timeout_ms: 30_000,
            ready_interval_ms: 1_000,
            file_timeout_ms: 60_000,
            dialog_timeout_ms: 10_000,
            dialog_interval_ms: 100,
            settings_timeout_ms: 20_000,
            menu_timeout_ms: 10_000,
            menu_interval_ms: 500,
            popup_timeout_ms: 120_000,
            popup_interval_ms: 400,
            launch_timeout_ms: 60_000,
            launch_sample_ms: 500,
            launch_cpu_threshold: 5.0,
            max_discard_prompts: 3,
        }
    }
}

fn policy(timeout_ms: u64, interval_ms: u64) -> PollPolicy {
    PollPolicy::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(interval_ms),
    )
}

impl TimingConfig {
    pub fn startup_policy(&self) -> PollPolicy {
        policy(self.startup_timeout_ms, self.ready_interval_ms)
    }

    pub fn ready_policy(&self) -> PollPolicy {
        policy(self.ready_timeout_ms, self.ready_interval_ms)
    }

    pub fn file_policy(&self) -> PollPolicy {
        policy(self.file_timeout_ms, self.ready_interval_ms)
    }

    pub fn dialog_policy(&self) -> PollPolicy {
        policy(self.dialog_timeout_ms, self.dialog_interval_ms)
    }

    pub fn settings_policy(&self) -> PollPolicy {
        policy(self.settings_timeout_ms, self.dialog_interval_ms)
    }

    pub fn menu_policy(&self) -> PollPolicy {
        policy(self.menu_timeout_ms, self.menu_interval_ms)
    }

    pub fn popup_policy(&self) -> PollPolicy {
        policy(self.popup_timeout_ms, self.popup_interval_ms)
    }

    pub fn launch_policy(&self) -> PollPolicy {
        policy(self.launch_timeout_ms, self.launch_sample_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("ready_timeout_ms", self.ready_timeout_ms),
            ("file_timeout_ms", self.file_timeout_ms),
            ("dialog_timeout_ms", self.dialog_timeout_ms),
            ("settings_timeout_ms", self.settings_timeout_ms),
            ("menu_timeout_ms", self.menu_timeout_ms),
            ("popup_timeout_ms", self.popup_timeout_ms),
            ("launch_timeout_ms", self.launch_timeout_ms),
        ];
        let intervals = [
            ("ready_interval_ms", self.ready_interval_ms),
            ("dialog_interval_ms", self.dialog_interval_ms),
            ("menu_interval_ms", self.menu_interval_ms),
            ("popup_interval_ms", self.popup_interval_ms),
            ("launch_sample_ms", self.launch_sample_ms),
        ];
        for (name, value) in timeouts.iter().chain(intervals.iter()) {
            if *value == 0 {
                return Err(anyhow!("timing.{name} must be > 0"));
            }
        }
        if self.launch_cpu_threshold.is_nan() || self.launch_cpu_threshold <= 0.0 {
            return Err(anyhow!("timing.launch_cpu_threshold must be > 0"));
        }
        Ok(())
    }
}

/// Driver configuration (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub timing: TimingConfig,
    pub band_in_a_box: ProfileOverrides,
    pub realband: ProfileOverrides,
}

impl DriverConfig {
    /// Built-in profile for `target` with this configuration's overrides.
    pub fn profile(&self, target: Target) -> TargetProfile {
        let overrides = match target {
            Target::BandInABox => &self.band_in_a_box,
            Target::RealBand => &self.realband,
        };
        let mut profile = TargetProfile::builtin(target);
        if let Some(exe_path) = &overrides.exe_path {
            profile.exe_path = exe_path.clone();
        }
        if let Some(version) = &overrides.known_version {
            profile.known_version = version.clone();
        }
        if let Some(phrases) = &overrides.recovery_phrases {
            profile.recovery_phrases = phrases.clone();
        }
        if let Some(images) = &overrides.image_names {
            profile.image_names = images.clone();
        }
        profile
    }

    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        for (section, overrides) in [
            ("band_in_a_box", &self.band_in_a_box),
            ("realband", &self.realband),
        ] {
            if let Some(path) = &overrides.exe_path
                && path.as_os_str().is_empty()
            {
                return Err(anyhow!("{section}.exe_path must not be empty"));
            }
            if let Some(images) = &overrides.image_names
                && images.iter().all(|name| name.trim().is_empty())
            {
                return Err(anyhow!("{section}.image_names must name at least one image"));
            }
        }
        Ok(())
    }
}

/// Read the driver settings, falling back to the built-in profiles.
///
/// Only the sections and keys present in the file override the built-ins, and
/// a missing file is the same as an empty one.
pub fn load_config(path: &Path) -> Result<DriverConfig> {
    let config = match fs::read_to_string(path) {
        Ok(text) => toml::from_str::<DriverConfig>(&text)
            .with_context(|| format!("parse driver settings {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no driver settings file, using built-in profiles");
            DriverConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read driver settings {}", path.display()));
        }
    };
    config.validate()?;
    Ok(config)
}

/// Save driver settings so a later run picks them up.
///
/// The file is replaced in one rename, so a target launch never reads a
/// half-written profile.
pub fn write_config(path: &Path, config: &DriverConfig) -> Result<()> {
    config.validate()?;
    let text = toml::to_string_pretty(config).context("serialize driver settings")?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let staged = path.with_extension("toml.partial");
    fs::write(&staged, text).with_context(|| format!("write {}", staged.display()))?;
    fs::rename(&staged, path).with_context(|| format!("install {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_means_builtin_profiles() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("driver.toml")).expect("load");
        assert_eq!(config.profile(Target::BandInABox), TargetProfile::band_in_a_box());
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn saved_install_location_is_used_by_the_next_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings").join("driver.toml");
        let mut config = DriverConfig::default();
        config.realband.exe_path = Some(PathBuf::from(r"D:\Apps\RealBand\RealBand.exe"));
        config.timing.ready_timeout_ms = 45_000;
        write_config(&path, &config).expect("write");
        assert!(!path.with_extension("toml.partial").exists());

        let profile = load_config(&path).expect("load").profile(Target::RealBand);
        assert_eq!(profile.exe_path, PathBuf::from(r"D:\Apps\RealBand\RealBand.exe"));
        assert_eq!(profile.image_names, TargetProfile::realband().image_names);
    }

    #[test]
    fn malformed_settings_name_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("driver.toml");
        fs::write(&path, "[timing]\nready_timeout_ms = \"soon\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse driver settings"));
    }

    #[test]
    fn partial_file_keeps_builtin_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("driver.toml");
        fs::write(
            &path,
            "[timing]\nready_timeout_ms = 5000\n\n[realband]\nknown_version = \"2019.0.0.1\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.timing.ready_timeout_ms, 5000);
        assert_eq!(cfg.timing.file_timeout_ms, 60_000);

        let profile = cfg.profile(Target::RealBand);
        assert_eq!(profile.known_version, "2019.0.0.1");
        assert_eq!(profile.exe_path, PathBuf::from(r"C:\RealBand\RealBand.exe"));
        assert_eq!(profile.recovery_phrases.len(), 2);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = DriverConfig::default();
        cfg.timing.menu_interval_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("menu_interval_ms"));
    }

    #[test]
    fn builtin_profiles_differ_where_the_targets_differ() {
        let biab = TargetProfile::band_in_a_box();
        let realband = TargetProfile::realband();
        assert!(biab.recovery_phrases.is_empty());
        assert!(biab.style_popup.is_none());
        assert_eq!(realband.image_names, vec!["bbw2.exe", "RealBand.exe"]);
        assert_eq!(realband.save_menu, "File->Save As");
    }
}
