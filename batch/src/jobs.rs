//! The three batch jobs.
//!
//! - `render`: RealBand accompaniment for each song/style pair of a manifest.
//! - `abc2sgu`: Band-in-a-Box conversion of ABC tunes to song files, with the
//!   song form stretched to a fixed length.
//! - `substyle`: Band-in-a-Box songs switched to their second substyle.
//!
//! Outputs that already exist are skipped, so an interrupted run can simply be
//! started again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use driver::core::params::Parameter;
use driver::core::poll::Clock;
use driver::io::config::{DriverConfig, Target};
use driver::io::desktop::Desktop;
use driver::io::process::ProcessHost;
use driver::session::{Session, SongForm};
use tracing::info;

use crate::manifest::read_manifest;
use crate::naming::{render_output_name, sgu_output_name, strip_extension};
use crate::restart::with_restarts;

/// Save format picked in RealBand's save dialog unless overridden.
pub const DEFAULT_RENDER_FORMAT: &str = "MIDI File (.MID) (*.MID)";
/// Tempo written into converted ABC songs.
pub const ABC_TEMPO: u32 = 120;
/// Extending a song leaves a part marker in bar 33; eight rows down is that
/// bar, and two presses clear it.
pub const FIX_BAR_33_KEYS: &str = "{DOWN 8}pp";
pub const SUBSTYLE_KEYS: &str = "{HOME}p";
pub const SUBSTYLE_BAR_33_KEYS: &str = "{DOWN 8}p";

/// Everything needed to open a session, so jobs can relaunch on demand.
pub struct Connector<'a, D: ?Sized, H: ?Sized, C: ?Sized> {
    pub config: &'a DriverConfig,
    pub desktop: &'a D,
    pub host: &'a H,
    pub clock: &'a C,
}

impl<'a, D, H, C> Connector<'a, D, H, C>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    pub fn connect(&self, target: Target, prefer_attach: bool) -> Result<Session<'a, D, H, C>> {
        Session::connect(
            self.config,
            target,
            self.desktop,
            self.host,
            self.clock,
            prefer_attach,
        )
        .with_context(|| format!("connect to {target}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub converted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub song_dir: PathBuf,
    pub style_dir: PathBuf,
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
    pub format: String,
    pub suffix: Option<String>,
    pub screenshot_dir: Option<PathBuf>,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Abc2SguJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Last bar of the song form.
    pub length: u32,
    pub fix_bar_33: bool,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SubstyleJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Also switch the substyle from bar 33 on.
    pub change_bar_33: bool,
    pub max_attempts: u32,
}

/// File names in `dir` accepted by `accept`, sorted.
pub fn list_inputs(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if accept(&name) {
            names.push(name);
        } else {
            info!(file = %name, "ignoring");
        }
    }
    names.sort();
    Ok(names)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

fn skip_existing(output: &Path, summary: &mut JobSummary) -> bool {
    if output.exists() {
        info!(output = %output.display(), "already exists");
        summary.skipped += 1;
        true
    } else {
        false
    }
}

/// Render accompaniment for every manifest pair through RealBand.
///
/// A song stays loaded across consecutive pairs that share it. A restart
/// starts from a fresh session with nothing loaded.
pub fn render<D, H, C>(connector: &Connector<'_, D, H, C>, job: &RenderJob) -> Result<JobSummary>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    let entries = read_manifest(&job.manifest)?;
    let mut summary = JobSummary::default();
    let mut session = connector.connect(Target::RealBand, true)?;

    for (index, entry) in entries.iter().enumerate() {
        let output_name = render_output_name(&entry.song, &entry.style, job.suffix.as_deref());
        let output = job.output_dir.join(&output_name);
        if skip_existing(&output, &mut summary) {
            continue;
        }
        ensure_parent(&output)?;
        let song = job.song_dir.join(&entry.song);
        let style = job.style_dir.join(&entry.style);

        with_restarts(
            &mut session,
            job.max_attempts,
            || connector.connect(Target::RealBand, false),
            |session| {
                if session.current_file() != Some(song.as_path()) {
                    session.load(&song)?;
                    session.wait_ready()?;
                    if let Some(dir) = &job.screenshot_dir {
                        session.capture_screenshot(dir, &entry.song)?;
                    }
                }
                session.load_style(&style)?;
                if let Some(key) = &entry.key {
                    let current = session.get_parameter(Parameter::Key)?;
                    if current.as_text() != Some(key.as_str()) {
                        session.set_parameter(Parameter::Key, key)?;
                    }
                }
                session.generate()?;
                session.save(&output, Some(&job.format))?;
                Ok(())
            },
        )
        .with_context(|| format!("render manifest line {}", entry.line))?;

        summary.converted += 1;
        info!(
            "{}\t{}\t{}",
            index + 1,
            strip_extension(&entry.song),
            strip_extension(&entry.style)
        );
    }
    Ok(summary)
}

/// Convert every `*.abc` file to a Band-in-a-Box song.
pub fn abc2sgu<D, H, C>(connector: &Connector<'_, D, H, C>, job: &Abc2SguJob) -> Result<JobSummary>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    let inputs = list_inputs(&job.input_dir, |name| name.ends_with(".abc"))?;
    let form = SongForm {
        tempo: ABC_TEMPO,
        last_bar: job.length,
    };
    let fix_bar_33 = job.fix_bar_33 && job.length > 32;
    let mut summary = JobSummary::default();
    let mut session = connector.connect(Target::BandInABox, true)?;

    for (index, name) in inputs.iter().enumerate() {
        let output = job.output_dir.join(sgu_output_name(name));
        if skip_existing(&output, &mut summary) {
            continue;
        }
        let input = job.input_dir.join(name);

        with_restarts(
            &mut session,
            job.max_attempts,
            || connector.connect(Target::BandInABox, false),
            |session| {
                session.load(&input)?;
                session.configure_song_form(&form)?;
                if fix_bar_33 {
                    session.send_grid_keys(FIX_BAR_33_KEYS)?;
                }
                session.save(&output, None)?;
                Ok(())
            },
        )
        .with_context(|| format!("convert {name}"))?;

        summary.converted += 1;
        info!("{}\t{}", index + 1, name);
    }
    Ok(summary)
}

/// Switch every Band-in-a-Box song (`*.SGU`, `*.MGU`) to substyle B.
pub fn substyle<D, H, C>(connector: &Connector<'_, D, H, C>, job: &SubstyleJob) -> Result<JobSummary>
where
    D: Desktop + ?Sized,
    H: ProcessHost + ?Sized,
    C: Clock + ?Sized,
{
    let inputs = list_inputs(&job.input_dir, |name| {
        name.to_ascii_uppercase().ends_with("GU")
    })?;
    let mut summary = JobSummary::default();
    let mut session = connector.connect(Target::BandInABox, true)?;

    for (index, name) in inputs.iter().enumerate() {
        let output = job.output_dir.join(name);
        if skip_existing(&output, &mut summary) {
            continue;
        }
        let input = job.input_dir.join(name);

        with_restarts(
            &mut session,
            job.max_attempts,
            || connector.connect(Target::BandInABox, false),
            |session| {
                session.load(&input)?;
                session.send_grid_keys(SUBSTYLE_KEYS)?;
                if job.change_bar_33 {
                    session.send_grid_keys(SUBSTYLE_BAR_33_KEYS)?;
                }
                session.save(&output, None)?;
                Ok(())
            },
        )
        .with_context(|| format!("change substyle of {name}"))?;

        summary.converted += 1;
        info!("{}\t{}", index + 1, name);
    }
    Ok(summary)
}
