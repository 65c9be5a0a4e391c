//! Batch conversion through Band-in-a-Box and RealBand.
//!
//! Drives the applications' GUIs to render accompaniments, convert ABC tunes,
//! and change substyles for whole directories of songs. Failed conversions
//! restart the application before giving up.

use std::path::PathBuf;

use anyhow::{Context, Result};
use batch::jobs::{self, Abc2SguJob, Connector, DEFAULT_RENDER_FORMAT, RenderJob, SubstyleJob};
use clap::{Parser, Subcommand};
use driver::core::poll::SystemClock;
use driver::io::config::{Target, load_config};
use driver::io::desktop::Desktop;
use driver::io::system::SystemHost;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "batch",
    version,
    about = "Batch conversion through Band-in-a-Box and RealBand"
)]
struct Cli {
    /// Driver configuration (TOML). Built-in defaults apply when missing.
    #[arg(long, global = true, default_value = "driver.toml")]
    config: PathBuf,
    /// Executable to attach to or launch, overriding the configuration.
    #[arg(long, global = true)]
    exe: Option<PathBuf>,
    /// Attempts per file; each retry kills and relaunches the application.
    #[arg(long, global = true, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    attempts: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render accompaniments with RealBand for each song/style pair.
    Render {
        /// Directory with song files.
        song_dir: PathBuf,
        /// Directory with style files.
        style_dir: PathBuf,
        output_dir: PathBuf,
        /// TSV lines `<song>\t<style>[\t<key>]`, relative to the directories.
        manifest: PathBuf,
        /// Entry of the save dialog's format list.
        #[arg(short, long, default_value = DEFAULT_RENDER_FORMAT)]
        format: String,
        /// Extra name part before `.mid`.
        #[arg(long)]
        suffix: Option<String>,
        /// Save a screenshot of every loaded song here.
        #[arg(long)]
        screenshot_dir: Option<PathBuf>,
    },
    /// Convert ABC files to Band-in-a-Box songs.
    Abc2sgu {
        input_dir: PathBuf,
        output_dir: PathBuf,
        /// Remove the part marker left in bar 33 after extending the song.
        #[arg(long)]
        fix_bar_33: bool,
        /// Last bar of the song form.
        #[arg(long, default_value_t = 252)]
        length: u32,
    },
    /// Switch Band-in-a-Box songs to substyle B.
    Substyle {
        input_dir: PathBuf,
        output_dir: PathBuf,
        /// Also switch from bar 33 on, where the style may change otherwise.
        #[arg(long)]
        change_bar_33: bool,
    },
}

impl Command {
    fn target(&self) -> Target {
        match self {
            Command::Render { .. } => Target::RealBand,
            Command::Abc2sgu { .. } | Command::Substyle { .. } => Target::BandInABox,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    driver::logging::init("info");

    let mut config =
        load_config(&cli.config).with_context(|| format!("load {}", cli.config.display()))?;
    if let Some(exe) = &cli.exe {
        let overrides = match cli.command.target() {
            Target::BandInABox => &mut config.band_in_a_box,
            Target::RealBand => &mut config.realband,
        };
        overrides.exe_path = Some(exe.clone());
    }

    let desktop = open_desktop()?;
    let host = SystemHost::new();
    let connector = Connector {
        config: &config,
        desktop: desktop.as_ref(),
        host: &host,
        clock: &SystemClock,
    };
    execute(cli, &connector)
}

fn execute<D: Desktop + ?Sized>(
    cli: Cli,
    connector: &Connector<'_, D, SystemHost, SystemClock>,
) -> Result<()> {
    let summary = match cli.command {
        Command::Render {
            song_dir,
            style_dir,
            output_dir,
            manifest,
            format,
            suffix,
            screenshot_dir,
        } => jobs::render(
            connector,
            &RenderJob {
                song_dir,
                style_dir,
                output_dir,
                manifest,
                format,
                suffix,
                screenshot_dir,
                max_attempts: cli.attempts,
            },
        )?,
        Command::Abc2sgu {
            input_dir,
            output_dir,
            fix_bar_33,
            length,
        } => jobs::abc2sgu(
            connector,
            &Abc2SguJob {
                input_dir,
                output_dir,
                length,
                fix_bar_33,
                max_attempts: cli.attempts,
            },
        )?,
        Command::Substyle {
            input_dir,
            output_dir,
            change_bar_33,
        } => jobs::substyle(
            connector,
            &SubstyleJob {
                input_dir,
                output_dir,
                change_bar_33,
                max_attempts: cli.attempts,
            },
        )?,
    };
    info!(
        converted = summary.converted,
        skipped = summary.skipped,
        "batch finished"
    );
    Ok(())
}

#[cfg(windows)]
fn open_desktop() -> Result<Box<dyn Desktop>> {
    Ok(Box::new(driver::io::win32::Win32Desktop::new()))
}

#[cfg(not(windows))]
fn open_desktop() -> Result<Box<dyn Desktop>> {
    anyhow::bail!("desktop automation needs Windows")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exe_override_follows_subcommand_target() {
        let cli = Cli::parse_from(["batch", "--exe", r"D:\bb\bbw.exe", "substyle", "in", "out"]);
        assert_eq!(cli.command.target(), Target::BandInABox);
        assert_eq!(cli.attempts, 3);
        let cli = Cli::parse_from(["batch", "render", "s", "st", "o", "pairs.tsv"]);
        match cli.command {
            Command::Render { format, .. } => assert_eq!(format, DEFAULT_RENDER_FORMAT),
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(Cli::try_parse_from(["batch", "--attempts", "0", "substyle", "in", "out"]).is_err());
    }
}
