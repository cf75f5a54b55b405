//! Command-line interface for readaloud
//!
//! Provides argument parsing using clap derive macros.

use crate::config::InterruptPolicy;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Read printed text aloud from a camera or a directory of frames
#[derive(Parser, Debug)]
#[command(
    name = "readaloud",
    version,
    about = "Read printed text aloud from a camera or a directory of frames"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: per frame, -vv: everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory of image files (PNG, JPEG, PNM, ...) to read, in file name order
    #[arg(long, value_name = "DIR", conflicts_with = "device")]
    pub frames: Option<PathBuf>,

    /// Read from a live camera by index, e.g. 0 (needs the live-camera feature)
    #[arg(long, value_name = "INDEX")]
    pub device: Option<u32>,

    /// Language pack for OCR and speech (default: eng). Examples: eng, deu, fra
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Minimum OCR confidence between 0 and 1 (default: 0.6)
    #[arg(long, value_name = "VALUE", value_parser = parse_unit_interval)]
    pub confidence: Option<f32>,

    /// What happens to the current utterance on stop: finish or cut
    #[arg(long, value_name = "POLICY")]
    pub interrupt: Option<InterruptPolicy>,

    /// Start over at the first frame after the last one
    #[arg(long = "loop")]
    pub looping: bool,

    /// Print every spoken line to stdout
    #[arg(long)]
    pub echo: bool,

    /// Minimum time between frames (default: 1s). Examples: 500ms, 2s
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    pub interval: Option<Duration>,
}

/// Parse a confidence value in `[0, 1]`.
fn parse_unit_interval(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside [0, 1]"));
    }
    Ok(value)
}

/// Parse a frame interval.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(millis) = s.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the OCR and speech programs and list OCR languages
    Check,

    /// View and create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
