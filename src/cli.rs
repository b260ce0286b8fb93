//! Command-line interface for visync
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Speech-driven avatar lipsync
#[derive(Parser, Debug)]
#[command(name = "visync", version, about = "Speech-driven avatar lipsync")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: status + avatar state, -vv: viseme changes and debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse an analysis tick such as `50ms` or `0.02`.
///
/// Supports any duration format accepted by `humantime`; bare numbers are
/// seconds.
fn parse_tick(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let tick = match s.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
        Ok(_) => return Err(format!("invalid tick '{s}'")),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if tick.is_zero() {
        return Err("tick must be greater than zero".to_string());
    }
    Ok(tick)
}

/// Parse a playback speed multiplier.
fn parse_speed(s: &str) -> Result<f32, String> {
    let speed: f32 = s.trim().parse().map_err(|_| format!("invalid speed '{s}'"))?;
    let (lo, hi) = crate::defaults::SPEED_RANGE;
    if !(lo..=hi).contains(&speed) {
        return Err(format!("speed must be between {lo} and {hi}"));
    }
    Ok(speed)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak text: synthesize, play and animate, printing the transcript as it is revealed
    Speak {
        /// Text to speak
        text: String,

        /// Character description (JSON) to bind and animate
        #[arg(long, value_name = "FILE")]
        character: Option<PathBuf>,

        /// Play this audio file instead of calling the speech provider
        #[arg(long, value_name = "FILE")]
        wav: Option<PathBuf>,

        /// Provider voice id (default: from config)
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,

        /// Playback speed multiplier (default: from config)
        #[arg(long, value_name = "X", value_parser = parse_speed)]
        speed: Option<f32>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyze an audio file offline and print its viseme track
    Analyze {
        /// Audio file (WAV or MP3)
        audio: PathBuf,

        /// Analysis interval. Examples: 50ms, 16ms, 0.1
        #[arg(long, short = 't', value_name = "DURATION", default_value = "50ms", value_parser = parse_tick)]
        tick: Duration,

        /// Print every tick instead of only viseme changes
        #[arg(long)]
        all: bool,

        /// Print the track as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a character's blend channels bind to visemes
    Bind {
        /// Character description (JSON)
        character: PathBuf,

        /// Print the binding as JSON
        #[arg(long)]
        json: bool,
    },

    /// View configuration
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

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value by key (e.g., lipsync.hysteresis)
    Get {
        /// Dotted key path (e.g., analysis.fft_size, synthesis.voice)
        key: String,
    },
    /// Print the effective configuration (API key masked)
    List,
    /// Print the configuration file path
    Path,
}
