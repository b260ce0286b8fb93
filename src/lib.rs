//! visync - Speech-driven avatar lipsync
//!
//! Turns synthesized speech into viseme morph weights, body animation
//! states and a paced transcript, all driven from the audio being played.

// Enforce error handling discipline: propagate, don't panic
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod avatar;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod lipsync;
#[cfg(feature = "cli")]
pub mod output;

// Core traits (synthesize → decode → play)
pub use audio::decode::{AudioDecoder, DecodedAudio, MediaDecoder};
pub use audio::playback::{AudioOutput, ClockedOutput, PlaybackHandle};
pub use avatar::animation::{ArmsDownCorrector, NoCorrection, RestPoseCorrector};
pub use engine::synth::SpeechSynthesizer;

// Orchestration
pub use avatar::Avatar;
pub use avatar::animation::AnimationState;
pub use engine::{EngineEvent, Orchestrator, SpeakOutcome, SpeakReport};
pub use lipsync::LipsyncAnalyzer;
pub use lipsync::viseme::Viseme;

// Error handling
pub use error::{EngineError, ErrorKind, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
