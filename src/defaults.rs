//! Default configuration constants for visync.
//!
//! Shared tuning values used by the config types and by the engine
//! components, so that the two never drift apart.

/// Frequency bands used for feature extraction, in Hz (`[start, end)`).
///
/// The bands roughly follow speech formant regions: low energy, F1 lower,
/// F1 mid, F2 front, F2/F3, fricatives and high fricatives.
pub const BANDS_HZ: [(f32, f32); 7] = [
    (50.0, 200.0),
    (200.0, 400.0),
    (400.0, 800.0),
    (800.0, 1500.0),
    (1500.0, 2500.0),
    (2500.0, 4000.0),
    (4000.0, 8000.0),
];

/// Default FFT size of the analyser (yields `FFT_SIZE / 2` frequency bins).
pub const FFT_SIZE: usize = 2048;

/// Smallest FFT size accepted by the analyser (256 bins).
pub const MIN_FFT_SIZE: usize = 512;

/// Largest FFT size accepted by the analyser (2048 bins).
pub const MAX_FFT_SIZE: usize = 4096;

/// Temporal smoothing of the analyser spectrum (0 = none, 1 = frozen).
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// Lower bound of the analyser's decibel window.
pub const MIN_DECIBELS: f32 = -100.0;

/// Upper bound of the analyser's decibel window.
pub const MAX_DECIBELS: f32 = -30.0;

/// Number of spectral frames kept for trend-based smoothing.
pub const HISTORY_SIZE: usize = 10;

/// Lipsync update rate in Hz (one update per rendering tick).
pub const TICK_HZ: u32 = 60;

/// Averaged and instantaneous volume below this are treated as silence.
pub const SILENCE_THRESHOLD: f32 = 0.2;

/// Averaged volume required before any non-silent symbol is scored.
pub const VOICED_THRESHOLD: f32 = 0.1;

/// Score multiplier applied to the currently active viseme.
pub const HYSTERESIS: f32 = 1.3;

/// Spectral centroid above which fricatives are scored, in Hz.
pub const FRICATIVE_CENTROID_HZ: f32 = 4000.0;

/// Volume jump (current minus history average) that scores plosives.
pub const PLOSIVE_VOLUME_DELTA: f32 = 0.3;

/// Volume mapped to full viseme intensity.
pub const INTENSITY_FULL_SCALE: f32 = 0.4;

/// Exponential smoothing factor applied to morph weights per tick.
pub const MORPH_SMOOTHING: f32 = 0.6;

/// Weight scale applied to channels resolved by partial name match.
pub const PARTIAL_MATCH_PENALTY: f32 = 0.8;

/// Fraction of an open vowel's weight forwarded to the jaw channel.
pub const JAW_EMPHASIS: f32 = 0.3;

/// Intensity above which open vowels drive the jaw.
pub const JAW_INTENSITY_THRESHOLD: f32 = 0.3;

/// How long the final mouth shape is held after playback ends.
pub const CLOSURE_HOLD_MS: u64 = 300;

/// Upper bound for decoding or probing synthesized audio.
pub const DECODE_TIMEOUT_MS: u64 = 10_000;

/// Upper bound for one synthesis request.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Per-character reveal delay when the audio duration is unknown.
pub const DEFAULT_CHAR_DELAY_MS: u64 = 8;

/// Lower clamp for the duration-matched per-character reveal delay.
pub const MIN_CHAR_DELAY_MS: u64 = 4;

/// Crossfade duration between animation clips.
pub const CROSSFADE_MS: u64 = 300;

/// Root offset amplitude of the synthetic idle motion (scene units).
pub const IDLE_MOTION_AMPLITUDE: f32 = 0.01;

/// Frequency of the synthetic idle motion in Hz.
pub const IDLE_MOTION_HZ: f32 = 0.25;

/// Shortest and longest pause between idle blinks.
pub const BLINK_INTERVAL_MS: (u64, u64) = (2000, 6000);

/// Duration of one blink pulse.
pub const BLINK_DURATION_MS: u64 = 150;

/// Default playback speed multiplier.
pub const SPEED: f32 = 1.0;

/// Accepted playback speed range.
pub const SPEED_RANGE: (f32, f32) = (0.5, 2.0);

/// Default synthesis provider base URL.
pub const PROVIDER_URL: &str = "https://api.elevenlabs.io/v1";

/// Default provider voice identifier.
pub const DEFAULT_VOICE: &str = "EXAVITQu4vr4xnSDxMaL";

/// Default provider model identifier.
pub const DEFAULT_MODEL_ID: &str = "eleven_monolingual_v1";

/// Default voice stability sent with each synthesis request.
pub const VOICE_STABILITY: f32 = 0.5;

/// Default voice similarity boost sent with each synthesis request.
pub const VOICE_SIMILARITY_BOOST: f32 = 0.75;
