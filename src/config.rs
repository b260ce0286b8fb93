use crate::defaults;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub synthesis: SynthesisConfig,
    pub analysis: AnalysisConfig,
    pub lipsync: LipsyncConfig,
    pub playback: PlaybackConfig,
    pub transcript: TranscriptConfig,
    pub animation: AnimationConfig,
}

/// Speech provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub provider_url: String,
    /// Without a key the engine runs in text-only mode.
    pub api_key: Option<String>,
    pub voice: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub request_timeout_ms: u64,
}

/// Spectrum analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub history_size: usize,
    pub tick_hz: u32,
}

/// Viseme classification and morph application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LipsyncConfig {
    pub silence_threshold: f32,
    pub hysteresis: f32,
    pub morph_smoothing: f32,
    pub closure_hold_ms: u64,
    pub jaw_emphasis: f32,
}

/// Audio playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub decode_timeout_ms: u64,
    pub speed: f32,
}

/// Transcript reveal configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptConfig {
    pub default_char_delay_ms: u64,
    pub min_char_delay_ms: u64,
}

/// Body animation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnimationConfig {
    pub crossfade_ms: u64,
    pub idle_motion_amplitude: f32,
    pub idle_motion_hz: f32,
    pub blink_enabled: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider_url: defaults::PROVIDER_URL.to_string(),
            api_key: None,
            voice: defaults::DEFAULT_VOICE.to_string(),
            model_id: defaults::DEFAULT_MODEL_ID.to_string(),
            stability: defaults::VOICE_STABILITY,
            similarity_boost: defaults::VOICE_SIMILARITY_BOOST,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: defaults::FFT_SIZE,
            smoothing_time_constant: defaults::SMOOTHING_TIME_CONSTANT,
            history_size: defaults::HISTORY_SIZE,
            tick_hz: defaults::TICK_HZ,
        }
    }
}

impl Default for LipsyncConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            hysteresis: defaults::HYSTERESIS,
            morph_smoothing: defaults::MORPH_SMOOTHING,
            closure_hold_ms: defaults::CLOSURE_HOLD_MS,
            jaw_emphasis: defaults::JAW_EMPHASIS,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            decode_timeout_ms: defaults::DECODE_TIMEOUT_MS,
            speed: defaults::SPEED,
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            default_char_delay_ms: defaults::DEFAULT_CHAR_DELAY_MS,
            min_char_delay_ms: defaults::MIN_CHAR_DELAY_MS,
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: defaults::CROSSFADE_MS,
            idle_motion_amplitude: defaults::IDLE_MOTION_AMPLITUDE,
            idle_motion_hz: defaults::IDLE_MOTION_HZ,
            blink_enabled: true,
        }
    }
}

impl AnalysisConfig {
    /// Interval between two lipsync updates.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

impl PlaybackConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing; invalid TOML and
    /// out-of-range values are still reported.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VISYNC_API_KEY → synthesis.api_key
    /// - VISYNC_VOICE → synthesis.voice
    /// - VISYNC_MODEL → synthesis.model_id
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("VISYNC_API_KEY")
            && !key.is_empty()
        {
            self.synthesis.api_key = Some(key);
        }

        if let Ok(voice) = std::env::var("VISYNC_VOICE")
            && !voice.is_empty()
        {
            self.synthesis.voice = voice;
        }

        if let Ok(model) = std::env::var("VISYNC_MODEL")
            && !model.is_empty()
        {
            self.synthesis.model_id = model;
        }

        self
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fft = self.analysis.fft_size;
        if !fft.is_power_of_two() || !(defaults::MIN_FFT_SIZE..=defaults::MAX_FFT_SIZE).contains(&fft)
        {
            return Err(invalid(
                "analysis.fft_size",
                format!(
                    "must be a power of two between {} and {}, got {fft}",
                    defaults::MIN_FFT_SIZE,
                    defaults::MAX_FFT_SIZE
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.analysis.smoothing_time_constant) {
            return Err(invalid(
                "analysis.smoothing_time_constant",
                "must be in [0, 1)".to_string(),
            ));
        }
        if self.analysis.history_size == 0 {
            return Err(invalid(
                "analysis.history_size",
                "must be at least 1".to_string(),
            ));
        }
        if self.analysis.tick_hz == 0 || self.analysis.tick_hz > 240 {
            return Err(invalid(
                "analysis.tick_hz",
                "must be between 1 and 240".to_string(),
            ));
        }
        if self.lipsync.hysteresis < 1.0 {
            return Err(invalid(
                "lipsync.hysteresis",
                "must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.lipsync.morph_smoothing) || self.lipsync.morph_smoothing == 0.0
        {
            return Err(invalid(
                "lipsync.morph_smoothing",
                "must be in (0, 1]".to_string(),
            ));
        }
        if self.synthesis.request_timeout_ms == 0 {
            return Err(invalid(
                "synthesis.request_timeout_ms",
                "must be greater than zero".to_string(),
            ));
        }
        if self.playback.decode_timeout_ms == 0 {
            return Err(invalid(
                "playback.decode_timeout_ms",
                "must be greater than zero".to_string(),
            ));
        }
        let (lo, hi) = defaults::SPEED_RANGE;
        if !(lo..=hi).contains(&self.playback.speed) {
            return Err(invalid(
                "playback.speed",
                format!("must be between {lo} and {hi}"),
            ));
        }
        if self.transcript.min_char_delay_ms > self.transcript.default_char_delay_ms {
            return Err(invalid(
                "transcript.min_char_delay_ms",
                "must not exceed default_char_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.synthesis.api_key.is_some() {
            config.synthesis.api_key = Some("********".to_string());
        }
        config
    }

    /// Look up a value by dotted key, e.g. `lipsync.hysteresis`.
    ///
    /// Tables are rendered as TOML, scalars as plain text.
    pub fn get_value_by_path(&self, key: &str) -> Result<String, EngineError> {
        let root = toml::Value::try_from(self.redacted()).map_err(|e| EngineError::ConfigParse {
            message: e.to_string(),
        })?;
        let mut value = &root;
        for part in key.split('.') {
            value = value.get(part).ok_or_else(|| EngineError::ConfigInvalidValue {
                key: key.to_string(),
                message: "no such key".to_string(),
            })?;
        }
        Ok(match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Table(table) => {
                toml::to_string_pretty(table).map_err(|e| EngineError::ConfigParse {
                    message: e.to_string(),
                })?
            }
            other => other.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/visync/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("visync")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: String) -> EngineError {
    EngineError::ConfigInvalidValue {
        key: key.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_visync_env() {
        remove_env("VISYNC_API_KEY");
        remove_env("VISYNC_VOICE");
        remove_env("VISYNC_MODEL");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.synthesis.api_key, None);
        assert_eq!(config.synthesis.voice, "EXAVITQu4vr4xnSDxMaL");
        assert_eq!(config.analysis.fft_size, 2048);
        assert_eq!(config.analysis.history_size, 10);
        assert_eq!(config.lipsync.hysteresis, 1.3);
        assert_eq!(config.lipsync.closure_hold_ms, 300);
        assert_eq!(config.playback.decode_timeout_ms, 10_000);
        assert_eq!(config.transcript.default_char_delay_ms, 8);
        assert_eq!(config.animation.crossfade_ms, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [synthesis]
            api_key = "sk_test"
            voice = "voice-42"

            [analysis]
            fft_size = 512
            tick_hz = 30

            [playback]
            speed = 1.5
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.synthesis.api_key.as_deref(), Some("sk_test"));
        assert_eq!(config.synthesis.voice, "voice-42");
        assert_eq!(config.analysis.fft_size, 512);
        assert_eq!(config.analysis.tick_hz, 30);
        assert_eq!(config.playback.speed, 1.5);

        // Untouched sections keep defaults
        assert_eq!(config.lipsync, LipsyncConfig::default());
        assert_eq!(config.transcript, TranscriptConfig::default());
    }

    #[test]
    fn test_load_rejects_out_of_range_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[analysis]\nfft_size = 1000\n")
            .unwrap();

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("analysis.fft_size"));
    }

    #[test]
    fn test_validate_speed_range() {
        let mut config = Config::default();
        config.playback.speed = 3.0;
        assert!(config.validate().is_err());
        config.playback.speed = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.playback.decode_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("playback.decode_timeout_ms"));

        let mut config = Config::default();
        config.synthesis.request_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("synthesis.request_timeout_ms"));

        config.synthesis.request_timeout_ms = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_hysteresis_below_one() {
        let mut config = Config::default();
        config.lipsync.hysteresis = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_interval() {
        let config = AnalysisConfig {
            tick_hz: 50,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_env_override_api_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_visync_env();

        set_env("VISYNC_API_KEY", "sk_env");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.synthesis.api_key.as_deref(), Some("sk_env"));
        assert_eq!(config.synthesis.voice, defaults::DEFAULT_VOICE);

        clear_visync_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_visync_env();

        set_env("VISYNC_VOICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.synthesis.voice, defaults::DEFAULT_VOICE);

        clear_visync_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[synthesis\nvoice = \"broken\n").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_visync_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("visync"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_get_value_by_path() {
        let config = Config::default();
        assert_eq!(config.get_value_by_path("analysis.fft_size").unwrap(), "2048");
        assert_eq!(config.get_value_by_path("synthesis.voice").unwrap(), "EXAVITQu4vr4xnSDxMaL");
        assert!(config.get_value_by_path("lipsync").unwrap().contains("hysteresis"));
        assert!(config.get_value_by_path("lipsync.nope").is_err());
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = Config::default();
        config.synthesis.api_key = Some("sk-secret".to_string());
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert_eq!(config.get_value_by_path("synthesis.api_key").unwrap(), "********");
        assert!(Config::default().redacted().synthesis.api_key.is_none());
    }
}
