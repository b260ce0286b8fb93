//! Text-to-speech providers.

use crate::config::SynthesisConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Turns text into encoded audio bytes (MP3, WAV...).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`, or the provider default when `None`.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>>;

    /// Provider name for logs and status messages.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Arc<T> {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>> {
        (**self).synthesize(text, voice).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the configured provider.
///
/// Returns `None` without an API key: the engine then runs text-only.
pub fn from_config(config: &SynthesisConfig) -> Result<Option<Arc<dyn SpeechSynthesizer>>> {
    if config.api_key.as_deref().is_none_or(str::is_empty) {
        return Ok(None);
    }
    #[cfg(feature = "http")]
    {
        Ok(Some(Arc::new(ElevenLabsSynthesizer::new(config)?)))
    }
    #[cfg(not(feature = "http"))]
    {
        Err(EngineError::Synthesis {
            message: "an API key is configured but visync was built without the `http` feature"
                .to_string(),
        })
    }
}

#[cfg(feature = "http")]
pub use http::ElevenLabsSynthesizer;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct VoiceSettings {
        stability: f32,
        similarity_boost: f32,
    }

    #[derive(Serialize)]
    struct SpeechBody<'a> {
        text: &'a str,
        model_id: &'a str,
        voice_settings: VoiceSettings,
    }

    /// ElevenLabs `text-to-speech` endpoint, returning MP3.
    pub struct ElevenLabsSynthesizer {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        voice: String,
        model_id: String,
        stability: f32,
        similarity_boost: f32,
    }

    impl ElevenLabsSynthesizer {
        pub fn new(config: &SynthesisConfig) -> Result<Self> {
            let api_key = config.api_key.clone().ok_or_else(|| EngineError::Synthesis {
                message: "missing API key".to_string(),
            })?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.request_timeout_ms))
                .build()
                .map_err(|e| EngineError::Synthesis {
                    message: format!("Failed to build HTTP client: {e}"),
                })?;
            Ok(Self {
                client,
                base_url: config.provider_url.trim_end_matches('/').to_string(),
                api_key,
                voice: config.voice.clone(),
                model_id: config.model_id.clone(),
                stability: config.stability,
                similarity_boost: config.similarity_boost,
            })
        }

        fn endpoint(&self, voice: &str) -> String {
            format!("{}/text-to-speech/{}", self.base_url, voice)
        }
    }

    impl std::fmt::Debug for ElevenLabsSynthesizer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ElevenLabsSynthesizer")
                .field("base_url", &self.base_url)
                .field("voice", &self.voice)
                .field("model_id", &self.model_id)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ElevenLabsSynthesizer {
        async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>> {
            let voice = voice.unwrap_or(&self.voice);
            let body = SpeechBody {
                text,
                model_id: &self.model_id,
                voice_settings: VoiceSettings {
                    stability: self.stability,
                    similarity_boost: self.similarity_boost,
                },
            };

            tracing::debug!("requesting speech for {} chars, voice {}", text.chars().count(), voice);
            let response = self
                .client
                .post(self.endpoint(voice))
                .header("xi-api-key", &self.api_key)
                .header(reqwest::header::ACCEPT, "audio/mpeg")
                .json(&body)
                .send()
                .await
                .map_err(|e| EngineError::Synthesis {
                    message: format!("Failed to reach speech provider: {e}"),
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("unreadable error body: {e}"));
                return Err(EngineError::SynthesisHttp {
                    status: status.as_u16(),
                    message,
                });
            }

            let bytes = response.bytes().await.map_err(|e| EngineError::Synthesis {
                message: format!("Failed to read speech audio: {e}"),
            })?;
            if bytes.is_empty() {
                return Err(EngineError::Synthesis {
                    message: "provider returned no audio".to_string(),
                });
            }
            Ok(bytes.to_vec())
        }

        fn name(&self) -> &str {
            "elevenlabs"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_endpoint_trims_trailing_slash() {
            let config = SynthesisConfig {
                api_key: Some("key".into()),
                provider_url: "https://tts.example/v1/".into(),
                ..SynthesisConfig::default()
            };
            let synth = ElevenLabsSynthesizer::new(&config).unwrap();
            assert_eq!(synth.endpoint("abc"), "https://tts.example/v1/text-to-speech/abc");
        }

        #[test]
        fn test_body_shape() {
            let body = SpeechBody {
                text: "Hi",
                model_id: "m1",
                voice_settings: VoiceSettings {
                    stability: 0.5,
                    similarity_boost: 0.75,
                },
            };
            let json = serde_json::to_value(&body).unwrap();
            assert_eq!(json["text"], "Hi");
            assert_eq!(json["model_id"], "m1");
            assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
        }

        #[test]
        fn test_debug_hides_api_key() {
            let config = SynthesisConfig {
                api_key: Some("secret-key".into()),
                ..SynthesisConfig::default()
            };
            let synth = ElevenLabsSynthesizer::new(&config).unwrap();
            assert!(!format!("{:?}", synth).contains("secret-key"));
        }
    }
}

/// Speaks pre-recorded audio: every request returns the same bytes.
///
/// Lets hosts (and the CLI's `--wav`) drive the engine without a provider.
#[derive(Debug, Clone)]
pub struct Prerecorded {
    audio: Arc<[u8]>,
}

impl Prerecorded {
    pub fn new(audio: Vec<u8>) -> Self {
        Self {
            audio: audio.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for Prerecorded {
    async fn synthesize(&self, _text: &str, _voice: Option<&str>) -> Result<Vec<u8>> {
        Ok(self.audio.to_vec())
    }

    fn name(&self) -> &str {
        "prerecorded"
    }
}

/// Mock synthesizer for testing
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    response: Vec<u8>,
    should_fail: bool,
    error_message: Option<String>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockSynthesizer {
    /// Returns `audio` for every request.
    pub fn new(audio: Vec<u8>) -> Self {
        Self {
            response: audio,
            should_fail: false,
            error_message: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_response(mut self, audio: Vec<u8>) -> Self {
        self.response = audio;
        self
    }

    /// Configure the mock to fail every request
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    /// Simulated network latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `synthesize` calls so far, shared between clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str, _voice: Option<&str>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.should_fail {
            return Err(EngineError::SynthesisHttp {
                status: 503,
                message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "mock synthesis failure".to_string()),
            });
        }
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_mock_returns_response_and_counts_calls() {
        let mock = MockSynthesizer::new(vec![1, 2, 3]);
        let shared = mock.clone();
        assert_eq!(mock.synthesize("hi", None).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(shared.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_is_synthesis_error() {
        let mock = MockSynthesizer::new(Vec::new())
            .with_failure()
            .with_error_message("quota exceeded");
        let err = mock.synthesize("hi", Some("voice")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_delay_uses_tokio_clock() {
        let mock = MockSynthesizer::new(vec![0]).with_delay(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        mock.synthesize("hi", None).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_no_api_key_means_text_only() {
        let config = SynthesisConfig::default();
        assert!(from_config(&config).unwrap().is_none());
        let empty = SynthesisConfig {
            api_key: Some(String::new()),
            ..SynthesisConfig::default()
        };
        assert!(from_config(&empty).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prerecorded_ignores_text() {
        let speech = Prerecorded::new(vec![7, 7]);
        assert_eq!(speech.synthesize("anything", Some("voice")).await.unwrap(), vec![7, 7]);
        assert_eq!(speech.synthesize("else", None).await.unwrap(), vec![7, 7]);
    }

    #[tokio::test]
    async fn test_arc_delegates() {
        let shared: Arc<MockSynthesizer> = Arc::new(MockSynthesizer::new(vec![9]));
        assert_eq!(shared.name(), "mock");
        assert_eq!(shared.synthesize("x", None).await.unwrap(), vec![9]);
    }
}
