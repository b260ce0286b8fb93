//! Per-request session state and its cancellation signal.

use crate::audio::playback::PlaybackHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// One call to `speak`. The orchestrator assigns its request id when the
/// request starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Provider voice; `None` uses the configured default.
    pub voice: Option<String>,
    /// Playback speed multiplier, also applied to the reveal pace.
    pub speed: f32,
    pub requested_at: Instant,
}

impl SpeechRequest {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            voice: None,
            speed: 1.0,
            requested_at: Instant::now(),
        }
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = Some(voice.to_string());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// Lifecycle of an [`AudioSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Synthesizing,
    Decoding,
    Playing,
    /// Audio is done (or never started); the transcript may still be running.
    Revealing,
    /// Synthesis, decoding or playback failed; the transcript falls back to
    /// the default pace.
    Failed,
    Finished,
    Cancelled,
}

/// Fires the cancellation of one session.
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the cancellation of one session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// A connected trigger/signal pair.
pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Never resolves if the trigger is dropped
    /// without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The live state of the current request: its cancel trigger and the
/// playback it owns.
pub struct AudioSession {
    request_id: u64,
    state: SessionState,
    cancel: CancelTrigger,
    playback: Option<Arc<dyn PlaybackHandle>>,
}

impl AudioSession {
    pub fn new(request_id: u64) -> (Self, CancelSignal) {
        let (cancel, signal) = cancel_pair();
        let session = Self {
            request_id,
            state: SessionState::Synthesizing,
            cancel,
            playback: None,
        };
        (session, signal)
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!("session {}: {:?} -> {:?}", self.request_id, self.state, state);
        self.state = state;
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing && self.playback.is_some()
    }

    /// Take ownership of a started playback.
    pub fn attach_playback(&mut self, handle: Arc<dyn PlaybackHandle>) {
        self.playback = Some(handle);
        self.set_state(SessionState::Playing);
    }

    /// Stop and release the playback, if any.
    pub fn release_playback(&mut self) {
        if let Some(handle) = self.playback.take() {
            handle.stop();
        }
        if self.state == SessionState::Playing {
            self.set_state(SessionState::Revealing);
        }
    }

    /// Stop everything this session started and wake its activities.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.release_playback();
        self.set_state(SessionState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("request_id", &self.request_id)
            .field("state", &self.state)
            .field("playing", &self.playback.is_some())
            .finish()
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.release_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::DecodedAudio;
    use crate::audio::playback::{AudioOutput, ClockedOutput};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_signal() {
        let (trigger, signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        trigger.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
        assert!(trigger.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_never_resolves() {
        let (trigger, signal) = cancel_pair();
        drop(trigger);
        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_playback() {
        let output = ClockedOutput::new();
        let stats = output.stats();
        let audio = DecodedAudio::new(vec![0.0; 16_000], 16_000);

        let (mut session, signal) = AudioSession::new(7);
        let handle = output.play(&audio, 1.0).unwrap();
        session.attach_playback(Arc::from(handle));
        assert!(session.is_playing());
        assert_eq!(stats.active(), 1);

        session.cancel();
        assert_eq!(stats.active(), 0);
        assert!(signal.is_cancelled());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!session.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_playback() {
        let output = ClockedOutput::new();
        let stats = output.stats();
        let audio = DecodedAudio::new(vec![0.0; 16_000], 16_000);
        {
            let (mut session, _signal) = AudioSession::new(1);
            session.attach_playback(Arc::from(output.play(&audio, 1.0).unwrap()));
            assert_eq!(stats.active(), 1);
        }
        assert_eq!(stats.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_builder() {
        let before = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let request = SpeechRequest::new("hi").with_voice("v1").with_speed(1.5);
        assert_eq!(request.voice.as_deref(), Some("v1"));
        assert_eq!(request.speed, 1.5);
        assert_eq!(request.requested_at - before, Duration::from_millis(5));
    }
}
