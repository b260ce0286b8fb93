//! Status/error channel and the result of a `speak` call.

use crate::avatar::animation::AnimationState;
use crate::error::{EngineError, ErrorKind};
use crate::lipsync::viseme::Viseme;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use std::time::Duration;

/// Degraded-mode conditions. None of these stop the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Degradation {
    /// Some visemes have no morph channel.
    BindingGap { missing: Vec<Viseme> },
    /// No viseme has a morph channel; only the body animates.
    AnimationOnly,
    /// No synthesis provider is configured.
    TextOnly,
    SynthesisFailed { message: String },
    DecodeFailed { message: String },
    PlaybackFailed { message: String },
}

/// Everything observable about the engine, streamed as it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Human-readable progress, e.g. "Thinking...".
    Status { request_id: u64, message: String },
    StateChanged { state: AnimationState },
    /// Current revealed prefix of the transcript.
    Transcript { request_id: u64, text: String },
    /// The mouth shape changed.
    Viseme {
        request_id: u64,
        viseme: Viseme,
        intensity: f32,
    },
    Degraded {
        request_id: Option<u64>,
        #[serde(flatten)]
        condition: Degradation,
    },
    Finished { request_id: u64, cancelled: bool },
}

/// Non-blocking publisher for [`EngineEvent`]s.
///
/// A full or disconnected channel drops the event; the engine never waits
/// on its observers.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<Sender<EngineEvent>>,
}

impl EventSender {
    /// A sender that discards everything.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Bounded channel pair.
    pub fn bounded(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!("event channel full, dropped {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// A recovered failure during one `speak` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechIssue {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for SpeechIssue {
    fn from(error: &EngineError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Summary of a `speak` call that ran to the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakReport {
    pub request_id: u64,
    /// Final transcript value; always the full input text.
    pub transcript: String,
    /// Probed audio length, when audio was available.
    pub audio_duration: Option<Duration>,
    /// Whether audio was actually played.
    pub played: bool,
    /// Lipsync ticks applied to the face.
    pub lipsync_ticks: usize,
    pub issues: Vec<SpeechIssue>,
}

impl SpeakReport {
    /// The synthesis failure, if the provider failed.
    pub fn synthesis_error(&self) -> Option<&SpeechIssue> {
        self.issues.iter().find(|i| i.kind == ErrorKind::Synthesis)
    }

    pub fn has_issue(&self, kind: ErrorKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

/// Completion signal of `speak`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpeakOutcome {
    Completed(SpeakReport),
    /// Superseded by a newer request, cancelled explicitly, or the engine
    /// shut down.
    Cancelled { request_id: u64 },
}

impl SpeakOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SpeakOutcome::Cancelled { .. })
    }

    pub fn report(&self) -> Option<&SpeakReport> {
        match self {
            SpeakOutcome::Completed(report) => Some(report),
            SpeakOutcome::Cancelled { .. } => None,
        }
    }
}
