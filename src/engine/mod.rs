//! Speech sessions: synthesis, transcript pacing and the orchestrator that
//! keeps audio, lips, body and text in step.

pub mod events;
pub mod orchestrator;
pub mod session;
pub mod synth;
pub mod transcript;

pub use events::{Degradation, EngineEvent, EventSender, SpeakOutcome, SpeakReport, SpeechIssue};
pub use orchestrator::Orchestrator;
pub use session::{CancelSignal, CancelTrigger, SessionState, SpeechRequest};
pub use synth::{MockSynthesizer, Prerecorded, SpeechSynthesizer};
