//! Synchronization Orchestrator: ties synthesis, decoding, playback,
//! lipsync, animation state and the transcript into one `speak` call.
//!
//! Every `speak` runs as a sequence of awaited phases:
//!
//! 1. supersede any active session (stop audio, zero morphs, force Idle)
//! 2. Thinking
//! 3. synthesis (skipped in text-only mode)
//! 4. probe + decode, off the async threads and bounded by a timeout
//! 5. Talking, start playback
//! 6. lipsync loop and transcript reveal, joined
//! 7. Idle
//!
//! Only the active session may touch the scene. Each scene mutation checks,
//! under the `active` lock, that its request is still the active one, so a
//! superseded request can never write weights over its successor.
//!
//! Lock order: `active` → `analyzer` → `avatar`.

use crate::audio::decode::{AudioDecoder, DecodedAudio, MediaDecoder};
use crate::audio::playback::{AudioOutput, PlaybackHandle};
use crate::avatar::Avatar;
use crate::avatar::animation::AnimationState;
use crate::avatar::binder::BindingStatus;
use crate::config::Config;
use crate::engine::events::{
    Degradation, EngineEvent, EventSender, SpeakOutcome, SpeakReport, SpeechIssue,
};
use crate::engine::session::{AudioSession, CancelSignal, SessionState, SpeechRequest};
use crate::engine::synth::SpeechSynthesizer;
use crate::engine::transcript::{self, RevealPace};
use crate::error::{EngineError, ErrorKind, Result};
use crate::lipsync::LipsyncAnalyzer;
use crate::lipsync::viseme::Viseme;
use parking_lot::{Mutex, MutexGuard};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Drives one avatar. Share it behind an `Arc` to speak from several tasks.
pub struct Orchestrator {
    config: Config,
    avatar: Arc<Mutex<Avatar>>,
    /// The audio analysis context. `None` once shut down.
    analyzer: Mutex<Option<LipsyncAnalyzer>>,
    active: Mutex<Option<AudioSession>>,
    next_request: AtomicU64,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    decoder: Arc<dyn AudioDecoder>,
    output: Arc<dyn AudioOutput>,
    events: EventSender,
    binding_reported: AtomicBool,
    text_only_reported: AtomicBool,
    shut_down: AtomicBool,
    render: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Creates the engine and its analysis context.
    ///
    /// Without [`with_synthesizer`](Self::with_synthesizer) the engine runs
    /// text-only.
    ///
    /// # Arguments
    /// * `config` - Validated before use
    /// * `avatar` - The loaded character
    /// * `output` - Where synthesized speech is played
    pub fn new(config: Config, avatar: Avatar, output: Arc<dyn AudioOutput>) -> Result<Self> {
        config.validate()?;
        let analyzer = LipsyncAnalyzer::new(&config.analysis, &config.lipsync)?;
        Ok(Self {
            config,
            avatar: Arc::new(Mutex::new(avatar)),
            analyzer: Mutex::new(Some(analyzer)),
            active: Mutex::new(None),
            next_request: AtomicU64::new(0),
            synthesizer: None,
            decoder: Arc::new(MediaDecoder::new()),
            output,
            events: EventSender::none(),
            binding_reported: AtomicBool::new(false),
            text_only_reported: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            render: Mutex::new(None),
        })
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_event_sender(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Locks the avatar. Do not hold the guard across an `.await`.
    pub fn avatar(&self) -> MutexGuard<'_, Avatar> {
        self.avatar.lock()
    }

    pub fn state(&self) -> AnimationState {
        self.avatar.lock().state()
    }

    pub fn binding_status(&self) -> BindingStatus {
        self.avatar.lock().binding_status()
    }

    /// Request id of the session in progress, if any.
    pub fn active_request(&self) -> Option<u64> {
        self.active.lock().as_ref().map(AudioSession::request_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// State of the session in progress, if any.
    pub fn session_state(&self) -> Option<SessionState> {
        self.active.lock().as_ref().map(AudioSession::state)
    }

    /// A request for `text` at the configured speed.
    pub fn request(&self, text: &str) -> SpeechRequest {
        SpeechRequest::new(text).with_speed(self.config.playback.speed)
    }

    /// Speak `text`, publishing the growing transcript to `on_update`.
    pub async fn speak<F>(&self, text: &str, on_update: F) -> SpeakOutcome
    where
        F: FnMut(&str) + Send,
    {
        self.speak_request(self.request(text), on_update).await
    }

    /// Speak a prepared request. Every call gets a fresh request id, even
    /// when the same request is spoken twice.
    pub async fn speak_request<F>(&self, request: SpeechRequest, mut on_update: F) -> SpeakOutcome
    where
        F: FnMut(&str) + Send,
    {
        let id = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(cancel) = self.begin_session(id) else {
            return self.cancelled(id);
        };
        tracing::info!("request {}: {} chars", id, request.text.chars().count());
        self.report_binding_once();
        let mut issues = Vec::new();

        if !self.enter_state(id, AnimationState::Thinking) {
            return self.cancelled(id);
        }
        self.status(id, "Thinking...");

        // Synthesis
        let speech = match &self.synthesizer {
            None => {
                self.report_text_only_once(id);
                None
            }
            Some(synthesizer) => {
                self.set_session_state(id, SessionState::Synthesizing);
                let Some(result) =
                    until_cancelled(&cancel, self.synthesize(id, synthesizer.as_ref(), &request)).await
                else {
                    return self.cancelled(id);
                };
                match result {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        self.recover(id, &e, &mut issues);
                        None
                    }
                }
            }
        };

        // Probe + decode
        let audio = match speech {
            None => None,
            Some(bytes) => {
                self.set_session_state(id, SessionState::Decoding);
                let Some(result) = until_cancelled(&cancel, self.load_audio(bytes)).await else {
                    return self.cancelled(id);
                };
                match result {
                    Ok(loaded) => Some(loaded),
                    Err(e) => {
                        self.recover(id, &e, &mut issues);
                        None
                    }
                }
            }
        };
        let audio_duration = audio.as_ref().map(|(duration, _)| *duration);

        // Talking + playback
        let mut playback: Option<(Arc<dyn PlaybackHandle>, DecodedAudio)> = None;
        if let Some((_, decoded)) = audio {
            if !self.enter_state(id, AnimationState::Talking) {
                return self.cancelled(id);
            }
            self.status(id, "Speaking...");
            match self.start_playback(id, &decoded, request.speed) {
                Ok(Some(handle)) => playback = Some((handle, decoded)),
                Ok(None) => return self.cancelled(id),
                Err(e) => {
                    self.recover(id, &e, &mut issues);
                    self.enter_state(id, AnimationState::Idle);
                }
            }
        } else {
            self.enter_state(id, AnimationState::Idle);
        }

        let pace = if playback.is_some() {
            RevealPace::for_duration(
                &request.text,
                audio_duration,
                request.speed,
                &self.config.transcript,
            )
        } else {
            RevealPace::fallback(request.speed, &self.config.transcript)
        };
        tracing::debug!("request {}: reveal at {:?}/char", id, pace.per_char());

        // Lipsync and transcript, side by side
        let lipsync = async {
            match &playback {
                Some((handle, decoded)) => self.drive_lipsync(id, decoded, handle, &cancel).await,
                None => 0,
            }
        };
        let events = &self.events;
        let reveal = transcript::reveal(&request.text, pace, &cancel, |prefix| {
            on_update(prefix);
            events.emit(EngineEvent::Transcript {
                request_id: id,
                text: prefix.to_string(),
            });
        });
        let (lipsync_ticks, revealed) = tokio::join!(lipsync, reveal);

        if !revealed || cancel.is_cancelled() || !self.finish_session(id) {
            return self.cancelled(id);
        }

        tracing::info!(
            "request {}: finished in {:?} ({} lipsync ticks, {} issue(s))",
            id,
            request.requested_at.elapsed(),
            lipsync_ticks,
            issues.len()
        );
        self.events.emit(EngineEvent::Finished {
            request_id: id,
            cancelled: false,
        });
        SpeakOutcome::Completed(SpeakReport {
            request_id: id,
            transcript: request.text,
            audio_duration,
            played: playback.is_some(),
            lipsync_ticks,
            issues,
        })
    }

    /// Stop the active session, if any. Its `speak` resolves as cancelled.
    pub fn cancel(&self) -> bool {
        let mut active = self.active.lock();
        let Some(mut session) = active.take() else {
            return false;
        };
        tracing::info!("request {}: cancelled", session.request_id());
        session.cancel();
        self.reset_scene();
        true
    }

    /// Cancel everything and dispose of the analysis context. Later `speak`
    /// calls resolve as cancelled immediately.
    pub fn shutdown(&self) {
        {
            let mut active = self.active.lock();
            self.shut_down.store(true, Ordering::SeqCst);
            if let Some(mut session) = active.take() {
                session.cancel();
                self.reset_scene();
            }
        }
        *self.analyzer.lock() = None;
        if let Some(task) = self.render.lock().take() {
            task.abort();
        }
        tracing::debug!("orchestrator shut down");
    }

    /// Advance body animation and blinking by `dt`, for hosts that own the
    /// frame loop.
    pub fn advance(&self, dt: Duration) {
        self.avatar.lock().tick(dt);
    }

    /// Spawn a task that advances animation at the analysis tick rate until
    /// shutdown. Must be called from within a tokio runtime.
    pub fn start_render_loop(&self) {
        let mut slot = self.render.lock();
        if slot.is_some() || self.is_shut_down() {
            return;
        }
        let avatar = Arc::clone(&self.avatar);
        let period = self.config.analysis.tick_interval();
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Instant::now();
            loop {
                interval.tick().await;
                let now = Instant::now();
                avatar.lock().tick(now - last);
                last = now;
            }
        }));
    }

    // -- session plumbing -------------------------------------------------

    /// Supersede the active session and install a new one for `id`.
    fn begin_session(&self, id: u64) -> Option<CancelSignal> {
        let mut active = self.active.lock();
        if self.is_shut_down() {
            return None;
        }
        if let Some(mut previous) = active.take() {
            tracing::info!("request {}: superseded by {}", previous.request_id(), id);
            previous.cancel();
        }
        if let Some(analyzer) = self.analyzer.lock().as_mut() {
            analyzer.reset();
        }
        self.reset_scene();
        let (session, signal) = AudioSession::new(id);
        *active = Some(session);
        Some(signal)
    }

    /// Zero every lip channel and force Idle. Caller holds `active`.
    fn reset_scene(&self) {
        let changed = {
            let mut avatar = self.avatar.lock();
            avatar.zero_morphs();
            avatar.set_state(AnimationState::Idle)
        };
        if changed {
            self.events.emit(EngineEvent::StateChanged {
                state: AnimationState::Idle,
            });
        }
    }

    /// Run `f` on the scene if `id` is still the active request.
    fn with_scene<R>(
        &self,
        id: u64,
        f: impl FnOnce(&mut LipsyncAnalyzer, &mut Avatar) -> R,
    ) -> Option<R> {
        let active = self.active.lock();
        if !is_current(&active, id) {
            return None;
        }
        let mut analyzer = self.analyzer.lock();
        let analyzer = analyzer.as_mut()?;
        let mut avatar = self.avatar.lock();
        Some(f(analyzer, &mut avatar))
    }

    /// Switch animation state on behalf of `id`. False if `id` is stale.
    fn enter_state(&self, id: u64, state: AnimationState) -> bool {
        let changed = {
            let active = self.active.lock();
            if !is_current(&active, id) {
                return false;
            }
            self.avatar.lock().set_state(state)
        };
        if changed {
            self.events.emit(EngineEvent::StateChanged { state });
        }
        true
    }

    fn set_session_state(&self, id: u64, state: SessionState) {
        if let Some(session) = self.active.lock().as_mut().filter(|s| s.request_id() == id) {
            session.set_state(state);
        }
    }

    /// Start playing under the `active` lock, so a superseded request can
    /// never start audio next to its successor.
    fn start_playback(
        &self,
        id: u64,
        audio: &DecodedAudio,
        speed: f32,
    ) -> Result<Option<Arc<dyn PlaybackHandle>>> {
        let mut active = self.active.lock();
        let Some(session) = active.as_mut().filter(|s| s.request_id() == id) else {
            return Ok(None);
        };
        let handle: Arc<dyn PlaybackHandle> = Arc::from(self.output.play(audio, speed)?);
        session.attach_playback(Arc::clone(&handle));
        Ok(Some(handle))
    }

    fn release_playback(&self, id: u64) {
        if let Some(session) = self.active.lock().as_mut().filter(|s| s.request_id() == id) {
            session.release_playback();
        }
    }

    /// Retire `id` normally. False if it was superseded meanwhile.
    fn finish_session(&self, id: u64) -> bool {
        let mut active = self.active.lock();
        if !is_current(&active, id) {
            return false;
        }
        if let Some(mut session) = active.take() {
            session.release_playback();
            session.set_state(SessionState::Finished);
        }
        self.reset_scene();
        true
    }

    // -- phases -----------------------------------------------------------

    async fn synthesize(
        &self,
        id: u64,
        synthesizer: &dyn SpeechSynthesizer,
        request: &SpeechRequest,
    ) -> Result<Vec<u8>> {
        let limit = Duration::from_millis(self.config.synthesis.request_timeout_ms);
        tracing::debug!("request {}: synthesizing via {}", id, synthesizer.name());
        let call = synthesizer.synthesize(&request.text, request.voice.as_deref());
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Synthesis {
                message: format!("provider did not answer within {}ms", limit.as_millis()),
            }),
        }
    }

    /// Probe the duration, then decode, on the blocking pool.
    async fn load_audio(&self, bytes: Vec<u8>) -> Result<(Duration, DecodedAudio)> {
        let decoder = Arc::clone(&self.decoder);
        let limit = self.config.playback.decode_timeout();
        let task = tokio::task::spawn_blocking(move || -> Result<(Duration, DecodedAudio)> {
            let duration = decoder.probe(&bytes)?;
            let audio = decoder.decode(&bytes)?;
            Ok((duration, audio))
        });
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Decode {
                message: format!("decoder task failed: {e}"),
            }),
            Err(_) => Err(EngineError::DecodeTimeout {
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Per-tick analysis while `handle` plays, then the closure hold.
    /// Returns the number of ticks applied.
    async fn drive_lipsync(
        &self,
        id: u64,
        audio: &DecodedAudio,
        handle: &Arc<dyn PlaybackHandle>,
        cancel: &CancelSignal,
    ) -> usize {
        let mut interval = tokio::time::interval(self.config.analysis.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0;
        let mut shown = Viseme::Sil;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ticks,
                _ = interval.tick() => {}
            }
            if handle.is_finished() {
                break;
            }
            let position = handle.position();
            let Some(classification) = self.with_scene(id, |analyzer, avatar| {
                let classification = analyzer.process(audio, position);
                avatar.apply(classification);
                classification
            }) else {
                return ticks;
            };
            ticks += 1;
            if classification.viseme != shown {
                shown = classification.viseme;
                self.events.emit(EngineEvent::Viseme {
                    request_id: id,
                    viseme: shown,
                    intensity: classification.intensity,
                });
            }
        }
        self.release_playback(id);

        let hold = Duration::from_millis(self.config.lipsync.closure_hold_ms);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ticks,
            _ = tokio::time::sleep(hold) => {}
        }
        self.with_scene(id, |analyzer, avatar| {
            avatar.zero_morphs();
            analyzer.reset();
        });
        if shown != Viseme::Sil {
            self.events.emit(EngineEvent::Viseme {
                request_id: id,
                viseme: Viseme::Sil,
                intensity: 0.0,
            });
        }
        ticks
    }

    // -- reporting --------------------------------------------------------

    fn cancelled(&self, id: u64) -> SpeakOutcome {
        tracing::debug!("request {}: resolved as cancelled", id);
        self.events.emit(EngineEvent::Finished {
            request_id: id,
            cancelled: true,
        });
        SpeakOutcome::Cancelled { request_id: id }
    }

    fn status(&self, id: u64, message: &str) {
        self.events.emit(EngineEvent::Status {
            request_id: id,
            message: message.to_string(),
        });
    }

    /// Record a recovered failure and publish it as degraded mode.
    fn recover(&self, id: u64, error: &EngineError, issues: &mut Vec<SpeechIssue>) {
        tracing::warn!("request {}: {} (continuing with text)", id, error);
        self.set_session_state(id, SessionState::Failed);
        let message = error.to_string();
        let condition = match error.kind() {
            ErrorKind::Synthesis => Degradation::SynthesisFailed { message },
            ErrorKind::Playback => Degradation::PlaybackFailed { message },
            ErrorKind::Decode | ErrorKind::Other => Degradation::DecodeFailed { message },
        };
        self.events.emit(EngineEvent::Degraded {
            request_id: Some(id),
            condition,
        });
        issues.push(SpeechIssue::from(error));
    }

    fn report_binding_once(&self) {
        if self.binding_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let condition = match self.binding_status() {
            BindingStatus::Complete => return,
            BindingStatus::Partial { missing } => Degradation::BindingGap { missing },
            BindingStatus::AnimationOnly => Degradation::AnimationOnly,
        };
        self.events.emit(EngineEvent::Degraded {
            request_id: None,
            condition,
        });
    }

    fn report_text_only_once(&self, id: u64) {
        if !self.text_only_reported.swap(true, Ordering::SeqCst) {
            tracing::warn!("no speech provider configured, running text-only");
            self.events.emit(EngineEvent::Degraded {
                request_id: Some(id),
                condition: Degradation::TextOnly,
            });
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.render.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("active_request", &self.active_request())
            .field("text_only", &self.synthesizer.is_none())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn is_current(active: &Option<AudioSession>, id: u64) -> bool {
    active.as_ref().is_some_and(|s| s.request_id() == id)
}

/// Await `future` unless `cancel` fires first.
async fn until_cancelled<T>(cancel: &CancelSignal, future: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = future => Some(value),
    }
}
