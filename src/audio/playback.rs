//! Audio output abstraction.
//!
//! The orchestrator only needs three things from a playing stream: where the
//! playhead is (in source time), whether it has finished, and a way to stop
//! it immediately. Real devices live behind `cpal-audio`; `ClockedOutput`
//! advances a virtual playhead on the tokio clock for headless runs and tests.

use crate::audio::decode::DecodedAudio;
use crate::error::{EngineError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// A stream that has been started on some output.
pub trait PlaybackHandle: Send + Sync {
    /// Playhead position measured in source audio time.
    fn position(&self) -> Duration;

    /// True once the whole buffer has been played or the stream was stopped.
    fn is_finished(&self) -> bool;

    /// Stop immediately. Must be idempotent.
    fn stop(&self);
}

/// Something that can play decoded audio.
pub trait AudioOutput: Send + Sync {
    /// Start playing `audio` at `speed` (1.0 = natural rate).
    fn play(&self, audio: &DecodedAudio, speed: f32) -> Result<Box<dyn PlaybackHandle>>;
}

impl<T: AudioOutput + ?Sized> AudioOutput for Arc<T> {
    fn play(&self, audio: &DecodedAudio, speed: f32) -> Result<Box<dyn PlaybackHandle>> {
        (**self).play(audio, speed)
    }
}

/// Counters shared between a [`ClockedOutput`] and its handles.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    started: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PlaybackStats {
    /// Streams ever started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Streams currently playing (started and not yet stopped or finished).
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously playing streams observed.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Output that plays nothing but keeps time like a real device.
#[derive(Debug, Clone, Default)]
pub struct ClockedOutput {
    stats: Arc<PlaybackStats>,
    should_fail: bool,
    error_message: Option<String>,
}

impl ClockedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every `play` call, like a platform without an output device.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }
}

impl AudioOutput for ClockedOutput {
    fn play(&self, audio: &DecodedAudio, speed: f32) -> Result<Box<dyn PlaybackHandle>> {
        if self.should_fail {
            return Err(EngineError::Playback {
                message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "playback refused".to_string()),
            });
        }
        self.stats.begin();
        Ok(Box::new(ClockedHandle {
            started_at: Instant::now(),
            duration: audio.duration(),
            speed: speed.max(f32::EPSILON),
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ClockedHandle {
    started_at: Instant,
    duration: Duration,
    speed: f32,
    stopped: AtomicBool,
    released: AtomicBool,
    stats: Arc<PlaybackStats>,
}

impl ClockedHandle {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.stats.end();
        }
    }
}

impl PlaybackHandle for ClockedHandle {
    fn position(&self) -> Duration {
        self.started_at
            .elapsed()
            .mul_f32(self.speed)
            .min(self.duration)
    }

    fn is_finished(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return true;
        }
        let finished = self.position() >= self.duration;
        if finished {
            self.release();
        }
        finished
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.release();
    }
}

impl Drop for ClockedHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_second() -> DecodedAudio {
        DecodedAudio::new(vec![0.0; 1000], 1000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clocked_position_follows_time_and_speed() {
        let output = ClockedOutput::new();
        let handle = output.play(&one_second(), 2.0).unwrap();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(handle.position(), Duration::from_millis(500));
        assert!(!handle.is_finished());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(handle.position(), Duration::from_secs(1));
        assert!(handle.is_finished());
        assert_eq!(output.stats().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_releases_once() {
        let output = ClockedOutput::new();
        let stats = output.stats();
        let handle = output.play(&one_second(), 1.0).unwrap();
        assert_eq!(stats.active(), 1);
        handle.stop();
        handle.stop();
        assert!(handle.is_finished());
        assert_eq!(stats.active(), 0);
        drop(handle);
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_tracks_overlapping_streams() {
        let output = ClockedOutput::new();
        let a = output.play(&one_second(), 1.0).unwrap();
        let b = output.play(&one_second(), 1.0).unwrap();
        a.stop();
        b.stop();
        assert_eq!(output.stats().peak_active(), 2);
    }

    #[test]
    fn test_failing_output_reports_playback_error() {
        let output = ClockedOutput::new()
            .with_failure()
            .with_error_message("autoplay blocked");
        let err = output.play(&one_second(), 1.0).err().unwrap();
        assert_eq!(err.to_string(), "Audio playback failed: autoplay blocked");
        assert_eq!(output.stats().started(), 0);
    }
}
