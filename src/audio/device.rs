//! Speaker output using CPAL (Cross-Platform Audio Library).

use crate::audio::decode::DecodedAudio;
use crate::audio::playback::{AudioOutput, PlaybackHandle};
use crate::error::{EngineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes every backend it knows about when opening the default host;
/// ALSA and JACK complain loudly on stderr for each one that is missing.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` on fd 2. Safe as long as no other thread is
/// concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the handle's Mutex, and only
/// to pause or drop it.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Plays decoded audio on the default output device.
pub struct CpalOutput {
    device: cpal::Device,
}

impl CpalOutput {
    pub fn new() -> Result<Self> {
        let device = with_suppressed_stderr(|| cpal::default_host().default_output_device())
            .ok_or_else(|| EngineError::Playback {
                message: "no output device available".to_string(),
            })?;
        Ok(Self { device })
    }
}

impl AudioOutput for CpalOutput {
    fn play(&self, audio: &DecodedAudio, speed: f32) -> Result<Box<dyn PlaybackHandle>> {
        let config = self
            .device
            .default_output_config()
            .map_err(|e| EngineError::Playback {
                message: format!("Failed to query output config: {}", e),
            })?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::Playback {
                message: format!(
                    "Unsupported output sample format: {:?}",
                    config.sample_format()
                ),
            });
        }

        let device_rate = config.sample_rate().0;
        let channels = config.channels().max(1) as usize;
        let stream_config: cpal::StreamConfig = config.into();

        // Source frames advanced per device frame, including the speed factor.
        let step = audio.sample_rate() as f64 / device_rate as f64 * speed as f64;
        let samples: Arc<[f32]> = audio.samples().into();
        let cursor = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let total = samples.len();
        let cb_cursor = Arc::clone(&cursor);
        let cb_finished = Arc::clone(&finished);
        let mut phase = 0.0f64;
        let stream = self
            .device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let index = phase as usize;
                        let value = if index < total {
                            // Linear interpolation between neighbouring samples.
                            let next = samples.get(index + 1).copied().unwrap_or(0.0);
                            let frac = (phase - index as f64) as f32;
                            samples[index] * (1.0 - frac) + next * frac
                        } else {
                            cb_finished.store(true, Ordering::SeqCst);
                            0.0
                        };
                        frame.iter_mut().for_each(|s| *s = value);
                        phase += step;
                    }
                    cb_cursor.store((phase as u64).min(total as u64), Ordering::SeqCst);
                },
                |err| tracing::warn!("audio output stream error: {}", err),
                None,
            )
            .map_err(|e| EngineError::Playback {
                message: format!("Failed to build output stream: {}", e),
            })?;

        stream.play().map_err(|e| EngineError::Playback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        Ok(Box::new(CpalHandle {
            stream: Mutex::new(Some(SendableStream(stream))),
            cursor,
            finished,
            sample_rate: audio.sample_rate(),
        }))
    }
}

struct CpalHandle {
    stream: Mutex<Option<SendableStream>>,
    cursor: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    sample_rate: u32,
}

impl PlaybackHandle for CpalHandle {
    fn position(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.cursor.load(Ordering::SeqCst);
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst) || self.stream.lock().is_none()
    }

    fn stop(&self) {
        if let Some(SendableStream(stream)) = self.stream.lock().take()
            && let Err(e) = stream.pause()
        {
            tracing::debug!("failed to pause output stream: {}", e);
        }
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
