//! Decoding of synthesized audio into mono PCM.
//!
//! WAV goes through `hound`; everything else (the provider returns MP3) is
//! handed to `symphonia`. Both paths downmix to mono `f32` in `[-1, 1]`.

use crate::error::{EngineError, Result};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A fully decoded, mono audio buffer.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }

    /// Index of the sample playing at `position`, clamped to the buffer length.
    pub fn sample_index(&self, position: Duration) -> usize {
        let index = (position.as_secs_f64() * self.sample_rate as f64) as usize;
        index.min(self.samples.len())
    }
}

/// Exact length of `frames` at `rate`, without float rounding.
fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    let nanos = u128::from(frames) * 1_000_000_000 / u128::from(rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Turns provider audio bytes into something playable and analysable.
///
/// Both operations are blocking and are expected to run off the async
/// executor (see `tokio::task::spawn_blocking`).
pub trait AudioDecoder: Send + Sync {
    /// Determine the playable duration without decoding every frame.
    fn probe(&self, bytes: &[u8]) -> Result<Duration>;

    /// Decode the whole buffer to mono PCM.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio>;
}

/// Default decoder: `hound` for RIFF/WAVE, `symphonia` for compressed formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaDecoder;

impl MediaDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_error(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Decode {
        message: format!("{}: {}", context, e),
    }
}

impl AudioDecoder for MediaDecoder {
    fn probe(&self, bytes: &[u8]) -> Result<Duration> {
        if bytes.is_empty() {
            return Err(EngineError::Decode {
                message: "empty audio buffer".to_string(),
            });
        }
        if is_wav(bytes) {
            let reader = hound::WavReader::new(Cursor::new(bytes))
                .map_err(|e| decode_error("Invalid WAV header", e))?;
            let rate = reader.spec().sample_rate;
            if rate == 0 {
                return Err(decode_error("Invalid WAV header", "sample rate is zero"));
            }
            // `duration()` counts frames, not interleaved samples
            return Ok(frames_to_duration(u64::from(reader.duration()), rate));
        }

        let (format, track_id) = open_symphonia(bytes)?;
        let params = format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.codec_params.clone())
            .ok_or_else(|| decode_error("Probe failed", "audio track disappeared"))?;

        match (params.n_frames, params.sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => Ok(frames_to_duration(frames, rate)),
            // Streams without a frame count in their headers need a full pass.
            _ => self.decode(bytes).map(|audio| audio.duration()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        if bytes.is_empty() {
            return Err(EngineError::Decode {
                message: "empty audio buffer".to_string(),
            });
        }
        if is_wav(bytes) {
            decode_wav(bytes)
        } else {
            decode_compressed(bytes)
        }
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| decode_error("Invalid WAV header", e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| decode_error("Failed to read WAV samples", e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| decode_error("Failed to read WAV samples", e))?
        }
    };

    Ok(DecodedAudio::new(
        downmix(&interleaved, channels),
        spec.sample_rate,
    ))
}

fn open_symphonia(bytes: &[u8]) -> Result<(Box<dyn FormatReader>, u32)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error("Unrecognized audio format", e))?;

    let format = probed.format;
    let track_id = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| t.id)
        .ok_or_else(|| decode_error("Unrecognized audio format", "no decodable track"))?;
    Ok((format, track_id))
}

fn decode_compressed(bytes: &[u8]) -> Result<DecodedAudio> {
    let (mut format, track_id) = open_symphonia(bytes)?;
    let params = format
        .tracks()
        .iter()
        .find(|t| t.id == track_id)
        .map(|t| t.codec_params.clone())
        .ok_or_else(|| decode_error("Decode failed", "audio track disappeared"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| decode_error("Unsupported codec", e))?;

    let mut sample_rate = params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_error("Failed to read packet", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frames are skipped; the stream may still be usable.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable frame: {}", e);
                continue;
            }
            Err(e) => return Err(decode_error("Decode failed", e)),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend(downmix(buffer.samples(), channels));
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(decode_error("Decode failed", "stream contained no audio"));
    }

    Ok(DecodedAudio::new(samples, sample_rate))
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
