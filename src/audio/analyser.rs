//! Frequency-domain analysis of the playing audio.
//!
//! Produces one normalized magnitude spectrum per tick from the samples
//! around the current playback position. Blackman window, per-bin
//! temporal smoothing and a fixed decibel window mapped onto `[0, 1]`.

use crate::audio::decode::DecodedAudio;
use crate::defaults;
use crate::error::{EngineError, Result};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

/// One normalized magnitude spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumSnapshot {
    /// Per-bin magnitude in `[0, 1]`; `fft_size / 2` entries.
    pub magnitudes: Vec<f32>,
    /// Width of one bin in Hz (`sample_rate / fft_size`).
    pub bin_width_hz: f32,
}

impl SpectrumSnapshot {
    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }
}

/// Analyser bound to a single playback stream.
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self> {
        if !fft_size.is_power_of_two()
            || !(defaults::MIN_FFT_SIZE..=defaults::MAX_FFT_SIZE).contains(&fft_size)
        {
            return Err(EngineError::ConfigInvalidValue {
                key: "analysis.fft_size".to_string(),
                message: format!("{} is not a supported FFT size", fft_size),
            });
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|n| {
                let x = 2.0 * PI * n as f32 / fft_size as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Ok(Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            fft,
            window,
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Forget smoothing state from a previous stream.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Spectrum of the `fft_size` samples ending at `position`.
    ///
    /// Returns `None` when no signal is available: empty audio or a position
    /// past the end of the buffer.
    pub fn snapshot(
        &mut self,
        audio: &DecodedAudio,
        position: Duration,
    ) -> Option<SpectrumSnapshot> {
        let samples = audio.samples();
        if samples.is_empty() || audio.sample_rate() == 0 || position >= audio.duration() {
            return None;
        }

        let end = audio.sample_index(position);
        let start = end.saturating_sub(self.fft_size);
        // Zero-pad the head when the window reaches before the first sample.
        let pad = self.fft_size - (end - start);
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { samples[start + i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let range = defaults::MAX_DECIBELS - defaults::MIN_DECIBELS;
        let scale = 1.0 / self.fft_size as f32;
        let smoothing = self.smoothing;
        let magnitudes = self
            .smoothed
            .iter_mut()
            .zip(&self.buffer)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
                if *smoothed <= 0.0 {
                    return 0.0;
                }
                let db = 20.0 * smoothed.log10();
                ((db - defaults::MIN_DECIBELS) / range).clamp(0.0, 1.0)
            })
            .collect();

        Some(SpectrumSnapshot {
            magnitudes,
            bin_width_hz: audio.sample_rate() as f32 / self.fft_size as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, seconds: f32) -> DecodedAudio {
        let n = (sample_rate as f32 * seconds) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * freq as f64 * t).sin() as f32
            })
            .collect();
        DecodedAudio::new(samples, sample_rate)
    }

    #[test]
    fn test_rejects_unsupported_fft_sizes() {
        assert!(SpectrumAnalyser::new(1000, 0.8).is_err());
        assert!(SpectrumAnalyser::new(128, 0.8).is_err());
        assert!(SpectrumAnalyser::new(8192, 0.8).is_err());
        assert!(SpectrumAnalyser::new(2048, 0.8).is_ok());
    }

    #[test]
    fn test_snapshot_has_half_fft_bins() {
        let mut analyser = SpectrumAnalyser::new(1024, 0.0).unwrap();
        let audio = sine(440.0, 0.5, 16000, 1.0);
        let snap = analyser.snapshot(&audio, Duration::from_millis(500)).unwrap();
        assert_eq!(snap.bin_count(), 512);
        assert!((snap.bin_width_hz - 15.625).abs() < 1e-4);
    }

    #[test]
    fn test_sine_peaks_at_its_frequency_bin() {
        let mut analyser = SpectrumAnalyser::new(2048, 0.0).unwrap();
        let audio = sine(1000.0, 0.5, 16000, 1.0);
        let snap = analyser.snapshot(&audio, Duration::from_millis(600)).unwrap();

        let peak = snap
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let expected = (1000.0 / snap.bin_width_hz).round() as usize;
        assert!(peak.abs_diff(expected) <= 1, "peak {} expected {}", peak, expected);
        assert!(snap.magnitudes[peak] > 0.9);
        // Far from the tone the Blackman sidelobes are below the floor.
        assert!(snap.magnitudes[expected * 3] < 0.1);
    }

    #[test]
    fn test_silence_maps_to_zero() {
        let mut analyser = SpectrumAnalyser::new(512, 0.8).unwrap();
        let audio = DecodedAudio::new(vec![0.0; 8000], 8000);
        let snap = analyser.snapshot(&audio, Duration::from_millis(500)).unwrap();
        assert!(snap.magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_no_signal_past_the_end() {
        let mut analyser = SpectrumAnalyser::new(512, 0.8).unwrap();
        let audio = sine(440.0, 0.5, 8000, 0.5);
        assert!(analyser.snapshot(&audio, Duration::from_secs(1)).is_none());
        let empty = DecodedAudio::new(Vec::new(), 8000);
        assert!(analyser.snapshot(&empty, Duration::ZERO).is_none());
    }

    #[test]
    fn test_smoothing_carries_energy_into_silence() {
        let mut analyser = SpectrumAnalyser::new(512, 0.8).unwrap();
        let mut samples: Vec<f32> = sine(500.0, 0.5, 8000, 0.5).samples().to_vec();
        samples.extend(std::iter::repeat_n(0.0, 4000));
        let audio = DecodedAudio::new(samples, 8000);

        analyser.snapshot(&audio, Duration::from_millis(400)).unwrap();
        let decayed = analyser.snapshot(&audio, Duration::from_millis(900)).unwrap();
        assert!(decayed.magnitudes.iter().any(|&m| m > 0.0));

        analyser.reset();
        let fresh = analyser.snapshot(&audio, Duration::from_millis(900)).unwrap();
        assert!(fresh.magnitudes.iter().all(|&m| m == 0.0));
    }
}
