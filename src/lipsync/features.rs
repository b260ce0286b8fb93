//! Spectral feature extraction and the rolling feature history.

use crate::audio::analyser::SpectrumSnapshot;
use crate::defaults;
use serde::Serialize;
use std::collections::VecDeque;

/// Features of one analysis tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralFrame {
    /// Mean normalized magnitude per band, each in `[0, 1]`.
    pub band_energies: Vec<f32>,
    /// Change of each band against the previous frame.
    pub band_deltas: Vec<f32>,
    /// Amplitude-weighted mean frequency in Hz.
    pub centroid: f32,
    /// Mean of the band energies.
    pub volume: f32,
    /// Seconds since the start of the playback stream.
    pub timestamp: f32,
}

impl SpectralFrame {
    /// A frame with no energy anywhere.
    pub fn silent(band_count: usize, timestamp: f32) -> Self {
        Self {
            band_energies: vec![0.0; band_count],
            band_deltas: vec![0.0; band_count],
            centroid: 0.0,
            volume: 0.0,
            timestamp,
        }
    }
}

/// Mean of every frame currently in the history.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedFeatures {
    pub volume: f32,
    pub centroid: f32,
    pub bands: Vec<f32>,
}

/// Bounded FIFO of recent frames.
#[derive(Debug, Clone)]
pub struct FeatureHistory {
    frames: VecDeque<SpectralFrame>,
    capacity: usize,
}

impl FeatureHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: SpectralFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&SpectralFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn average(&self) -> Option<AveragedFeatures> {
        let first = self.frames.front()?;
        let n = self.frames.len() as f32;
        let mut bands = vec![0.0; first.band_energies.len()];
        let mut volume = 0.0;
        let mut centroid = 0.0;
        for frame in &self.frames {
            volume += frame.volume;
            centroid += frame.centroid;
            for (sum, energy) in bands.iter_mut().zip(&frame.band_energies) {
                *sum += energy;
            }
        }
        bands.iter_mut().for_each(|b| *b /= n);
        Some(AveragedFeatures {
            volume: volume / n,
            centroid: centroid / n,
            bands,
        })
    }
}

/// Converts spectra into [`SpectralFrame`]s and records them.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    bands: Vec<(f32, f32)>,
    history: FeatureHistory,
}

impl FeatureExtractor {
    pub fn new(history_size: usize) -> Self {
        Self::with_bands(defaults::BANDS_HZ.to_vec(), history_size)
    }

    pub fn with_bands(bands: Vec<(f32, f32)>, history_size: usize) -> Self {
        Self {
            bands,
            history: FeatureHistory::new(history_size),
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn history(&self) -> &FeatureHistory {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Extract features for one tick and append them to the history.
    ///
    /// A missing snapshot (no signal) yields an all-zero frame, which is
    /// recorded like any other so the history keeps a fixed time base.
    pub fn extract(
        &mut self,
        snapshot: Option<&SpectrumSnapshot>,
        timestamp: f32,
    ) -> SpectralFrame {
        let mut frame = match snapshot {
            Some(snapshot) if !snapshot.magnitudes.is_empty() => {
                self.frame_from(snapshot, timestamp)
            }
            _ => SpectralFrame::silent(self.bands.len(), timestamp),
        };

        if let Some(previous) = self.history.latest() {
            for (delta, (now, before)) in frame
                .band_deltas
                .iter_mut()
                .zip(frame.band_energies.iter().zip(&previous.band_energies))
            {
                *delta = now - before;
            }
        }

        self.history.push(frame.clone());
        frame
    }

    fn frame_from(&self, snapshot: &SpectrumSnapshot, timestamp: f32) -> SpectralFrame {
        let magnitudes = &snapshot.magnitudes;
        let last = magnitudes.len() - 1;
        let width = snapshot.bin_width_hz.max(f32::EPSILON);

        let band_energies: Vec<f32> = self
            .bands
            .iter()
            .map(|&(lo, hi)| {
                let start = ((lo / width).round() as usize).min(last);
                let end = ((hi / width).round() as usize).min(last);
                if end <= start {
                    return 0.0;
                }
                let slice = &magnitudes[start..end];
                slice.iter().sum::<f32>() / slice.len() as f32
            })
            .collect();

        let mut total = 0.0;
        let mut weighted = 0.0;
        for (i, &amp) in magnitudes.iter().enumerate() {
            total += amp;
            weighted += i as f32 * width * amp;
        }
        let centroid = if total > 0.0 { weighted / total } else { 0.0 };
        let volume = band_energies.iter().sum::<f32>() / band_energies.len().max(1) as f32;

        SpectralFrame {
            band_deltas: vec![0.0; band_energies.len()],
            band_energies,
            centroid,
            volume,
            timestamp,
        }
    }
}
