//! Audio-to-viseme analysis.
//!
//! [`LipsyncAnalyzer`] owns the whole analysis chain for one playback stream:
//! spectrum analyser, feature extractor and classifier. It is the only place
//! that reads the audio being analysed.

pub mod classifier;
pub mod features;
pub mod viseme;

use crate::audio::analyser::SpectrumAnalyser;
use crate::audio::decode::DecodedAudio;
use crate::config::{AnalysisConfig, LipsyncConfig};
use crate::error::Result;
use classifier::{Classification, ClassifierThresholds, VisemeClassifier};
use features::{FeatureExtractor, SpectralFrame};
use serde::Serialize;
use std::time::Duration;

/// Analysis chain bound to the currently playing stream.
#[derive(Debug)]
pub struct LipsyncAnalyzer {
    analyser: SpectrumAnalyser,
    extractor: FeatureExtractor,
    classifier: VisemeClassifier,
}

/// One analysed tick, as reported by [`LipsyncAnalyzer::analyze_track`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSample {
    pub position: Duration,
    pub frame: SpectralFrame,
    pub classification: Classification,
}

impl LipsyncAnalyzer {
    pub fn new(analysis: &AnalysisConfig, lipsync: &LipsyncConfig) -> Result<Self> {
        Ok(Self {
            analyser: SpectrumAnalyser::new(analysis.fft_size, analysis.smoothing_time_constant)?,
            extractor: FeatureExtractor::new(analysis.history_size),
            classifier: VisemeClassifier::new(ClassifierThresholds::from(lipsync)),
        })
    }

    /// Drop all state carried over from a previous stream.
    pub fn reset(&mut self) {
        self.analyser.reset();
        self.extractor.reset();
        self.classifier.reset();
    }

    /// Analyse the audio around `position` and classify it.
    pub fn process(&mut self, audio: &DecodedAudio, position: Duration) -> Classification {
        self.process_frame(audio, position).1
    }

    fn process_frame(
        &mut self,
        audio: &DecodedAudio,
        position: Duration,
    ) -> (SpectralFrame, Classification) {
        let snapshot = self.analyser.snapshot(audio, position);
        let frame = self
            .extractor
            .extract(snapshot.as_ref(), position.as_secs_f32());
        let classification = self.classifier.classify(&frame, self.extractor.history());
        (frame, classification)
    }

    /// Walk a whole buffer at `tick` intervals, without playing it.
    pub fn analyze_track(&mut self, audio: &DecodedAudio, tick: Duration) -> Vec<TrackSample> {
        self.reset();
        let duration = audio.duration();
        if tick.is_zero() {
            return Vec::new();
        }
        let mut samples = Vec::new();
        let mut position = Duration::ZERO;
        while position < duration {
            let (frame, classification) = self.process_frame(audio, position);
            samples.push(TrackSample {
                position,
                frame,
                classification,
            });
            position += tick;
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lipsync::viseme::Viseme;

    fn analyzer() -> LipsyncAnalyzer {
        LipsyncAnalyzer::new(&AnalysisConfig::default(), &LipsyncConfig::default()).unwrap()
    }

    /// Harmonic buzz rich enough to light up every speech band.
    fn buzz(sample_rate: u32, seconds: f32) -> DecodedAudio {
        let n = (sample_rate as f32 * seconds) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (1..=60)
                    .map(|h| (2.0 * std::f64::consts::PI * 120.0 * h as f64 * t).sin())
                    .sum::<f64>() as f32
                    * 0.01
            })
            .collect();
        DecodedAudio::new(samples, sample_rate)
    }

    #[test]
    fn test_silence_track_is_all_silence() {
        let audio = DecodedAudio::new(vec![0.0; 22050], 22050);
        let samples = analyzer().analyze_track(&audio, Duration::from_millis(50));
        assert_eq!(samples.len(), 20);
        assert!(samples.iter().all(|s| s.classification.viseme == Viseme::Sil));
    }

    #[test]
    fn test_voiced_track_produces_mouth_movement() {
        let audio = buzz(22050, 1.0);
        let samples = analyzer().analyze_track(&audio, Duration::from_millis(1000 / 60));
        let voiced = samples
            .iter()
            .filter(|s| s.classification.viseme != Viseme::Sil)
            .count();
        assert!(voiced > samples.len() / 2, "only {} of {} voiced", voiced, samples.len());
    }

    #[test]
    fn test_past_end_position_is_silence() {
        let audio = buzz(22050, 0.2);
        let mut analyzer = analyzer();
        let result = analyzer.process(&audio, Duration::from_secs(1));
        assert_eq!(result, Classification::SILENCE);
    }

    #[test]
    fn test_zero_tick_yields_nothing() {
        let audio = buzz(22050, 0.1);
        assert!(analyzer().analyze_track(&audio, Duration::ZERO).is_empty());
    }
}
