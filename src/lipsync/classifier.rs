//! Rule-based viseme classification with hysteresis.

use crate::config::LipsyncConfig;
use crate::defaults;
use crate::lipsync::features::{AveragedFeatures, FeatureHistory, SpectralFrame};
use crate::lipsync::viseme::{PhoneticClass, Viseme, VisemeScores};
use serde::Serialize;

/// Result of classifying one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub viseme: Viseme,
    /// Mouth opening in `[0, 1]`; zero for silence.
    pub intensity: f32,
}

impl Classification {
    pub const SILENCE: Classification = Classification {
        viseme: Viseme::Sil,
        intensity: 0.0,
    };
}

/// Thresholds used by [`VisemeClassifier`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    pub silence: f32,
    pub voiced: f32,
    pub hysteresis: f32,
    pub fricative_centroid_hz: f32,
    pub plosive_volume_delta: f32,
    pub intensity_full_scale: f32,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            silence: defaults::SILENCE_THRESHOLD,
            voiced: defaults::VOICED_THRESHOLD,
            hysteresis: defaults::HYSTERESIS,
            fricative_centroid_hz: defaults::FRICATIVE_CENTROID_HZ,
            plosive_volume_delta: defaults::PLOSIVE_VOLUME_DELTA,
            intensity_full_scale: defaults::INTENSITY_FULL_SCALE,
        }
    }
}

impl From<&LipsyncConfig> for ClassifierThresholds {
    fn from(config: &LipsyncConfig) -> Self {
        Self {
            silence: config.silence_threshold,
            hysteresis: config.hysteresis,
            ..Self::default()
        }
    }
}

/// Picks one viseme per tick from the current frame and the history trend.
///
/// The symbol on screen changes only after a challenger has outscored it
/// (hysteresis bias included) on two consecutive ticks, so a single-frame
/// outlier never reaches the mouth.
#[derive(Debug, Clone)]
pub struct VisemeClassifier {
    thresholds: ClassifierThresholds,
    current: Viseme,
    challenged: bool,
}

impl VisemeClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self {
            thresholds,
            current: Viseme::Sil,
            challenged: false,
        }
    }

    pub fn current(&self) -> Viseme {
        self.current
    }

    pub fn class(&self) -> PhoneticClass {
        self.current.class()
    }

    pub fn reset(&mut self) {
        self.current = Viseme::Sil;
        self.challenged = false;
    }

    /// Classify `frame`, which must already be the newest entry of `history`.
    pub fn classify(&mut self, frame: &SpectralFrame, history: &FeatureHistory) -> Classification {
        let Some(avg) = history.average() else {
            self.reset();
            return Classification::SILENCE;
        };

        let mut scores = self.score(frame, &avg);
        // Favour the symbol already on screen to avoid flicker.
        scores.scale(self.current, self.thresholds.hysteresis);
        let best = scores.best();
        if best == self.current {
            self.challenged = false;
        } else if self.challenged {
            self.current = best;
            self.challenged = false;
        } else {
            self.challenged = true;
        }
        let viseme = self.current;

        if viseme == Viseme::Sil {
            return Classification::SILENCE;
        }
        Classification {
            viseme,
            intensity: (frame.volume / self.thresholds.intensity_full_scale).min(1.0),
        }
    }

    /// Raw scores before hysteresis.
    pub fn score(&self, frame: &SpectralFrame, avg: &AveragedFeatures) -> VisemeScores {
        let t = &self.thresholds;
        let mut scores = VisemeScores::default();

        if avg.volume < t.silence && frame.volume < t.silence {
            scores.set(Viseme::Sil, 1.0);
        }

        if avg.volume <= t.voiced {
            return scores;
        }

        let band = |i: usize| avg.bands.get(i).copied().unwrap_or(0.0);
        let (b2, b3, b4, b5) = (band(1), band(2), band(3), band(4));

        if b3 > 0.1 || b4 > 0.1 {
            if b4 > b3 {
                scores.set(Viseme::Aa, 0.8);
            }
            if b3 > b2 && b3 > b4 {
                scores.set(Viseme::I, 0.7);
            }
            if b3 > 0.25 && b5 > 0.25 {
                scores.set(Viseme::O, 0.7);
            }
            if b3 < 0.15 && b5 < 0.15 {
                scores.set(Viseme::U, 0.7);
            }
            if b2 > b3 && b3 > b4 {
                scores.set(Viseme::E, 1.0);
            }
        }

        if frame.centroid > t.fricative_centroid_hz {
            scores.add(Viseme::SS, 0.6);
            scores.add(Viseme::FF, 0.5);
        }

        if frame.volume - avg.volume > t.plosive_volume_delta {
            scores.add(Viseme::PP, 0.8);
            scores.add(Viseme::DD, 0.7);
            scores.add(Viseme::Kk, 0.6);
        }

        scores
    }
}

impl Default for VisemeClassifier {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default())
    }
}
