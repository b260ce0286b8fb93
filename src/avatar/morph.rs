//! Applies classified visemes to the bound blend channels.

use crate::avatar::binder::MorphBinding;
use crate::avatar::character::Character;
use crate::config::LipsyncConfig;
use crate::defaults;
use crate::lipsync::classifier::Classification;
use std::collections::HashMap;
use std::sync::Arc;

/// Weights below this are treated as fully closed.
const REST_EPSILON: f32 = 1e-3;

/// Drives lip channels toward per-tick targets with exponential smoothing.
#[derive(Debug, Clone)]
pub struct MorphDriver {
    binding: Arc<MorphBinding>,
    channels: Vec<(usize, usize)>,
    smoothing: f32,
    jaw_emphasis: f32,
}

impl MorphDriver {
    pub fn new(binding: Arc<MorphBinding>, config: &LipsyncConfig) -> Self {
        Self {
            channels: binding.lip_channels(),
            binding,
            smoothing: config.morph_smoothing.clamp(f32::EPSILON, 1.0),
            jaw_emphasis: config.jaw_emphasis,
        }
    }

    pub fn binding(&self) -> &MorphBinding {
        &self.binding
    }

    /// Target weight per driven channel for one classification.
    fn targets(&self, classification: Classification) -> HashMap<(usize, usize), f32> {
        let mut targets: HashMap<(usize, usize), f32> =
            self.channels.iter().map(|&key| (key, 0.0)).collect();

        let Some(target) = self.binding.target(classification.viseme) else {
            return targets;
        };
        let weight = (classification.intensity * target.scale).clamp(0.0, 1.0);
        let slot = targets.entry((target.mesh, target.channel)).or_insert(0.0);
        *slot = slot.max(weight);

        if classification.viseme.is_open_vowel()
            && classification.intensity > defaults::JAW_INTENSITY_THRESHOLD
            && let Some(jaw) = &self.binding.jaw
        {
            let slot = targets.entry((jaw.mesh, jaw.channel)).or_insert(0.0);
            *slot = slot.max(weight * self.jaw_emphasis);
        }

        targets
    }

    /// One smoothing step toward the shape for `classification`.
    pub fn apply(&self, character: &mut Character, classification: Classification) {
        for ((mesh, channel), target) in self.targets(classification) {
            let current = character.weight(mesh, channel);
            character.set_weight(mesh, channel, current + (target - current) * self.smoothing);
        }
    }

    /// One smoothing step toward a closed mouth.
    pub fn relax(&self, character: &mut Character) {
        self.apply(character, Classification::SILENCE);
    }

    /// Snap every driven channel to zero.
    pub fn zero(&self, character: &mut Character) {
        for &(mesh, channel) in &self.channels {
            character.set_weight(mesh, channel, 0.0);
        }
    }

    pub fn is_at_rest(&self, character: &Character) -> bool {
        self.channels
            .iter()
            .all(|&(mesh, channel)| character.weight(mesh, channel) < REST_EPSILON)
    }
}
