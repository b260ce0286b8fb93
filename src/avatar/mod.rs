//! The loaded character and everything that moves it.

pub mod animation;
pub mod binder;
pub mod blink;
pub mod character;
pub mod morph;

use crate::config::{AnimationConfig, LipsyncConfig};
use crate::lipsync::classifier::Classification;
use animation::{AnimationController, AnimationState, RestPoseCorrector};
use binder::{BindingStatus, MorphBinder, MorphBinding};
use blink::BlinkScheduler;
use character::Character;
use morph::MorphDriver;
use std::sync::Arc;
use std::time::Duration;

/// A character together with its binding, morph driver, animation
/// controller and blink schedule.
#[derive(Debug)]
pub struct Avatar {
    character: Character,
    binding: Arc<MorphBinding>,
    morph: MorphDriver,
    animation: AnimationController,
    blink: Option<BlinkScheduler>,
    clock: Duration,
}

impl Avatar {
    /// Bind morph channels, correct the rest pose and set up animation.
    ///
    /// # Arguments
    /// * `character` - Scene summary from the model loader
    /// * `lipsync` - Morph smoothing and jaw emphasis
    /// * `animation` - Crossfade, idle motion and blink settings
    /// * `corrector` - Rest-pose correction for this character's rig
    pub fn load(
        mut character: Character,
        lipsync: &LipsyncConfig,
        animation: &AnimationConfig,
        corrector: &dyn RestPoseCorrector,
    ) -> Self {
        let binding = Arc::new(MorphBinder::new().bind(&character));
        let morph = MorphDriver::new(Arc::clone(&binding), lipsync);
        let controller = AnimationController::load(&mut character, animation, corrector);
        let blink = (animation.blink_enabled && binding.can_blink()).then(BlinkScheduler::new);
        Self {
            character,
            binding,
            morph,
            animation: controller,
            blink,
            clock: Duration::ZERO,
        }
    }

    /// Replace the blink schedule, e.g. with a seeded one.
    pub fn with_blink(mut self, blink: Option<BlinkScheduler>) -> Self {
        self.blink = blink.filter(|_| self.binding.can_blink());
        self
    }

    pub fn character(&self) -> &Character {
        &self.character
    }

    pub fn binding(&self) -> &MorphBinding {
        &self.binding
    }

    pub fn binding_status(&self) -> BindingStatus {
        self.binding.status()
    }

    pub fn animation(&self) -> &AnimationController {
        &self.animation
    }

    pub fn state(&self) -> AnimationState {
        self.animation.state()
    }

    /// Returns false when `state` was already current.
    pub fn set_state(&mut self, state: AnimationState) -> bool {
        self.animation.set_state(state)
    }

    /// One smoothing step of the lip channels toward `classification`.
    pub fn apply(&mut self, classification: Classification) {
        self.morph.apply(&mut self.character, classification);
    }

    pub fn relax(&mut self) {
        self.morph.relax(&mut self.character);
    }

    /// Snap every lip channel (jaw included) to zero.
    pub fn zero_morphs(&mut self) {
        self.morph.zero(&mut self.character);
    }

    pub fn is_at_rest(&self) -> bool {
        self.morph.is_at_rest(&self.character)
    }

    /// Advance body animation and blinking by `dt`.
    pub fn tick(&mut self, dt: Duration) {
        self.clock += dt;
        self.animation.update(dt, &mut self.character);

        let talking = self.animation.state() == AnimationState::Talking;
        let Some(blink) = &mut self.blink else {
            return;
        };
        let weight = blink.update(self.clock, talking);
        for target in [&self.binding.blink_left, &self.binding.blink_right]
            .into_iter()
            .flatten()
        {
            self.character
                .set_weight(target.mesh, target.channel, weight * target.scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::animation::{ArmsDownCorrector, NoCorrection};
    use crate::avatar::character::{ClipSet, MorphMesh};
    use crate::lipsync::viseme::Viseme;

    fn face() -> Character {
        Character::new("face")
            .with_mesh(MorphMesh::new(
                "Head",
                &["viseme_aa", "viseme_O", "eyeBlinkLeft", "eyeBlinkRight", "jawOpen"],
            ))
            .with_clips(ClipSet {
                idle: Some("Idle".into()),
                ..ClipSet::default()
            })
    }

    fn load(character: Character) -> Avatar {
        Avatar::load(
            character,
            &LipsyncConfig::default(),
            &AnimationConfig::default(),
            &NoCorrection,
        )
    }

    #[test]
    fn test_load_reports_partial_binding() {
        let avatar = load(face());
        match avatar.binding_status() {
            BindingStatus::Partial { missing } => assert!(missing.contains(&Viseme::SS)),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(avatar.binding().can_blink());
    }

    #[test]
    fn test_apply_then_zero_leaves_mouth_at_rest() {
        let mut avatar = load(face());
        avatar.apply(Classification {
            viseme: Viseme::Aa,
            intensity: 1.0,
        });
        assert!(!avatar.is_at_rest());
        avatar.zero_morphs();
        assert!(avatar.is_at_rest());
        assert_eq!(avatar.character().weight_by_name("jawOpen"), Some(0.0));
    }

    #[test]
    fn test_blinks_while_idle_but_not_while_talking() {
        let mut avatar = load(face()).with_blink(Some(BlinkScheduler::with_seed(5)));
        let step = Duration::from_millis(10);

        let mut blinked = false;
        for _ in 0..700 {
            avatar.tick(step);
            blinked |= avatar.character().weight_by_name("eyeBlinkLeft") > Some(0.0);
        }
        assert!(blinked);

        avatar.set_state(AnimationState::Talking);
        let mut max = 0.0f32;
        // Let any blink in flight finish first.
        for _ in 0..20 {
            avatar.tick(step);
        }
        for _ in 0..1000 {
            avatar.tick(step);
            max = max.max(avatar.character().weight_by_name("eyeBlinkRight").unwrap_or(0.0));
        }
        assert_eq!(max, 0.0);
    }

    #[test]
    fn test_rest_pose_corrected_on_load() {
        let avatar = Avatar::load(
            Character::new("rig").with_bones(&["LeftArm", "RightArm"]),
            &LipsyncConfig::default(),
            &AnimationConfig::default(),
            &ArmsDownCorrector,
        );
        assert_eq!(avatar.character().bone("LeftArm").unwrap().rotation, [0.3, 0.0, -1.0]);
        assert_eq!(avatar.binding_status(), BindingStatus::AnimationOnly);
    }
}
