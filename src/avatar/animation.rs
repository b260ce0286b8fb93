//! Animation State Controller: idle/thinking/talking clips, crossfades,
//! synthetic idle motion and rest-pose correction.

use crate::avatar::character::{Bone, Character, ClipSet};
use crate::config::AnimationConfig;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::time::Duration;

/// Logical body state. Exactly one is current, even mid-crossfade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    #[default]
    Idle,
    Thinking,
    Talking,
}

impl std::fmt::Display for AnimationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnimationState::Idle => "idle",
            AnimationState::Thinking => "thinking",
            AnimationState::Talking => "talking",
        };
        f.write_str(name)
    }
}

/// What actually moves the body for a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "clip", rename_all = "snake_case")]
pub enum Motion {
    /// An authored clip, by name.
    Clip(String),
    /// Small periodic root offset used when the character has no clips.
    Synthetic,
}

/// A time-bounded blend from one motion to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Crossfade {
    pub from: Motion,
    pub to: Motion,
    elapsed: Duration,
    duration: Duration,
}

impl Crossfade {
    /// Blend factor of `to`, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Owns the body animation of one character.
#[derive(Debug, Clone)]
pub struct AnimationController {
    clips: ClipSet,
    state: AnimationState,
    active: Motion,
    fade: Option<Crossfade>,
    fades_started: u64,
    crossfade: Duration,
    idle_amplitude: f32,
    idle_hz: f32,
    base_position: [f32; 3],
    elapsed: Duration,
}

impl AnimationController {
    pub fn new(clips: ClipSet, config: &AnimationConfig, base_position: [f32; 3]) -> Self {
        let active = motion_for(&clips, AnimationState::Idle);
        Self {
            clips,
            state: AnimationState::Idle,
            active,
            fade: None,
            fades_started: 0,
            crossfade: Duration::from_millis(config.crossfade_ms),
            idle_amplitude: config.idle_motion_amplitude,
            idle_hz: config.idle_motion_hz,
            base_position,
            elapsed: Duration::ZERO,
        }
    }

    /// Build the controller for a freshly loaded character, correcting its
    /// rest pose once if `corrector` recognizes it.
    pub fn load(
        character: &mut Character,
        config: &AnimationConfig,
        corrector: &dyn RestPoseCorrector,
    ) -> Self {
        let corrected = corrector.correct(&mut character.bones);
        if corrected > 0 {
            tracing::info!(
                "{}: corrected rest pose on {} bone(s)",
                character.name,
                corrected
            );
        }
        if character.clips.is_empty() {
            tracing::warn!(
                "{}: no animation clips, using synthetic idle motion",
                character.name
            );
        }
        Self::new(character.clips.clone(), config, character.root.position)
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn active_motion(&self) -> &Motion {
        &self.active
    }

    pub fn crossfade(&self) -> Option<&Crossfade> {
        self.fade.as_ref()
    }

    /// Number of crossfades started since creation.
    pub fn fades_started(&self) -> u64 {
        self.fades_started
    }

    /// Switch to `state`. Returns false when it was already current.
    pub fn set_state(&mut self, state: AnimationState) -> bool {
        if state == self.state {
            return false;
        }
        let next = motion_for(&self.clips, state);
        tracing::debug!("animation {} -> {} ({:?})", self.state, state, next);
        let previous = std::mem::replace(&mut self.active, next.clone());
        self.fade = Some(Crossfade {
            from: previous,
            to: next,
            elapsed: Duration::ZERO,
            duration: self.crossfade,
        });
        self.fades_started += 1;
        self.state = state;
        true
    }

    /// Current blend: each motion with its weight, summing to 1.
    pub fn blend(&self) -> Vec<(Motion, f32)> {
        match &self.fade {
            Some(fade) => {
                let p = fade.progress();
                vec![(fade.from.clone(), 1.0 - p), (fade.to.clone(), p)]
            }
            None => vec![(self.active.clone(), 1.0)],
        }
    }

    /// Advance crossfades and synthetic motion by `dt`.
    pub fn update(&mut self, dt: Duration, character: &mut Character) {
        self.elapsed += dt;
        if let Some(fade) = &mut self.fade {
            fade.elapsed += dt;
            if fade.is_done() {
                self.fade = None;
            }
        }

        let synthetic: f32 = self
            .blend()
            .iter()
            .filter(|(motion, _)| *motion == Motion::Synthetic)
            .map(|(_, weight)| weight)
            .sum();
        if synthetic > 0.0 {
            let phase = 2.0 * PI * self.idle_hz * self.elapsed.as_secs_f32();
            character.root.position[1] =
                self.base_position[1] + self.idle_amplitude * phase.sin() * synthetic;
        }
    }
}

/// Motion used for `state`, with fallbacks: Thinking and Talking borrow the
/// Idle clip; with no usable clip the synthetic idle takes over.
fn motion_for(clips: &ClipSet, state: AnimationState) -> Motion {
    let own = match state {
        AnimationState::Idle => None,
        AnimationState::Thinking => clips.thinking.as_ref(),
        AnimationState::Talking => clips.talking.as_ref(),
    };
    own.or(clips.idle.as_ref())
        .map(|name| Motion::Clip(name.clone()))
        .unwrap_or(Motion::Synthetic)
}

/// Fixes a character's rest pose on load. Returns the number of bones changed.
pub trait RestPoseCorrector: Send + Sync {
    fn correct(&self, bones: &mut [Bone]) -> usize;
}

/// Leaves every bone alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl RestPoseCorrector for NoCorrection {
    fn correct(&self, _bones: &mut [Bone]) -> usize {
        0
    }
}

/// Lowers arms that are still at their authoring-default (T-pose) rotation.
///
/// Bone roles are guessed from names (`LeftArm`, `mixamorigRightForeArm`,
/// `clavicle_l`...), which suits common humanoid exports and may misfire on
/// other rigs; swap in [`NoCorrection`] or a custom corrector for those.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmsDownCorrector;

/// Rotations within this of zero count as the authoring default.
const DEFAULT_POSE_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmJoint {
    Shoulder,
    UpperArm,
    Forearm,
    Hand,
}

const FINGERS: [&str; 5] = ["thumb", "index", "middle", "ring", "pinky"];

fn side_of(name: &str) -> Option<Side> {
    if name.contains("left") || name.starts_with("l_") || name.ends_with("_l") || name.ends_with(".l") {
        Some(Side::Left)
    } else if name.contains("right")
        || name.starts_with("r_")
        || name.ends_with("_r")
        || name.ends_with(".r")
    {
        Some(Side::Right)
    } else {
        None
    }
}

fn joint_of(name: &str) -> Option<ArmJoint> {
    if name.contains("forearm") || name.contains("lowerarm") {
        Some(ArmJoint::Forearm)
    } else if name.contains("hand") {
        (!FINGERS.iter().any(|f| name.contains(f))).then_some(ArmJoint::Hand)
    } else if name.contains("shoulder") || name.contains("clavicle") {
        Some(ArmJoint::Shoulder)
    } else if name.contains("upperarm") || name.contains("arm") {
        Some(ArmJoint::UpperArm)
    } else {
        None
    }
}

fn at_default(bone: &Bone) -> bool {
    bone.rotation.iter().all(|r| r.abs() < DEFAULT_POSE_EPSILON)
}

/// Corrective rotation `[x, y, z]` for a joint, if it has one.
fn lowered_rotation(joint: ArmJoint, side: Option<Side>) -> Option<[f32; 3]> {
    match (joint, side) {
        (ArmJoint::Shoulder, Some(Side::Left)) => Some([0.0, 0.2, -0.6]),
        (ArmJoint::Shoulder, Some(Side::Right)) => Some([0.0, -0.2, 0.6]),
        (ArmJoint::UpperArm, Some(Side::Left)) => Some([0.3, 0.0, -1.0]),
        (ArmJoint::UpperArm, Some(Side::Right)) => Some([0.3, 0.0, 1.0]),
        (ArmJoint::Forearm, _) => Some([-0.4, 0.0, 0.0]),
        (ArmJoint::Hand, _) => Some([-0.3, 0.0, 0.0]),
        (ArmJoint::Shoulder | ArmJoint::UpperArm, None) => None,
    }
}

impl RestPoseCorrector for ArmsDownCorrector {
    fn correct(&self, bones: &mut [Bone]) -> usize {
        let extended = bones.iter().any(|bone| {
            let name = bone.name.to_lowercase();
            joint_of(&name) == Some(ArmJoint::UpperArm) && side_of(&name).is_some() && at_default(bone)
        });
        if !extended {
            return 0;
        }

        let mut corrected = 0;
        for bone in bones.iter_mut().filter(|b| at_default(b)) {
            let name = bone.name.to_lowercase();
            let Some(joint) = joint_of(&name) else {
                continue;
            };
            if let Some(rotation) = lowered_rotation(joint, side_of(&name)) {
                bone.rotation = rotation;
                corrected += 1;
            }
        }
        corrected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnimationConfig {
        AnimationConfig::default()
    }

    fn clips(idle: Option<&str>, thinking: Option<&str>, talking: Option<&str>) -> ClipSet {
        ClipSet {
            idle: idle.map(String::from),
            thinking: thinking.map(String::from),
            talking: talking.map(String::from),
        }
    }

    #[test]
    fn test_starts_idle_without_fade() {
        let controller = AnimationController::new(clips(Some("Idle"), None, None), &config(), [0.0; 3]);
        assert_eq!(controller.state(), AnimationState::Idle);
        assert_eq!(controller.active_motion(), &Motion::Clip("Idle".into()));
        assert!(controller.crossfade().is_none());
        assert_eq!(controller.fades_started(), 0);
    }

    #[test]
    fn test_talking_and_thinking_fall_back_to_idle_clip() {
        let mut controller =
            AnimationController::new(clips(Some("Idle"), None, None), &config(), [0.0; 3]);
        controller.set_state(AnimationState::Talking);
        assert_eq!(controller.active_motion(), &Motion::Clip("Idle".into()));
        controller.set_state(AnimationState::Thinking);
        assert_eq!(controller.active_motion(), &Motion::Clip("Idle".into()));
    }

    #[test]
    fn test_dedicated_clips_are_preferred() {
        let mut controller = AnimationController::new(
            clips(Some("Idle"), Some("Ponder"), Some("Talk")),
            &config(),
            [0.0; 3],
        );
        controller.set_state(AnimationState::Thinking);
        assert_eq!(controller.active_motion(), &Motion::Clip("Ponder".into()));
        controller.set_state(AnimationState::Talking);
        assert_eq!(controller.active_motion(), &Motion::Clip("Talk".into()));
    }

    #[test]
    fn test_repeated_state_request_starts_no_fade() {
        let mut controller =
            AnimationController::new(clips(Some("Idle"), None, Some("Talk")), &config(), [0.0; 3]);
        assert!(controller.set_state(AnimationState::Talking));
        assert!(!controller.set_state(AnimationState::Talking));
        assert_eq!(controller.fades_started(), 1);
        assert!(controller.set_state(AnimationState::Idle));
        assert_eq!(controller.fades_started(), 2);
    }

    #[test]
    fn test_crossfade_completes_after_configured_time() {
        let mut character = Character::new("c");
        let mut controller =
            AnimationController::new(clips(Some("Idle"), None, Some("Talk")), &config(), [0.0; 3]);
        controller.set_state(AnimationState::Talking);

        controller.update(Duration::from_millis(150), &mut character);
        let blend = controller.blend();
        assert_eq!(blend.len(), 2);
        assert!((blend[0].1 - 0.5).abs() < 1e-3);
        assert_eq!(blend[1].0, Motion::Clip("Talk".into()));

        controller.update(Duration::from_millis(150), &mut character);
        assert!(controller.crossfade().is_none());
        assert_eq!(controller.blend(), vec![(Motion::Clip("Talk".into()), 1.0)]);
    }

    #[test]
    fn test_synthetic_idle_moves_root_when_no_clips() {
        let mut character = Character::new("bare");
        character.root.position = [0.0, 1.0, 0.0];
        let mut controller = AnimationController::load(&mut character, &config(), &NoCorrection);
        assert_eq!(controller.active_motion(), &Motion::Synthetic);

        // Quarter period of 0.25 Hz: sin peaks.
        controller.update(Duration::from_secs(1), &mut character);
        assert!((character.root.position[1] - 1.01).abs() < 1e-4);

        controller.set_state(AnimationState::Talking);
        assert_eq!(controller.active_motion(), &Motion::Synthetic);
    }

    #[test]
    fn test_arms_down_corrects_t_pose() {
        let mut character = Character::new("rig").with_bones(&[
            "Hips",
            "LeftShoulder",
            "LeftArm",
            "LeftForeArm",
            "LeftHand",
            "LeftHandThumb1",
            "RightShoulder",
            "RightArm",
            "Armature",
        ]);
        let corrected = ArmsDownCorrector.correct(&mut character.bones);
        assert_eq!(corrected, 6);
        assert_eq!(character.bone("LeftArm").unwrap().rotation, [0.3, 0.0, -1.0]);
        assert_eq!(character.bone("RightArm").unwrap().rotation, [0.3, 0.0, 1.0]);
        assert_eq!(character.bone("RightShoulder").unwrap().rotation, [0.0, -0.2, 0.6]);
        assert_eq!(character.bone("LeftForeArm").unwrap().rotation, [-0.4, 0.0, 0.0]);
        assert_eq!(character.bone("LeftHand").unwrap().rotation, [-0.3, 0.0, 0.0]);
        assert_eq!(character.bone("LeftHandThumb1").unwrap().rotation, [0.0; 3]);
        assert_eq!(character.bone("Armature").unwrap().rotation, [0.0; 3]);
        assert_eq!(character.bone("Hips").unwrap().rotation, [0.0; 3]);
    }

    #[test]
    fn test_posed_arms_are_left_alone() {
        let mut character = Character::new("rig").with_bones(&["LeftArm", "RightArm", "LeftHand"]);
        for bone in &mut character.bones {
            bone.rotation = [0.2, 0.0, -0.9];
        }
        assert_eq!(ArmsDownCorrector.correct(&mut character.bones), 0);
    }

    #[test]
    fn test_snake_case_side_suffixes_are_recognized() {
        let mut character = Character::new("rig").with_bones(&["upperarm_l", "clavicle_r"]);
        assert_eq!(ArmsDownCorrector.correct(&mut character.bones), 2);
        assert_eq!(character.bone("clavicle_r").unwrap().rotation, [0.0, -0.2, 0.6]);
    }

    #[test]
    fn test_load_applies_correction_once() {
        let mut character = Character::new("rig").with_bones(&["LeftArm"]);
        AnimationController::load(&mut character, &config(), &ArmsDownCorrector);
        let first = character.bone("LeftArm").unwrap().rotation;
        AnimationController::load(&mut character, &config(), &ArmsDownCorrector);
        assert_eq!(character.bone("LeftArm").unwrap().rotation, first);
    }
}
