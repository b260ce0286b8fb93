//! Morph Target Binder: resolves viseme symbols to blend channels.
//!
//! Exporters name the same mouth shape in many ways (`viseme_aa`, `jawOpen`,
//! `Wolf3D_mouthOpen`, `mouth_open_L`...). Each symbol has an ordered list
//! of candidate names and a weight scale; the search tries exact, then
//! case-insensitive, then partial matches, then known naming variants.

use crate::avatar::character::Character;
use crate::defaults;
use crate::lipsync::viseme::Viseme;
use serde::Serialize;

/// How a channel was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Partial,
    Variant,
}

/// One resolved blend channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphTarget {
    pub mesh: usize,
    pub channel: usize,
    /// Channel name as it appears on the mesh.
    pub name: String,
    /// Multiplier applied to the intensity before it reaches the channel.
    pub scale: f32,
    pub kind: MatchKind,
}

/// Degraded-mode flag derived from a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BindingStatus {
    /// Every viseme has a channel.
    Complete,
    /// Some visemes are silent no-ops.
    Partial { missing: Vec<Viseme> },
    /// No viseme channel at all: body animates, lips do not.
    AnimationOnly,
}

impl BindingStatus {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, BindingStatus::Complete)
    }
}

/// Viseme to channel mapping for one character. Read-only after binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphBinding {
    targets: [Option<MorphTarget>; Viseme::COUNT],
    pub blink_left: Option<MorphTarget>,
    pub blink_right: Option<MorphTarget>,
    pub jaw: Option<MorphTarget>,
}

impl MorphBinding {
    /// A binding with nothing resolved.
    pub fn empty() -> Self {
        Self {
            targets: std::array::from_fn(|_| None),
            blink_left: None,
            blink_right: None,
            jaw: None,
        }
    }

    pub fn target(&self, viseme: Viseme) -> Option<&MorphTarget> {
        self.targets[viseme.index()].as_ref()
    }

    pub fn bound_count(&self) -> usize {
        self.targets.iter().flatten().count()
    }

    pub fn missing(&self) -> Vec<Viseme> {
        Viseme::ALL
            .into_iter()
            .filter(|v| self.target(*v).is_none())
            .collect()
    }

    pub fn status(&self) -> BindingStatus {
        match self.bound_count() {
            0 => BindingStatus::AnimationOnly,
            n if n == Viseme::COUNT => BindingStatus::Complete,
            _ => BindingStatus::Partial {
                missing: self.missing(),
            },
        }
    }

    pub fn can_blink(&self) -> bool {
        self.blink_left.is_some() && self.blink_right.is_some()
    }

    /// Distinct `(mesh, channel)` pairs driven by lipsync, jaw included.
    pub fn lip_channels(&self) -> Vec<(usize, usize)> {
        let mut channels: Vec<(usize, usize)> = Vec::new();
        for target in self.targets.iter().flatten().chain(self.jaw.iter()) {
            let key = (target.mesh, target.channel);
            if !channels.contains(&key) {
                channels.push(key);
            }
        }
        channels
    }
}

/// Candidate names and weight scale for each viseme.
const VISEME_CANDIDATES: [(Viseme, &[&str], f32); Viseme::COUNT] = [
    (Viseme::Sil, &["mouthClose", "mouthNeutral", "neutral"], 1.0),
    (
        Viseme::PP,
        &["mouthPucker", "mouthFunnel", "mouthKiss", "mouthPress"],
        0.9,
    ),
    (Viseme::FF, &["mouthShrugLower", "mouthLowerDown"], 0.8),
    (Viseme::TH, &["mouthShrugLower", "mouthLowerDown"], 0.7),
    (Viseme::DD, &["mouthOpen", "jawOpen", "mouthAh"], 0.8),
    (Viseme::Kk, &["mouthOpen", "jawOpen"], 0.6),
    (Viseme::CH, &["mouthShrugUpper", "mouthUpperUp"], 0.7),
    (Viseme::SS, &["mouthFrown", "mouthSad"], 0.8),
    (Viseme::Nn, &["mouthClose", "mouthPress"], 0.9),
    (Viseme::RR, &["mouthPucker", "mouthRoll"], 0.8),
    (Viseme::Aa, &["mouthOpen", "jawOpen", "mouthAh"], 1.0),
    (Viseme::E, &["mouthSmile", "mouthHappy", "mouthEh"], 0.9),
    (Viseme::I, &["mouthSmile", "mouthEe", "mouthIh"], 0.8),
    (Viseme::O, &["mouthFunnel", "mouthPucker", "mouthOh"], 0.9),
    (Viseme::U, &["mouthPucker", "mouthFunnel", "mouthOoh"], 0.9),
];

const BLINK_LEFT: &[&str] = &[
    "eyeBlinkLeft",
    "blink_L",
    "EyeBlinkLeft",
    "BlinkLeft",
    "Wolf3D_Eye_Blink_Left",
    "eyeBlink_L",
    "eye_blink_left",
];

const BLINK_RIGHT: &[&str] = &[
    "eyeBlinkRight",
    "blink_R",
    "EyeBlinkRight",
    "BlinkRight",
    "Wolf3D_Eye_Blink_Right",
    "eyeBlink_R",
    "eye_blink_right",
];

const JAW: &[&str] = &["jawOpen", "JawOpen"];

/// Shortest name fragment that may count as a partial match.
const MIN_PARTIAL_OVERLAP: usize = 3;

/// Binds characters against the candidate tables.
#[derive(Debug, Clone)]
pub struct MorphBinder {
    partial_penalty: f32,
}

impl Default for MorphBinder {
    fn default() -> Self {
        Self {
            partial_penalty: defaults::PARTIAL_MATCH_PENALTY,
        }
    }
}

impl MorphBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, character: &Character) -> MorphBinding {
        let mut binding = MorphBinding::empty();

        for (viseme, names, scale) in VISEME_CANDIDATES {
            let mut candidates = vec![viseme.channel_name()];
            candidates.extend(names.iter().map(|n| n.to_string()));
            binding.targets[viseme.index()] = self.resolve(character, &candidates, scale);
        }

        binding.blink_left = self.resolve(character, &owned(BLINK_LEFT), 1.0);
        binding.blink_right = self.resolve(character, &owned(BLINK_RIGHT), 1.0);
        binding.jaw = self.resolve(character, &owned(JAW), 1.0);

        match binding.status() {
            BindingStatus::Complete => {
                tracing::debug!("{}: all visemes bound", character.name);
            }
            BindingStatus::Partial { missing } => {
                let names: Vec<&str> = missing.iter().map(|v| v.symbol()).collect();
                tracing::warn!(
                    "{}: no morph channel for {} viseme(s): {}",
                    character.name,
                    missing.len(),
                    names.join(", ")
                );
            }
            BindingStatus::AnimationOnly => {
                tracing::warn!(
                    "{}: no viseme morph channels found, lips will not move",
                    character.name
                );
            }
        }

        binding
    }

    fn resolve(
        &self,
        character: &Character,
        candidates: &[String],
        scale: f32,
    ) -> Option<MorphTarget> {
        let ((mesh, channel), kind) = find_exact(character, candidates)
            .map(|slot| (slot, MatchKind::Exact))
            .or_else(|| {
                find_case_insensitive(character, candidates)
                    .map(|slot| (slot, MatchKind::CaseInsensitive))
            })
            .or_else(|| find_partial(character, candidates).map(|slot| (slot, MatchKind::Partial)))
            .or_else(|| {
                let variants: Vec<String> =
                    candidates.iter().flat_map(|c| variants_of(c)).collect();
                find_exact(character, &variants).map(|slot| (slot, MatchKind::Variant))
            })?;

        let scale = if kind == MatchKind::Partial {
            scale * self.partial_penalty
        } else {
            scale
        };
        Some(MorphTarget {
            mesh,
            channel,
            name: character.meshes[mesh].channels[channel].clone(),
            scale,
            kind,
        })
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// First channel matching any candidate, candidates in priority order.
fn find_by(
    character: &Character,
    candidates: &[String],
    matches: impl Fn(&str, &str) -> bool,
) -> Option<(usize, usize)> {
    candidates.iter().find_map(|candidate| {
        character.meshes.iter().enumerate().find_map(|(m, mesh)| {
            mesh.channels
                .iter()
                .position(|channel| matches(channel, candidate))
                .map(|c| (m, c))
        })
    })
}

fn find_exact(character: &Character, candidates: &[String]) -> Option<(usize, usize)> {
    find_by(character, candidates, |channel, candidate| channel == candidate)
}

fn find_case_insensitive(character: &Character, candidates: &[String]) -> Option<(usize, usize)> {
    find_by(character, candidates, |channel, candidate| {
        channel.to_lowercase() == candidate.to_lowercase()
    })
}

/// Channel sharing the longest substring relation with any candidate.
fn find_partial(character: &Character, candidates: &[String]) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), usize)> = None;
    for candidate in candidates {
        let candidate = candidate.to_lowercase();
        for (m, mesh) in character.meshes.iter().enumerate() {
            for (c, channel) in mesh.channels.iter().enumerate() {
                let channel = channel.to_lowercase();
                let overlap = if channel.contains(&candidate) {
                    candidate.chars().count()
                } else if candidate.contains(&channel) {
                    channel.chars().count()
                } else {
                    continue;
                };
                if overlap < MIN_PARTIAL_OVERLAP {
                    continue;
                }
                if best.is_none_or(|(_, score)| overlap > score) {
                    best = Some(((m, c), overlap));
                }
            }
        }
    }
    best.map(|(slot, _)| slot)
}

/// Decorated spellings used by common avatar export pipelines.
fn variants_of(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |v: String| {
        if v != name && !out.contains(&v) {
            out.push(v);
        }
    };

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        let rest: String = chars.collect();
        push(first.to_uppercase().chain(rest.chars()).collect());
        push(first.to_lowercase().chain(rest.chars()).collect());
    }
    push(format!("blend_{}", name));
    push(format!("ARKit_{}", name));
    push(format!("Wolf3D_{}", name));
    push(format!("{}_L", name));
    push(format!("{}_R", name));
    push(snake_case(name));
    push(name.replace('_', ""));
    push(name.replacen("mouth", "Mouth", 1));
    push(name.replacen("eye", "Eye", 1));
    push(name.replacen("jaw", "Jaw", 1));
    out
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
