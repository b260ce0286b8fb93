//! In-memory character scene: meshes with named blend channels, named bones,
//! a root transform and the names of authored animation clips.
//!
//! Loading real model files belongs to the host; it hands the engine this
//! summary, either built in code or deserialized from JSON.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A mesh exposing blend-shape channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphMesh {
    pub name: String,
    /// Channel names in index order.
    pub channels: Vec<String>,
    /// Current weight per channel, each in `[0, 1]`.
    #[serde(default)]
    pub weights: Vec<f32>,
}

impl MorphMesh {
    pub fn new(name: &str, channels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            weights: vec![0.0; channels.len()],
        }
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c == name)
    }
}

/// A skeleton joint with its local Euler rotation (radians, XYZ).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub rotation: [f32; 3],
}

impl Bone {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rotation: [0.0; 3],
        }
    }
}

/// Names of the authored clips for each animation state, when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipSet {
    pub idle: Option<String>,
    pub thinking: Option<String>,
    pub talking: Option<String>,
}

impl ClipSet {
    pub fn is_empty(&self) -> bool {
        self.idle.is_none() && self.thinking.is_none() && self.talking.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootTransform {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

/// Everything the engine needs to know about one loaded character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub meshes: Vec<MorphMesh>,
    #[serde(default)]
    pub bones: Vec<Bone>,
    #[serde(default)]
    pub clips: ClipSet,
    #[serde(default)]
    pub root: RootTransform,
}

impl Character {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_mesh(mut self, mesh: MorphMesh) -> Self {
        self.meshes.push(mesh);
        self.normalize();
        self
    }

    pub fn with_bones(mut self, names: &[&str]) -> Self {
        self.bones.extend(names.iter().map(|n| Bone::new(n)));
        self
    }

    pub fn with_clips(mut self, clips: ClipSet) -> Self {
        self.clips = clips;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut character: Character =
            serde_json::from_str(json).map_err(|e| EngineError::CharacterParse {
                message: e.to_string(),
            })?;
        character.normalize();
        Ok(character)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Make every mesh carry exactly one weight per channel.
    fn normalize(&mut self) {
        for mesh in &mut self.meshes {
            mesh.weights.resize(mesh.channels.len(), 0.0);
        }
    }

    pub fn weight(&self, mesh: usize, channel: usize) -> f32 {
        self.meshes
            .get(mesh)
            .and_then(|m| m.weights.get(channel))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set_weight(&mut self, mesh: usize, channel: usize, weight: f32) {
        if let Some(slot) = self
            .meshes
            .get_mut(mesh)
            .and_then(|m| m.weights.get_mut(channel))
        {
            *slot = weight.clamp(0.0, 1.0);
        }
    }

    /// Weight of the first channel called `name` on any mesh.
    pub fn weight_by_name(&self, name: &str) -> Option<f32> {
        self.meshes.iter().find_map(|m| {
            m.channel_index(name)
                .and_then(|i| m.weights.get(i).copied())
        })
    }

    pub fn channel_count(&self) -> usize {
        self.meshes.iter().map(|m| m.channels.len()).sum()
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }
}
