//! Construction parameters for every accelerator.
//!
//! All structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.
//!
//! ```json
//! { "accel_type": "MBVH", "mbvh": { "root": { "builder": "MORTON" } } }
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AcceleratorType;
use crate::util::{Error, Result};

/// Largest primitive count a QBVH leaf may hold: 16 quads of 4.
pub const QBVH_MAX_LEAF_PRIMS: u32 = 64;

/// Quad BVH parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QbvhParams {
    /// Ranges at or below this size become leaves.
    pub max_prims_per_leaf: u32,
    /// Ranges below this size bin every primitive.
    pub full_sweep_threshold: u32,
    /// Sampling stride for larger ranges.
    pub skip_factor: u32,
}

impl Default for QbvhParams {
    fn default() -> Self {
        Self {
            max_prims_per_leaf: 4,
            full_sweep_threshold: 16,
            skip_factor: 1,
        }
    }
}

impl QbvhParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_prims_per_leaf == 0 || self.max_prims_per_leaf > QBVH_MAX_LEAF_PRIMS {
            return Err(Error::invalid_config(format!(
                "max_prims_per_leaf must be in 1..={}, got {}",
                QBVH_MAX_LEAF_PRIMS, self.max_prims_per_leaf
            )));
        }
        if self.full_sweep_threshold == 0 {
            return Err(Error::invalid_config("full_sweep_threshold must be positive"));
        }
        if self.skip_factor == 0 {
            return Err(Error::invalid_config("skip_factor must be positive"));
        }
        Ok(())
    }
}

/// Two-level quad BVH parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqbvhParams {
    /// Per-mesh trees.
    pub leaf: QbvhParams,
    /// Tree over object boxes; leaves always hold one object.
    pub root: QbvhParams,
}

impl Default for MqbvhParams {
    fn default() -> Self {
        Self {
            leaf: QbvhParams::default(),
            root: QbvhParams {
                max_prims_per_leaf: 1,
                full_sweep_threshold: 4,
                skip_factor: 1,
            },
        }
    }
}

impl MqbvhParams {
    pub fn validate(&self) -> Result<()> {
        self.leaf.validate()?;
        self.root.validate()
    }
}

/// Strategy for building a flat BVH.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BvhBuilderKind {
    /// Top-down split on the axis of largest centroid variance, optionally
    /// refined by sampled surface-area cost.
    #[default]
    Classic,
    /// Binned surface-area heuristic over all three axes.
    BinnedSah,
    /// Linear BVH over Morton-sorted centroids.
    Morton,
}

impl fmt::Display for BvhBuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classic => "CLASSIC",
            Self::BinnedSah => "BINNED_SAH",
            Self::Morton => "MORTON",
        };
        f.write_str(name)
    }
}

/// Flat BVH parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhParams {
    /// Children per interior node for the classic builder: 2, 4 or 8.
    pub tree_type: u32,
    /// Split positions sampled by the classic builder; 0 or 1 splits at
    /// the mean.
    pub cost_samples: u32,
    pub isect_cost: f32,
    pub trav_cost: f32,
    /// Cost discount for splits with an empty side.
    pub empty_bonus: f32,
    pub builder: BvhBuilderKind,
}

impl Default for BvhParams {
    fn default() -> Self {
        Self {
            tree_type: 4,
            cost_samples: 0,
            isect_cost: 80.0,
            trav_cost: 10.0,
            empty_bonus: 0.5,
            builder: BvhBuilderKind::Classic,
        }
    }
}

impl BvhParams {
    /// `tree_type` rounded up to 2, 4 or 8.
    pub fn normalized_tree_type(&self) -> u32 {
        match self.tree_type {
            0..=2 => 2,
            3..=4 => 4,
            _ => 8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.isect_cost < 0.0 || self.trav_cost < 0.0 {
            return Err(Error::invalid_config("costs must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.empty_bonus) {
            return Err(Error::invalid_config(format!(
                "empty_bonus must be in [0, 1], got {}",
                self.empty_bonus
            )));
        }
        if !matches!(self.tree_type, 2 | 4 | 8) {
            warn!(
                tree_type = self.tree_type,
                normalized = self.normalized_tree_type(),
                "BVH tree type rounded"
            );
        }
        Ok(())
    }
}

/// Two-level flat BVH parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MbvhParams {
    /// Per-mesh trees.
    pub leaf: BvhParams,
    /// Tree over object boxes.
    pub root: BvhParams,
}

impl MbvhParams {
    pub fn validate(&self) -> Result<()> {
        self.leaf.validate()?;
        self.root.validate()
    }
}

/// Full accelerator configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    pub accel_type: AcceleratorType,
    pub qbvh: QbvhParams,
    pub mqbvh: MqbvhParams,
    pub bvh: BvhParams,
    pub mbvh: MbvhParams,
}

impl AcceleratorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.qbvh.validate()?;
        self.mqbvh.validate()?;
        self.bvh.validate()?;
        self.mbvh.validate()
    }
}
