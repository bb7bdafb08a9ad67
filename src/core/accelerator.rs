//! The accelerator contract shared by every spatial index.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AcceleratorConfig, DeviceDescription, HardwareKernel};
use crate::bvh::BvhAccel;
use crate::geom::{Mesh, Ray, RayHit};
use crate::mbvh::MbvhAccel;
use crate::mqbvh::MqbvhAccel;
use crate::qbvh::QbvhAccel;
use crate::util::{Error, Result};

/// Accelerator kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AcceleratorType {
    /// Pick per device and scene content.
    #[default]
    Auto,
    /// Single-level binary/N-ary BVH in a flat skip-index array.
    Bvh,
    /// Single-level quad BVH with SIMD traversal.
    Qbvh,
    /// Two-level hierarchy of quad BVHs.
    Mqbvh,
    /// Two-level hierarchy of flat BVHs.
    Mbvh,
}

impl AcceleratorType {
    /// All concrete (non-`Auto`) kinds.
    pub const CONCRETE: [AcceleratorType; 4] = [Self::Bvh, Self::Qbvh, Self::Mqbvh, Self::Mbvh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Bvh => "BVH",
            Self::Qbvh => "QBVH",
            Self::Mqbvh => "MQBVH",
            Self::Mbvh => "MBVH",
        }
    }
}

impl fmt::Display for AcceleratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcceleratorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "BVH" => Ok(Self::Bvh),
            "QBVH" => Ok(Self::Qbvh),
            "MQBVH" => Ok(Self::Mqbvh),
            "MBVH" => Ok(Self::Mbvh),
            _ => Err(Error::UnknownAccelerator(s.to_string())),
        }
    }
}

/// Lifecycle and query interface of a ray/triangle spatial index.
///
/// An accelerator is built once by [`init`](Accelerator::init), optionally
/// refreshed by [`update`](Accelerator::update), and then queried through
/// [`intersect`](Accelerator::intersect) from any number of threads.
/// `init` and `update` take `&mut self`, so the borrow checker enforces
/// that no query runs while the structure is rebuilt.
pub trait Accelerator: Send + Sync {
    /// Concrete kind of this accelerator.
    fn accel_type(&self) -> AcceleratorType;

    /// Build over `meshes`. The declared totals must match the mesh list.
    /// A second call fails with [`Error::AlreadyInitialized`].
    fn init(
        &mut self,
        meshes: &[Arc<Mesh>],
        total_vertex_count: usize,
        total_triangle_count: usize,
    ) -> Result<()>;

    /// Whether [`update`](Accelerator::update) is available.
    fn does_support_update(&self) -> bool {
        false
    }

    /// Refresh after mesh transforms changed.
    fn update(&mut self) -> Result<()> {
        Err(Error::UpdateNotSupported(self.accel_type()))
    }

    /// Nearest hit along `ray`; a miss when nothing is hit or before `init`.
    fn intersect(&self, ray: &Ray) -> RayHit;

    /// Whether the host can traverse this accelerator on `device`.
    fn has_native_support(&self, _device: &DeviceDescription) -> bool {
        true
    }

    /// Whether a hardware kernel exists for `device`.
    fn has_hw_support(&self, device: &DeviceDescription) -> bool {
        device.kind.is_hardware()
    }

    /// Data buffers and defines for a hardware intersection kernel.
    fn new_hardware_kernel(&self, device: &DeviceDescription) -> Option<HardwareKernel>;
}

/// Create an unbuilt accelerator of a concrete kind.
///
/// `Auto` must be resolved by the caller first (see
/// [`DataSet`](super::DataSet)).
pub fn new_accelerator(
    accel_type: AcceleratorType,
    config: &AcceleratorConfig,
) -> Result<Box<dyn Accelerator>> {
    config.validate()?;
    let accel: Box<dyn Accelerator> = match accel_type {
        AcceleratorType::Bvh => Box::new(BvhAccel::new(config.bvh.clone())),
        AcceleratorType::Qbvh => Box::new(QbvhAccel::new(config.qbvh.clone())),
        AcceleratorType::Mqbvh => Box::new(MqbvhAccel::new(config.mqbvh.clone())),
        AcceleratorType::Mbvh => Box::new(MbvhAccel::new(config.mbvh.clone())),
        AcceleratorType::Auto => {
            return Err(Error::other("AUTO accelerator type must be resolved before construction"))
        }
    };
    Ok(accel)
}

/// Check declared totals against the mesh list.
pub(crate) fn check_totals(
    meshes: &[Arc<Mesh>],
    total_vertex_count: usize,
    total_triangle_count: usize,
) -> Result<()> {
    let vertices: usize = meshes.iter().map(|m| m.vertex_count()).sum();
    let triangles: usize = meshes.iter().map(|m| m.triangle_count()).sum();
    if vertices != total_vertex_count {
        return Err(Error::CountMismatch {
            what: "vertex",
            expected: total_vertex_count,
            actual: vertices,
        });
    }
    if triangles != total_triangle_count {
        return Err(Error::CountMismatch {
            what: "triangle",
            expected: total_triangle_count,
            actual: triangles,
        });
    }
    Ok(())
}
