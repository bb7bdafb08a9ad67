//! # quadbvh
//!
//! Bounding volume hierarchies for ray/triangle intersection: a four-wide
//! quad BVH traversed with SIMD box and triangle tests, a flat skip-index
//! BVH, and two-level variants of both for instanced and motion-blurred
//! scenes.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, slice helpers
//! - [`geom`] - Rays, triangles, meshes and motion systems
//! - [`core`] - Accelerator contract, configuration, devices, data sets
//! - [`qbvh`] - Single-level quad BVH
//! - [`bvh`] - Single-level flat BVH with three builders
//! - [`mbvh`] - Two-level hierarchy of flat BVHs
//! - [`mqbvh`] - Two-level hierarchy of quad BVHs
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quadbvh::prelude::*;
//!
//! let mesh = Mesh::triangle(
//!     vec![Vec3::ZERO, Vec3::X, Vec3::Y],
//!     vec![Triangle::new(0, 1, 2)],
//! )?;
//!
//! let mut data_set = DataSet::new(AcceleratorConfig::default());
//! data_set.add(Arc::new(mesh));
//!
//! let accel = data_set.get_accelerator(AcceleratorType::Auto)?;
//! let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z);
//! let hit = accel.intersect(&ray);
//! assert!(!hit.is_miss());
//! # Ok::<(), quadbvh::Error>(())
//! ```

pub mod util;
pub mod geom;
pub mod core;
pub mod qbvh;
pub mod bvh;
pub mod mbvh;
pub mod mqbvh;

// Re-export commonly used types
pub use util::{Error, Result};
pub use core::{Accelerator, AcceleratorConfig, AcceleratorType, DataSet};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{BBox3f, Error, Mat4, Result, Vec3};
    pub use crate::core::{
        new_accelerator, Accelerator, AcceleratorConfig, AcceleratorType, DataSet,
        DeviceDescription, DeviceKind, HardwareKernel,
    };
    pub use crate::geom::*;
    pub use crate::bvh::BvhAccel;
    pub use crate::mbvh::MbvhAccel;
    pub use crate::mqbvh::MqbvhAccel;
    pub use crate::qbvh::QbvhAccel;
}
