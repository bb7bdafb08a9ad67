//! Quad BVH: a four-wide tree whose node boxes and leaf triangles are laid
//! out lane-wise so one SIMD pass tests four of them at once.
//!
//! - [`QbvhNode`] / [`ChildRef`] - node layout and child encoding
//! - [`QuadTriangle`] / [`QuadRay`] - four-lane triangle packets
//! - [`QbvhTree`] - built tree and traversal
//! - [`QbvhAccel`] - the [`Accelerator`](crate::core::Accelerator) wrapper

mod accel;
mod build;
mod node;
mod quad;
mod tree;

pub use accel::QbvhAccel;
pub use build::MAX_BUILD_DEPTH;
pub use node::*;
pub use quad::*;
pub use tree::*;

pub(crate) use build::build_objects;
pub(crate) use tree::traverse;
