//! Geometry consumed by the accelerators.
//!
//! - [`Ray`] / [`RayHit`] - queries and their results
//! - [`Triangle`] and the scalar ray/triangle test
//! - [`Mesh`] - plain, instanced and motion-blurred meshes
//! - [`MotionSystem`] - keyframed transforms

mod mesh;
mod motion;
mod ray;
mod triangle;

pub use mesh::*;
pub use motion::*;
pub use ray::*;
pub use triangle::*;
