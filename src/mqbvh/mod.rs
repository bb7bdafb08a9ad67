//! Two-level hierarchy of quad BVHs.
//!
//! Leaf trees are [`QbvhTree`](crate::qbvh::QbvhTree)s, one per distinct
//! base mesh, in the base mesh's own space. The root is an object-mode QBVH
//! over the world boxes of the mesh occurrences: each root leaf names
//! exactly one occurrence.

mod accel;

pub use accel::MqbvhAccel;
