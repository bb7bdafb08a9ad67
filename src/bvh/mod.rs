//! Flat BVH stored as a depth-first array with skip indices.
//!
//! Builders fill a temporary node arena which is then flattened into
//! [`BvhArrayNode`]s. Three strategies are available, selected by
//! [`BvhBuilderKind`](crate::core::BvhBuilderKind):
//!
//! - classic N-ary variance split, optionally refined by sampled SAH
//! - binned SAH
//! - Morton-code linear BVH

mod accel;
mod binned;
mod build;
mod classic;
mod morton;
mod node;
mod tree;

pub use accel::BvhAccel;
pub use build::BuildPrimitive;
pub use morton::morton_encode3;
pub use node::BvhArrayNode;
pub use tree::{BvhTree, BvhTriangle};

pub(crate) use tree::build_object_nodes;
