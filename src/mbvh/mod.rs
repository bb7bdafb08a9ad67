//! Two-level hierarchy of flat BVHs for instanced and motion-blurred
//! scenes.

mod accel;
mod occurrence;

pub use accel::{MbvhAccel, TraversalRays, TraversalState};
pub use occurrence::{Occurrence, OccurrenceFrame};

pub(crate) use occurrence::collect_occurrences;
