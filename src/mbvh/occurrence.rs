//! Mesh occurrences of two-level hierarchies.
//!
//! Every mesh passed to `init` is one occurrence. Occurrences that share a
//! base [`TriangleMesh`] share one leaf tree; each keeps its own frame and
//! world box.

use std::collections::HashMap;
use std::sync::Arc;

use crate::geom::{Mesh, MotionSystem, TriangleMesh};
use crate::util::{BBox3f, Mat4, Result};

/// How an occurrence's leaf tree is placed in the world.
#[derive(Clone, Debug, PartialEq)]
pub enum OccurrenceFrame {
    /// Leaf geometry is already in world space.
    World,
    Instance { world_to_local: Mat4 },
    /// Snapshot of the mesh's motion system taken at build or update.
    Motion(MotionSystem),
}

impl OccurrenceFrame {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        match mesh {
            Mesh::Triangle(_) => Self::World,
            Mesh::Instance(m) => Self::Instance {
                world_to_local: m.inverse_transform(),
            },
            Mesh::Motion(m) => Self::Motion(m.motion_system()),
        }
    }

    /// Transform taking world rays into the leaf's space at `time`.
    #[inline]
    pub fn world_to_local(&self, time: f32) -> Option<Mat4> {
        match self {
            Self::World => None,
            Self::Instance { world_to_local } => Some(*world_to_local),
            Self::Motion(ms) => Some(ms.sample_inverse(time)),
        }
    }

    #[inline]
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::Motion(_))
    }
}

#[derive(Clone, Debug)]
pub struct Occurrence {
    /// Index of the shared leaf tree.
    pub leaf: u32,
    pub frame: OccurrenceFrame,
    /// World-space box; for motion, over the whole motion.
    pub bbox: BBox3f,
}

impl Occurrence {
    pub(crate) fn refresh(&mut self, mesh: &Mesh) {
        self.frame = OccurrenceFrame::from_mesh(mesh);
        self.bbox = mesh.bbox();
    }
}

/// Build one leaf per distinct base mesh and one occurrence per mesh.
///
/// Base meshes are identified by their `Arc` pointer.
pub(crate) fn collect_occurrences<T, F>(
    meshes: &[Arc<Mesh>],
    mut build_leaf: F,
) -> Result<(Vec<Arc<T>>, Vec<Occurrence>)>
where
    F: FnMut(&TriangleMesh) -> Result<T>,
{
    let mut leaves: Vec<Arc<T>> = Vec::new();
    let mut by_base: HashMap<usize, u32> = HashMap::new();
    let mut occurrences = Vec::with_capacity(meshes.len());
    for mesh in meshes {
        let key = Arc::as_ptr(mesh.base()) as usize;
        let leaf = match by_base.get(&key) {
            Some(&leaf) => leaf,
            None => {
                let leaf = leaves.len() as u32;
                leaves.push(Arc::new(build_leaf(mesh.base())?));
                by_base.insert(key, leaf);
                leaf
            }
        };
        occurrences.push(Occurrence {
            leaf,
            frame: OccurrenceFrame::from_mesh(mesh),
            bbox: mesh.bbox(),
        });
    }
    Ok((leaves, occurrences))
}
