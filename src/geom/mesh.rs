//! Triangle meshes, instances and motion-blurred meshes.
//!
//! Meshes are owned by the caller and shared with accelerators through
//! `Arc`. Instances and motion meshes reference a shared base
//! [`TriangleMesh`]; that base pointer is the identity two-level
//! accelerators deduplicate on.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{MotionSystem, Triangle};
use crate::util::{BBox3f, Error, Mat4, Result, Vec3};

/// Mesh kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MeshType {
    /// Plain triangle mesh, vertices in world space.
    Triangle = 0,
    /// Base mesh placed by a local-to-world transform.
    Instance = 1,
    /// Base mesh moved by a keyframed motion system.
    Motion = 2,
}

impl TryFrom<u32> for MeshType {
    type Error = Error;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::Triangle),
            1 => Ok(Self::Instance),
            2 => Ok(Self::Motion),
            other => Err(Error::UnknownMeshType(other)),
        }
    }
}

impl fmt::Display for MeshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Triangle => "TRIANGLE",
            Self::Instance => "INSTANCE",
            Self::Motion => "MOTION",
        };
        f.write_str(name)
    }
}

/// Vertex and triangle arrays with a cached bounding box.
#[derive(Clone, Debug)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<Triangle>,
    bbox: BBox3f,
}

impl TriangleMesh {
    /// Create a mesh, checking every vertex index.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<Triangle>) -> Result<Self> {
        let vertex_count = vertices.len();
        for (i, tri) in triangles.iter().enumerate() {
            if let Some(&bad) = tri.v.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(Error::InvalidTriangle {
                    triangle: i,
                    vertex: bad,
                    vertex_count,
                });
            }
        }
        let bbox = BBox3f::from_points(vertices.iter().copied());
        Ok(Self {
            vertices,
            triangles,
            bbox,
        })
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Local-space bounding box.
    #[inline]
    pub fn bbox(&self) -> BBox3f {
        self.bbox
    }
}

/// A base mesh placed in the world by a mutable transform.
#[derive(Debug)]
pub struct InstanceMesh {
    base: Arc<TriangleMesh>,
    /// `(local_to_world, world_to_local)`, swapped together.
    transforms: RwLock<(Mat4, Mat4)>,
}

impl InstanceMesh {
    pub fn new(base: Arc<TriangleMesh>, local_to_world: Mat4) -> Result<Self> {
        let inverse = invert(&local_to_world)?;
        Ok(Self {
            base,
            transforms: RwLock::new((local_to_world, inverse)),
        })
    }

    #[inline]
    pub fn base(&self) -> &Arc<TriangleMesh> {
        &self.base
    }

    #[inline]
    pub fn transform(&self) -> Mat4 {
        self.transforms.read().0
    }

    #[inline]
    pub fn inverse_transform(&self) -> Mat4 {
        self.transforms.read().1
    }

    /// The transform and its inverse, read as one consistent pair.
    #[inline]
    pub fn transforms(&self) -> (Mat4, Mat4) {
        *self.transforms.read()
    }

    /// Replace the transform. Accelerators see it on their next `update`.
    pub fn set_transform(&self, local_to_world: Mat4) -> Result<()> {
        let inverse = invert(&local_to_world)?;
        *self.transforms.write() = (local_to_world, inverse);
        Ok(())
    }
}

/// A base mesh moved by a keyframed motion system.
#[derive(Debug)]
pub struct MotionMesh {
    base: Arc<TriangleMesh>,
    motion: RwLock<MotionSystem>,
}

impl MotionMesh {
    pub fn new(base: Arc<TriangleMesh>, motion: MotionSystem) -> Self {
        Self {
            base,
            motion: RwLock::new(motion),
        }
    }

    #[inline]
    pub fn base(&self) -> &Arc<TriangleMesh> {
        &self.base
    }

    /// Snapshot of the current motion system.
    #[inline]
    pub fn motion_system(&self) -> MotionSystem {
        self.motion.read().clone()
    }

    /// Replace the motion system. Accelerators see it on their next `update`.
    pub fn set_motion_system(&self, motion: MotionSystem) {
        *self.motion.write() = motion;
    }
}

/// Any mesh an accelerator can be built over.
#[derive(Debug)]
pub enum Mesh {
    Triangle(Arc<TriangleMesh>),
    Instance(InstanceMesh),
    Motion(MotionMesh),
}

impl Mesh {
    /// Shorthand for a plain mesh.
    pub fn triangle(vertices: Vec<Vec3>, triangles: Vec<Triangle>) -> Result<Self> {
        Ok(Self::Triangle(Arc::new(TriangleMesh::new(vertices, triangles)?)))
    }

    /// Shorthand for an instance of a shared base.
    pub fn instance(base: Arc<TriangleMesh>, local_to_world: Mat4) -> Result<Self> {
        Ok(Self::Instance(InstanceMesh::new(base, local_to_world)?))
    }

    /// Shorthand for a motion-blurred instance of a shared base.
    pub fn motion(base: Arc<TriangleMesh>, motion: MotionSystem) -> Self {
        Self::Motion(MotionMesh::new(base, motion))
    }

    #[inline]
    pub fn mesh_type(&self) -> MeshType {
        match self {
            Self::Triangle(_) => MeshType::Triangle,
            Self::Instance(_) => MeshType::Instance,
            Self::Motion(_) => MeshType::Motion,
        }
    }

    /// Underlying vertex/triangle data. Shared bases compare equal with
    /// [`Arc::ptr_eq`].
    #[inline]
    pub fn base(&self) -> &Arc<TriangleMesh> {
        match self {
            Self::Triangle(m) => m,
            Self::Instance(m) => m.base(),
            Self::Motion(m) => m.base(),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.base().vertex_count()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.base().triangle_count()
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        self.base().triangles()
    }

    /// Local-to-world transform at `time`; `None` for plain meshes.
    pub fn local_to_world(&self, time: f32) -> Option<Mat4> {
        match self {
            Self::Triangle(_) => None,
            Self::Instance(m) => Some(m.transform()),
            Self::Motion(m) => Some(m.motion.read().sample(time)),
        }
    }

    /// World-to-local transform at `time`; `None` for plain meshes.
    pub fn world_to_local(&self, time: f32) -> Option<Mat4> {
        match self {
            Self::Triangle(_) => None,
            Self::Instance(m) => Some(m.inverse_transform()),
            Self::Motion(m) => Some(m.motion.read().sample_inverse(time)),
        }
    }

    /// World-space position of vertex `index` at `time`.
    pub fn vertex(&self, time: f32, index: usize) -> Vec3 {
        let p = self.base().vertices()[index];
        match self.local_to_world(time) {
            Some(m) => m.transform_point3(p),
            None => p,
        }
    }

    /// All world-space vertices at `time`.
    pub fn world_vertices(&self, time: f32) -> Vec<Vec3> {
        let base = self.base().vertices();
        match self.local_to_world(time) {
            Some(m) => base.iter().map(|&p| m.transform_point3(p)).collect(),
            None => base.to_vec(),
        }
    }

    /// World-space bounding box; for motion meshes, over the whole motion.
    pub fn bbox(&self) -> BBox3f {
        match self {
            Self::Triangle(m) => m.bbox(),
            Self::Instance(m) => m.base().bbox().transformed(&m.transform()),
            Self::Motion(m) => m.motion.read().bound(&m.base().bbox()),
        }
    }
}

fn invert(m: &Mat4) -> Result<Mat4> {
    let det = m.determinant();
    if det == 0.0 || !det.is_finite() {
        return Err(Error::SingularTransform);
    }
    Ok(m.inverse())
}
