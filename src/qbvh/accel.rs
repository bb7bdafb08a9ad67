use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::{QbvhTree, QuadLane, TRAVERSAL_STACK_SIZE};
use crate::core::{
    check_totals, Accelerator, AcceleratorType, DeviceDescription, HardwareKernel, QbvhParams,
};
use crate::geom::{Mesh, Ray, RayHit};
use crate::util::{Error, Result};

/// Single-level quad BVH over every triangle of every mesh, in world space.
///
/// Instances and motion meshes are flattened with their transform at time
/// 0. `update` rebuilds the whole tree.
#[derive(Debug)]
pub struct QbvhAccel {
    params: QbvhParams,
    meshes: Vec<Arc<Mesh>>,
    tree: QbvhTree,
    initialized: bool,
}

impl QbvhAccel {
    pub fn new(params: QbvhParams) -> Self {
        Self {
            params,
            meshes: Vec::new(),
            tree: QbvhTree::default(),
            initialized: false,
        }
    }

    #[inline]
    pub fn tree(&self) -> &QbvhTree {
        &self.tree
    }

    fn build(&mut self) -> Result<()> {
        let started = Instant::now();
        let lanes = collect_lanes(&self.meshes);
        self.tree = QbvhTree::build(&self.params, &lanes)?;
        info!(
            triangles = lanes.len(),
            nodes = self.tree.nodes().len(),
            quads = self.tree.quads().len(),
            max_depth = self.tree.max_depth(),
            memory_kb = self.tree.memory_usage() / 1024,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "QBVH ready"
        );
        Ok(())
    }
}

/// World-space triangles of `meshes` at time 0, tagged with their mesh and
/// mesh-local triangle index.
fn collect_lanes(meshes: &[Arc<Mesh>]) -> Vec<QuadLane> {
    let total: usize = meshes.iter().map(|m| m.triangle_count()).sum();
    let mut lanes = Vec::with_capacity(total);
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        let vertices = mesh.world_vertices(0.0);
        for (triangle_index, tri) in mesh.triangles().iter().enumerate() {
            lanes.push(QuadLane {
                vertices: tri.positions(&vertices),
                mesh_index: mesh_index as u32,
                triangle_index: triangle_index as u32,
            });
        }
    }
    lanes
}

impl Accelerator for QbvhAccel {
    fn accel_type(&self) -> AcceleratorType {
        AcceleratorType::Qbvh
    }

    fn init(
        &mut self,
        meshes: &[Arc<Mesh>],
        total_vertex_count: usize,
        total_triangle_count: usize,
    ) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized(self.accel_type()));
        }
        self.params.validate()?;
        check_totals(meshes, total_vertex_count, total_triangle_count)?;
        self.meshes = meshes.to_vec();
        self.build()?;
        self.initialized = true;
        Ok(())
    }

    fn does_support_update(&self) -> bool {
        true
    }

    fn update(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized(self.accel_type()));
        }
        self.build()
    }

    fn intersect(&self, ray: &Ray) -> RayHit {
        let mut ray = *ray;
        let mut hit = RayHit::MISS;
        self.tree.intersect(&mut ray, &mut hit);
        hit
    }

    fn new_hardware_kernel(&self, device: &DeviceDescription) -> Option<HardwareKernel> {
        if !device.kind.is_hardware() {
            return None;
        }
        Some(
            HardwareKernel::new("qbvh")
                .with_define("QBVH_STACK_SIZE", TRAVERSAL_STACK_SIZE)
                .with_buffer("qbvh_nodes", self.tree.nodes())
                .with_buffer("qbvh_quad_triangles", self.tree.quads()),
        )
    }
}
