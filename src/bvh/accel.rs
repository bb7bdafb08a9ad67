use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::{BvhTree, BvhTriangle};
use crate::core::{
    check_totals, Accelerator, AcceleratorType, BvhParams, DeviceDescription, HardwareKernel,
};
use crate::geom::{Mesh, Ray, RayHit};
use crate::util::{Error, Result, Vec3};

/// Single-level flat BVH. All meshes are merged into one world-space
/// vertex array at time 0; there is no update.
#[derive(Debug)]
pub struct BvhAccel {
    params: BvhParams,
    tree: BvhTree,
    initialized: bool,
}

impl BvhAccel {
    pub fn new(params: BvhParams) -> Self {
        Self {
            params,
            tree: BvhTree::default(),
            initialized: false,
        }
    }

    #[inline]
    pub fn tree(&self) -> &BvhTree {
        &self.tree
    }
}

impl Accelerator for BvhAccel {
    fn accel_type(&self) -> AcceleratorType {
        AcceleratorType::Bvh
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
        let started = Instant::now();

        let mut vertices: Vec<Vec3> = Vec::with_capacity(total_vertex_count);
        let mut triangles = Vec::with_capacity(total_triangle_count);
        for (mesh_index, mesh) in meshes.iter().enumerate() {
            let offset = vertices.len() as u32;
            vertices.extend(mesh.world_vertices(0.0));
            for (triangle_index, tri) in mesh.triangles().iter().enumerate() {
                triangles.push(BvhTriangle {
                    v: tri.v.map(|v| v + offset),
                    mesh_index: mesh_index as u32,
                    triangle_index: triangle_index as u32,
                });
            }
        }

        self.tree = BvhTree::build(&self.params, vertices, &triangles)?;
        self.initialized = true;
        info!(
            triangles = triangles.len(),
            nodes = self.tree.nodes().len(),
            builder = %self.params.builder,
            memory_kb = self.tree.memory_usage() / 1024,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "BVH ready"
        );
        Ok(())
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
            HardwareKernel::new("bvh")
                .with_buffer("bvh_vertices", self.tree.vertices())
                .with_buffer("bvh_nodes", self.tree.nodes()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceKind;
    use crate::geom::Triangle;

    fn square_at(z: f32) -> Arc<Mesh> {
        Arc::new(
            Mesh::triangle(
                vec![
                    Vec3::new(0.0, 0.0, z),
                    Vec3::new(1.0, 0.0, z),
                    Vec3::new(1.0, 1.0, z),
                    Vec3::new(0.0, 1.0, z),
                ],
                vec![Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_merged_meshes() {
        let mut accel = BvhAccel::new(BvhParams::default());
        accel.init(&[square_at(0.0), square_at(-2.0)], 8, 4).unwrap();

        let hit = accel.intersect(&Ray::new(Vec3::new(0.75, 0.25, 1.0), Vec3::new(0.0, 0.0, -1.0)));
        assert_eq!(hit.mesh_index, 0);
        assert_eq!(hit.triangle_index, 0);
        assert!((hit.t - 1.0).abs() < 1e-6);

        let hit = accel.intersect(&Ray::new(Vec3::new(0.25, 0.75, -1.0), Vec3::new(0.0, 0.0, -1.0)));
        assert_eq!(hit.mesh_index, 1);
        assert_eq!(hit.triangle_index, 1);
    }

    #[test]
    fn test_no_update() {
        let mut accel = BvhAccel::new(BvhParams::default());
        accel.init(&[square_at(0.0)], 4, 2).unwrap();
        assert!(!accel.does_support_update());
        assert!(matches!(accel.update(), Err(Error::UpdateNotSupported(AcceleratorType::Bvh))));
    }

    #[test]
    fn test_hardware_kernel() {
        let mut accel = BvhAccel::new(BvhParams::default());
        accel.init(&[square_at(0.0)], 4, 2).unwrap();
        let gpu = DeviceDescription::hardware("gpu", DeviceKind::Cuda, 1 << 30);
        let kernel = accel.new_hardware_kernel(&gpu).unwrap();
        assert_eq!(kernel.buffer("bvh_vertices").unwrap().data.len(), 4 * 12);
        assert_eq!(kernel.buffer("bvh_nodes").unwrap().data.len(), 3 * 28);
        assert!(accel.new_hardware_kernel(&DeviceDescription::native()).is_none());
    }
}
