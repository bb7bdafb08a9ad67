use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::core::{
    check_totals, Accelerator, AcceleratorType, DeviceDescription, HardwareKernel, MqbvhParams,
};
use crate::geom::{Mesh, Ray, RayHit, TriangleMesh};
use crate::mbvh::{collect_occurrences, Occurrence, OccurrenceFrame};
use crate::qbvh::{
    build_objects, traverse, QbvhNode, QbvhTree, QuadLane, QuadTriangle, TRAVERSAL_STACK_SIZE,
};
use crate::util::{BBox3f, Error, Mat4, Result};

fn mesh_lanes(mesh: &TriangleMesh) -> Vec<QuadLane> {
    let vertices = mesh.vertices();
    mesh.triangles()
        .iter()
        .enumerate()
        .map(|(i, t)| QuadLane {
            vertices: t.positions(vertices),
            mesh_index: 0,
            triangle_index: i as u32,
        })
        .collect()
}

#[derive(Debug)]
pub struct MqbvhAccel {
    params: MqbvhParams,
    meshes: Vec<Arc<Mesh>>,
    leaves: Vec<Arc<QbvhTree>>,
    occurrences: Vec<Occurrence>,
    root: Vec<QbvhNode>,
    initialized: bool,
}

impl MqbvhAccel {
    pub fn new(params: MqbvhParams) -> Self {
        Self {
            params,
            meshes: Vec::new(),
            leaves: Vec::new(),
            occurrences: Vec::new(),
            root: Vec::new(),
            initialized: false,
        }
    }

    #[inline]
    pub fn leaves(&self) -> &[Arc<QbvhTree>] {
        &self.leaves
    }

    #[inline]
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    #[inline]
    pub fn root_nodes(&self) -> &[QbvhNode] {
        &self.root
    }

    fn has_motion(&self) -> bool {
        self.occurrences.iter().any(|o| o.frame.is_motion())
    }

    fn build_root(&mut self) -> Result<()> {
        let bboxes: Vec<BBox3f> = self.occurrences.iter().map(|o| o.bbox).collect();
        self.root = build_objects(&self.params.root, &bboxes)?;
        debug!(
            occurrences = bboxes.len(),
            nodes = self.root.len(),
            "MQBVH root built"
        );
        Ok(())
    }
}

impl Accelerator for MqbvhAccel {
    fn accel_type(&self) -> AcceleratorType {
        AcceleratorType::Mqbvh
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

        let leaf_params = self.params.leaf.clone();
        let (leaves, occurrences) = collect_occurrences(meshes, |base| {
            QbvhTree::build(&leaf_params, &mesh_lanes(base))
        })?;
        self.meshes = meshes.to_vec();
        self.leaves = leaves;
        self.occurrences = occurrences;
        self.build_root()?;
        self.initialized = true;

        info!(
            occurrences = self.occurrences.len(),
            leaf_trees = self.leaves.len(),
            root_nodes = self.root.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MQBVH ready"
        );
        Ok(())
    }

    fn does_support_update(&self) -> bool {
        true
    }

    fn update(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized(self.accel_type()));
        }
        for (occ, mesh) in self.occurrences.iter_mut().zip(&self.meshes) {
            occ.refresh(mesh);
        }
        self.build_root()
    }

    fn intersect(&self, ray: &Ray) -> RayHit {
        let mut hit = RayHit::MISS;
        let mut world = *ray;
        traverse(&self.root, &mut world, |occurrence, _, _, world| {
            let occ = &self.occurrences[occurrence as usize];
            let mut local = match occ.frame.world_to_local(world.time) {
                Some(m) => world.transformed(&m),
                None => *world,
            };
            let mut leaf_hit = RayHit::MISS;
            if self.leaves[occ.leaf as usize].intersect(&mut local, &mut leaf_hit) {
                world.maxt = local.maxt;
                hit = RayHit {
                    mesh_index: occurrence,
                    ..leaf_hit
                };
            }
        });
        hit
    }

    fn has_hw_support(&self, device: &DeviceDescription) -> bool {
        device.kind.is_hardware() && !self.has_motion()
    }

    /// Leaf child codes in `mqbvh_leaf_nodes` are relative to each leaf
    /// tree. `mqbvh_memory_map` holds `[node offset, quad offset]` per
    /// occurrence and `mqbvh_leaf_transform_index` an index into
    /// `mqbvh_inverse_transforms`, `u32::MAX` for world-space occurrences.
    fn new_hardware_kernel(&self, device: &DeviceDescription) -> Option<HardwareKernel> {
        if !self.has_hw_support(device) {
            return None;
        }

        let mut leaf_nodes: Vec<QbvhNode> = Vec::new();
        let mut leaf_quads: Vec<QuadTriangle> = Vec::new();
        let mut offsets = Vec::with_capacity(self.leaves.len());
        for leaf in &self.leaves {
            offsets.push([leaf_nodes.len() as u32, leaf_quads.len() as u32]);
            leaf_nodes.extend_from_slice(leaf.nodes());
            leaf_quads.extend_from_slice(leaf.quads());
        }

        let mut memory_map: Vec<[u32; 2]> = Vec::with_capacity(self.occurrences.len());
        let mut transform_index: Vec<u32> = Vec::with_capacity(self.occurrences.len());
        let mut inverse_transforms: Vec<Mat4> = Vec::new();
        for occ in &self.occurrences {
            memory_map.push(offsets[occ.leaf as usize]);
            transform_index.push(match &occ.frame {
                OccurrenceFrame::Instance { world_to_local } => {
                    inverse_transforms.push(*world_to_local);
                    inverse_transforms.len() as u32 - 1
                }
                _ => u32::MAX,
            });
        }

        Some(
            HardwareKernel::new("mqbvh")
                .with_define("QBVH_STACK_SIZE", TRAVERSAL_STACK_SIZE)
                .with_buffer("mqbvh_root_nodes", &self.root)
                .with_buffer("mqbvh_leaf_nodes", &leaf_nodes)
                .with_buffer("mqbvh_leaf_quads", &leaf_quads)
                .with_buffer("mqbvh_memory_map", &memory_map)
                .with_buffer("mqbvh_leaf_transform_index", &transform_index)
                .with_buffer("mqbvh_inverse_transforms", &inverse_transforms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceKind;
    use crate::geom::{MotionSystem, Triangle};
    use crate::qbvh::ChildRef;
    use crate::util::Vec3;

    fn unit_square() -> Arc<TriangleMesh> {
        Arc::new(
            TriangleMesh::new(
                vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(1.0, 0.0, 0.0),
                    Vec3::new(1.0, 1.0, 0.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                vec![Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
            )
            .unwrap(),
        )
    }

    fn instance_at(base: &Arc<TriangleMesh>, offset: Vec3) -> Arc<Mesh> {
        Arc::new(Mesh::instance(base.clone(), Mat4::from_translation(offset)).unwrap())
    }

    fn down(x: f32, y: f32) -> Ray {
        Ray::new(Vec3::new(x, y, 5.0), Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn test_root_leaves_name_occurrences() {
        let base = unit_square();
        let meshes: Vec<Arc<Mesh>> = (0..9)
            .map(|i| instance_at(&base, Vec3::new(i as f32 * 2.0, 0.0, 0.0)))
            .collect();
        let mut accel = MqbvhAccel::new(MqbvhParams::default());
        accel.init(&meshes, 36, 18).unwrap();
        assert_eq!(accel.leaves().len(), 1);

        let mut named = Vec::new();
        for node in accel.root_nodes() {
            for slot in 0..4 {
                if let ChildRef::Leaf {
                    first_quad,
                    quad_count,
                } = node.child(slot)
                {
                    assert_eq!(quad_count, 1);
                    named.push(first_quad);
                }
            }
        }
        named.sort_unstable();
        assert_eq!(named, (0..9).collect::<Vec<_>>());

        for i in 0..9 {
            let hit = accel.intersect(&down(i as f32 * 2.0 + 0.75, 0.25));
            assert_eq!(hit.mesh_index, i);
            assert_eq!(hit.triangle_index, 0);
        }
        assert!(accel.intersect(&down(1.5, 0.5)).is_miss());
    }

    #[test]
    fn test_coincident_occurrences() {
        let base = unit_square();
        let meshes: Vec<Arc<Mesh>> = (0..6).map(|_| instance_at(&base, Vec3::ZERO)).collect();
        let mut accel = MqbvhAccel::new(MqbvhParams::default());
        accel.init(&meshes, 24, 12).unwrap();
        let hit = accel.intersect(&down(0.5, 0.25));
        assert!(!hit.is_miss());
        assert!(hit.mesh_index < 6);
    }

    #[test]
    fn test_update_rebuilds_root_only() {
        let base = unit_square();
        let meshes = vec![instance_at(&base, Vec3::ZERO), instance_at(&base, Vec3::new(3.0, 0.0, 0.0))];
        let mut accel = MqbvhAccel::new(MqbvhParams::default());
        accel.init(&meshes, 8, 4).unwrap();
        let leaf = accel.leaves()[0].clone();

        if let Mesh::Instance(inst) = meshes[1].as_ref() {
            inst.set_transform(Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0))).unwrap();
        }
        accel.update().unwrap();
        assert!(accel.intersect(&down(3.5, 0.25)).is_miss());
        assert_eq!(accel.intersect(&down(0.5, 3.25)).mesh_index, 1);
        assert!(Arc::ptr_eq(&leaf, &accel.leaves()[0]));
    }

    #[test]
    fn test_hardware_support() {
        let base = unit_square();
        let gpu = DeviceDescription::hardware("gpu", DeviceKind::Cuda, 1 << 30);

        let mut accel = MqbvhAccel::new(MqbvhParams::default());
        accel
            .init(&[instance_at(&base, Vec3::ZERO), Arc::new(Mesh::Triangle(base.clone()))], 8, 4)
            .unwrap();
        let kernel = accel.new_hardware_kernel(&gpu).unwrap();
        assert_eq!(kernel.buffer("mqbvh_leaf_quads").unwrap().data.len(), 176);
        let indices: Vec<u32> =
            bytemuck::pod_collect_to_vec(&kernel.buffer("mqbvh_leaf_transform_index").unwrap().data);
        assert_eq!(indices, vec![0, u32::MAX]);

        let motion = MotionSystem::new(
            vec![0.0, 1.0],
            vec![Mat4::IDENTITY, Mat4::from_translation(Vec3::X)],
        )
        .unwrap();
        let mut blurred = MqbvhAccel::new(MqbvhParams::default());
        blurred.init(&[Arc::new(Mesh::motion(base, motion))], 4, 2).unwrap();
        assert!(!blurred.has_hw_support(&gpu));
        assert!(blurred.new_hardware_kernel(&gpu).is_none());
        assert!(!blurred.intersect(&down(1.5, 0.25).at_time(1.0)).is_miss());
    }
}
