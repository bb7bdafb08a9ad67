use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::{collect_occurrences, Occurrence, OccurrenceFrame};
use crate::bvh::{build_object_nodes, BvhArrayNode, BvhTree};
use crate::core::{
    check_totals, Accelerator, AcceleratorType, DeviceDescription, HardwareKernel, MbvhParams,
};
use crate::geom::{Mesh, Ray, RayHit};
use crate::util::{BBox3f, Error, Mat4, Result, Vec3};

/// Position of the two-level walk.
///
/// Root states walk the root array in world space. On reaching a root
/// leaf whose occurrence box the ray hits, the walk enters that
/// occurrence's leaf tree with the ray in leaf space, remembering where to
/// resume in the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalState {
    Root {
        node: u32,
        stop: u32,
    },
    Leaf {
        occurrence: u32,
        node: u32,
        stop: u32,
        return_node: u32,
        return_stop: u32,
    },
}

/// Rays of one query: `world` carries the best distance so far, `local` is
/// the same ray in the current leaf's frame.
#[derive(Clone, Copy, Debug)]
pub struct TraversalRays {
    pub world: Ray,
    pub local: Ray,
}

/// Two-level hierarchy of flat BVHs.
///
/// One leaf tree is built per distinct base mesh; a root BVH over the
/// per-occurrence world boxes places them. `update` re-reads transforms and
/// motion systems and rebuilds only the root.
#[derive(Debug)]
pub struct MbvhAccel {
    params: MbvhParams,
    meshes: Vec<Arc<Mesh>>,
    leaves: Vec<Arc<BvhTree>>,
    occurrences: Vec<Occurrence>,
    root: Vec<BvhArrayNode>,
    initialized: bool,
}

impl MbvhAccel {
    pub fn new(params: MbvhParams) -> Self {
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
    pub fn leaves(&self) -> &[Arc<BvhTree>] {
        &self.leaves
    }

    #[inline]
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    #[inline]
    pub fn root_nodes(&self) -> &[BvhArrayNode] {
        &self.root
    }

    fn has_motion(&self) -> bool {
        self.occurrences.iter().any(|o| o.frame.is_motion())
    }

    fn build_root(&mut self) -> Result<()> {
        let bboxes: Vec<BBox3f> = self.occurrences.iter().map(|o| o.bbox).collect();
        self.root = build_object_nodes(&self.params.root, &bboxes)?;
        debug!(
            occurrences = bboxes.len(),
            nodes = self.root.len(),
            "MBVH root built"
        );
        Ok(())
    }

    /// Initial state of a walk, `None` for an empty hierarchy.
    pub fn start(&self) -> Option<TraversalState> {
        self.root.first().map(|root| TraversalState::Root {
            node: 0,
            stop: root.skip_index(),
        })
    }

    /// Process one node and return the next state, or `None` when the walk
    /// is over. Leaf hits update `hit` and shrink both rays' `maxt`.
    pub fn advance(
        &self,
        state: TraversalState,
        rays: &mut TraversalRays,
        hit: &mut RayHit,
    ) -> Option<TraversalState> {
        match state {
            TraversalState::Root { node, stop } => {
                if node >= stop {
                    return None;
                }
                let n = &self.root[node as usize];
                if n.is_leaf() {
                    let occurrence = n.object_index();
                    let occ = &self.occurrences[occurrence as usize];
                    let first = self.leaves[occ.leaf as usize].nodes().first();
                    let Some(first) = first.filter(|_| occ.bbox.intersect_p(&rays.world)) else {
                        return Some(TraversalState::Root {
                            node: node + 1,
                            stop,
                        });
                    };
                    rays.local = match occ.frame.world_to_local(rays.world.time) {
                        Some(m) => rays.world.transformed(&m),
                        None => rays.world,
                    };
                    Some(TraversalState::Leaf {
                        occurrence,
                        node: 0,
                        stop: first.skip_index(),
                        return_node: node + 1,
                        return_stop: stop,
                    })
                } else if n.bbox().intersect_p(&rays.world) {
                    Some(TraversalState::Root {
                        node: node + 1,
                        stop,
                    })
                } else {
                    Some(TraversalState::Root {
                        node: n.skip_index(),
                        stop,
                    })
                }
            }
            TraversalState::Leaf {
                occurrence,
                node,
                stop,
                return_node,
                return_stop,
            } => {
                if node >= stop {
                    rays.world.maxt = rays.local.maxt;
                    return Some(TraversalState::Root {
                        node: return_node,
                        stop: return_stop,
                    });
                }
                let tree = &self.leaves[self.occurrences[occurrence as usize].leaf as usize];
                let n = &tree.nodes()[node as usize];
                let next = if n.is_leaf() {
                    let mut leaf_hit = RayHit::MISS;
                    if tree.intersect_leaf(n, &mut rays.local, &mut leaf_hit) {
                        *hit = RayHit {
                            mesh_index: occurrence,
                            ..leaf_hit
                        };
                    }
                    node + 1
                } else if n.bbox().intersect_p(&rays.local) {
                    node + 1
                } else {
                    n.skip_index()
                };
                Some(TraversalState::Leaf {
                    occurrence,
                    node: next,
                    stop,
                    return_node,
                    return_stop,
                })
            }
        }
    }
}

impl Accelerator for MbvhAccel {
    fn accel_type(&self) -> AcceleratorType {
        AcceleratorType::Mbvh
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
        let (leaves, occurrences) =
            collect_occurrences(meshes, |base| BvhTree::from_mesh(&leaf_params, base))?;
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
            "MBVH ready"
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
        let mut rays = TraversalRays {
            world: *ray,
            local: *ray,
        };
        let mut state = self.start();
        while let Some(s) = state {
            state = self.advance(s, &mut rays, &mut hit);
        }
        hit
    }

    fn has_hw_support(&self, device: &DeviceDescription) -> bool {
        device.kind.is_hardware() && !self.has_motion()
    }

    /// Leaf node skip indices and vertex indices in `mbvh_leaf_nodes` are
    /// relative to each leaf; `mbvh_leaf_table` holds per occurrence
    /// `[node offset, vertex offset, transform index]`, the transform index
    /// being `u32::MAX` for world-space occurrences.
    fn new_hardware_kernel(&self, device: &DeviceDescription) -> Option<HardwareKernel> {
        if !self.has_hw_support(device) {
            return None;
        }

        let mut leaf_nodes: Vec<BvhArrayNode> = Vec::new();
        let mut leaf_vertices: Vec<Vec3> = Vec::new();
        let mut offsets = Vec::with_capacity(self.leaves.len());
        for leaf in &self.leaves {
            offsets.push([leaf_nodes.len() as u32, leaf_vertices.len() as u32]);
            leaf_nodes.extend_from_slice(leaf.nodes());
            leaf_vertices.extend_from_slice(leaf.vertices());
        }

        let mut table: Vec<[u32; 3]> = Vec::with_capacity(self.occurrences.len());
        let mut inverse_transforms: Vec<Mat4> = Vec::new();
        for occ in &self.occurrences {
            let [node_offset, vertex_offset] = offsets[occ.leaf as usize];
            let transform_index = match &occ.frame {
                OccurrenceFrame::Instance { world_to_local } => {
                    inverse_transforms.push(*world_to_local);
                    inverse_transforms.len() as u32 - 1
                }
                _ => u32::MAX,
            };
            table.push([node_offset, vertex_offset, transform_index]);
        }

        Some(
            HardwareKernel::new("mbvh")
                .with_buffer("mbvh_root_nodes", &self.root)
                .with_buffer("mbvh_leaf_nodes", &leaf_nodes)
                .with_buffer("mbvh_leaf_vertices", &leaf_vertices)
                .with_buffer("mbvh_leaf_table", &table)
                .with_buffer("mbvh_inverse_transforms", &inverse_transforms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceKind;
    use crate::geom::{MotionSystem, Triangle, TriangleMesh};

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

    fn instances(base: &Arc<TriangleMesh>, xs: &[f32]) -> Vec<Arc<Mesh>> {
        xs.iter()
            .map(|&x| {
                Arc::new(Mesh::instance(base.clone(), Mat4::from_translation(Vec3::new(x, 0.0, 0.0))).unwrap())
            })
            .collect()
    }

    fn down(x: f32, y: f32) -> Ray {
        Ray::new(Vec3::new(x, y, 5.0), Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn test_instances_share_one_leaf() {
        let base = unit_square();
        let meshes = instances(&base, &[0.0, 3.0, 6.0]);
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 12, 6).unwrap();
        assert_eq!(accel.leaves().len(), 1);
        assert_eq!(accel.occurrences().len(), 3);

        let hit = accel.intersect(&down(3.75, 0.25));
        assert_eq!(hit.mesh_index, 1);
        assert_eq!(hit.triangle_index, 0);
        assert!((hit.t - 5.0).abs() < 1e-5);

        let hit = accel.intersect(&down(6.25, 0.75));
        assert_eq!(hit.mesh_index, 2);
        assert_eq!(hit.triangle_index, 1);

        assert!(accel.intersect(&down(2.0, 0.5)).is_miss());
    }

    #[test]
    fn test_nearest_occurrence_wins() {
        let base = unit_square();
        let meshes = vec![
            Arc::new(Mesh::instance(base.clone(), Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0))).unwrap()),
            Arc::new(Mesh::instance(base.clone(), Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))).unwrap()),
            Arc::new(Mesh::instance(base, Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0))).unwrap()),
        ];
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 12, 6).unwrap();
        let hit = accel.intersect(&down(0.5, 0.25));
        assert_eq!(hit.mesh_index, 1);
        assert!((hit.t - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_advance_state_machine() {
        let base = unit_square();
        let meshes = instances(&base, &[0.0, 10.0]);
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 8, 4).unwrap();

        // A ray missing the whole scene never enters a leaf tree
        let ray = down(5.0, 5.0);
        let mut rays = TraversalRays { world: ray, local: ray };
        let mut hit = RayHit::MISS;
        let mut state = accel.start();
        while let Some(s) = state {
            assert!(matches!(s, TraversalState::Root { .. }));
            state = accel.advance(s, &mut rays, &mut hit);
        }
        assert!(hit.is_miss());

        // A hit enters exactly one leaf tree, then resumes in the root
        let ray = down(10.5, 0.25);
        let mut rays = TraversalRays { world: ray, local: ray };
        let mut entered = Vec::new();
        let mut resumed = false;
        let mut state = accel.start();
        while let Some(s) = state {
            let next = accel.advance(s, &mut rays, &mut hit);
            match (s, next) {
                (TraversalState::Root { .. }, Some(TraversalState::Leaf { occurrence, .. })) => {
                    entered.push(occurrence);
                    assert!((rays.local.o.x - 0.5).abs() < 1e-6);
                }
                (TraversalState::Leaf { return_node, .. }, Some(TraversalState::Root { node, .. })) => {
                    assert_eq!(node, return_node);
                    resumed = true;
                }
                _ => {}
            }
            state = next;
        }
        assert_eq!(entered, vec![1]);
        assert!(resumed);
        assert_eq!(hit.mesh_index, 1);
        assert_eq!(rays.world.maxt, hit.t);
    }

    #[test]
    fn test_update_moves_instance() {
        let base = unit_square();
        let meshes = instances(&base, &[0.0]);
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 4, 2).unwrap();
        let leaf = accel.leaves()[0].clone();

        if let Mesh::Instance(inst) = meshes[0].as_ref() {
            inst.set_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))).unwrap();
        }
        // Stale until update
        assert!(!accel.intersect(&down(0.5, 0.25)).is_miss());
        accel.update().unwrap();
        assert!(accel.intersect(&down(0.5, 0.25)).is_miss());
        assert!(!accel.intersect(&down(5.5, 0.25)).is_miss());
        assert!(Arc::ptr_eq(&leaf, &accel.leaves()[0]));
    }

    #[test]
    fn test_motion_blur() {
        let base = unit_square();
        let motion = MotionSystem::new(
            vec![0.0, 1.0],
            vec![Mat4::IDENTITY, Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0))],
        )
        .unwrap();
        let meshes = vec![Arc::new(Mesh::motion(base, motion))];
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 4, 2).unwrap();

        assert!(!accel.intersect(&down(0.5, 0.25).at_time(0.0)).is_miss());
        assert!(accel.intersect(&down(0.5, 0.25).at_time(1.0)).is_miss());
        assert!(!accel.intersect(&down(4.5, 0.25).at_time(1.0)).is_miss());
        assert!(!accel.intersect(&down(2.5, 0.25).at_time(0.5)).is_miss());

        let gpu = DeviceDescription::hardware("gpu", DeviceKind::OpenCl, 1 << 30);
        assert!(!accel.has_hw_support(&gpu));
        assert!(accel.new_hardware_kernel(&gpu).is_none());
    }

    #[test]
    fn test_hardware_kernel_tables() {
        let base = unit_square();
        let mut meshes = instances(&base, &[0.0, 3.0]);
        meshes.push(Arc::new(Mesh::Triangle(unit_square())));
        let mut accel = MbvhAccel::new(MbvhParams::default());
        accel.init(&meshes, 12, 6).unwrap();

        let gpu = DeviceDescription::hardware("gpu", DeviceKind::OpenCl, 1 << 30);
        let kernel = accel.new_hardware_kernel(&gpu).unwrap();
        let table: Vec<[u32; 3]> =
            bytemuck::pod_collect_to_vec(&kernel.buffer("mbvh_leaf_table").unwrap().data);
        assert_eq!(table.len(), 3);
        assert_eq!(table[0], [0, 0, 0]);
        assert_eq!(table[1], [0, 0, 1]);
        assert_eq!(table[2][2], u32::MAX);
        assert_eq!(table[2][1], 4);
        assert_eq!(kernel.buffer("mbvh_inverse_transforms").unwrap().data.len(), 2 * 64);
    }
}
