//! Built flat BVH and its stackless traversal.

use super::build::{build_arena, flatten, BuildPrimitive};
use super::BvhArrayNode;
use crate::core::BvhParams;
use crate::geom::{intersect_triangle, Ray, RayHit, TriangleMesh};
use crate::util::{BBox3f, Error, Result, Vec3};

/// Largest node count whose indices fit next to the leaf flag.
const MAX_NODES: usize = 0x7fff_ffff;

/// A triangle handed to [`BvhTree::build`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BvhTriangle {
    /// Indices into the tree's vertex array.
    pub v: [u32; 3],
    pub mesh_index: u32,
    pub triangle_index: u32,
}

/// Walk a skip-index array, calling `visit_leaf` for every leaf reached.
///
/// Hit interior nodes are entered by stepping to the next entry, missed
/// ones are jumped over with their skip index. The walk ends at the root's
/// skip index.
#[inline]
pub(crate) fn walk<F>(nodes: &[BvhArrayNode], ray: &mut Ray, mut visit_leaf: F)
where
    F: FnMut(&BvhArrayNode, &mut Ray),
{
    let Some(root) = nodes.first() else {
        return;
    };
    let stop = root.skip_index();
    let mut current = 0;
    while current < stop {
        let node = &nodes[current as usize];
        if node.is_leaf() {
            visit_leaf(node, ray);
            current += 1;
        } else if node.bbox().intersect_p(ray) {
            current += 1;
        } else {
            current = node.skip_index();
        }
    }
}

fn check_node_count(prim_count: usize) -> Result<()> {
    // A binary tree over n leaves holds at most 2n - 1 nodes
    if prim_count.saturating_mul(2) > MAX_NODES {
        return Err(Error::CapacityExceeded {
            what: "BVH primitives",
            limit: MAX_NODES / 2,
        });
    }
    Ok(())
}

/// Flat BVH over indexed triangles.
#[derive(Clone, Debug, Default)]
pub struct BvhTree {
    nodes: Vec<BvhArrayNode>,
    vertices: Vec<Vec3>,
}

impl BvhTree {
    pub fn build(params: &BvhParams, vertices: Vec<Vec3>, triangles: &[BvhTriangle]) -> Result<Self> {
        check_node_count(triangles.len())?;
        let mut prims: Vec<BuildPrimitive> = triangles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut bbox = BBox3f::from_points(t.v.map(|v| vertices[v as usize]));
                bbox.expand_by_epsilon();
                BuildPrimitive {
                    bbox,
                    index: i as u32,
                }
            })
            .collect();
        let arena = build_arena(params, &mut prims);
        let nodes = flatten(&arena, |i| {
            let t = &triangles[i as usize];
            [t.v[0], t.v[1], t.v[2], t.mesh_index, t.triangle_index, 0]
        });
        Ok(Self { nodes, vertices })
    }

    /// Tree over one mesh in its own space; hits report mesh 0.
    pub fn from_mesh(params: &BvhParams, mesh: &TriangleMesh) -> Result<Self> {
        let triangles: Vec<BvhTriangle> = mesh
            .triangles()
            .iter()
            .enumerate()
            .map(|(i, t)| BvhTriangle {
                v: t.v,
                mesh_index: 0,
                triangle_index: i as u32,
            })
            .collect();
        Self::build(params, mesh.vertices().to_vec(), &triangles)
    }

    #[inline]
    pub fn nodes(&self) -> &[BvhArrayNode] {
        &self.nodes
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of_val(self.nodes.as_slice()) + std::mem::size_of_val(self.vertices.as_slice())
    }

    /// Test the triangle stored in `leaf`, shrinking `ray.maxt` on a hit.
    #[inline]
    pub fn intersect_leaf(&self, leaf: &BvhArrayNode, ray: &mut Ray, hit: &mut RayHit) -> bool {
        let [v0, v1, v2] = leaf.triangle_vertices();
        let p = |v: u32| self.vertices[v as usize];
        match intersect_triangle(ray, p(v0), p(v1), p(v2)) {
            Some((t, b1, b2)) => {
                let (mesh_index, triangle_index) = leaf.triangle_id();
                ray.maxt = t;
                *hit = RayHit {
                    t,
                    b1,
                    b2,
                    mesh_index,
                    triangle_index,
                };
                true
            }
            None => false,
        }
    }

    /// Nearest hit in `(ray.mint, ray.maxt)`; shrinks `ray.maxt` on a hit.
    pub fn intersect(&self, ray: &mut Ray, hit: &mut RayHit) -> bool {
        let mut found = false;
        walk(&self.nodes, ray, |leaf, ray| {
            found |= self.intersect_leaf(leaf, ray, hit);
        });
        found
    }
}

/// Flat BVH whose leaves are object indices into `bboxes`.
pub(crate) fn build_object_nodes(params: &BvhParams, bboxes: &[BBox3f]) -> Result<Vec<BvhArrayNode>> {
    check_node_count(bboxes.len())?;
    let mut prims: Vec<BuildPrimitive> = bboxes
        .iter()
        .enumerate()
        .map(|(i, &bbox)| BuildPrimitive {
            bbox,
            index: i as u32,
        })
        .collect();
    let arena = build_arena(params, &mut prims);
    Ok(flatten(&arena, |i| [i, 0, 0, 0, 0, 0]))
}
