//! Built quad BVH and its stack traversal.

use smallvec::{smallvec, SmallVec};

use super::build::build_quads;
use super::{ChildRef, QbvhNode, QuadLane, QuadRay, QuadTriangle, EMPTY_CHILD};
use crate::core::QbvhParams;
use crate::geom::{Ray, RayHit};
use crate::util::Result;

/// Traversal stack entries kept inline before spilling to the heap.
pub const TRAVERSAL_STACK_SIZE: usize = 64;

/// Walk `nodes` from the root, calling `visit_leaf(first, count, qray, ray)`
/// for every leaf whose box the ray enters.
///
/// Visible children are pushed in slot order. After each leaf the box test
/// picks up the leaf's shortened `ray.maxt`.
#[inline]
pub(crate) fn traverse<F>(nodes: &[QbvhNode], ray: &mut Ray, mut visit_leaf: F)
where
    F: FnMut(u32, u32, &QuadRay, &mut Ray),
{
    if nodes.is_empty() {
        return;
    }
    let mut qray = QuadRay::new(ray);
    let mut stack: SmallVec<[i32; TRAVERSAL_STACK_SIZE]> = smallvec![0];
    while let Some(code) = stack.pop() {
        match ChildRef::decode(code) {
            ChildRef::Interior(index) => {
                let node = &nodes[index as usize];
                let visible = node.bbox_intersect(&qray);
                for slot in 0..4 {
                    if visible & (1 << slot) != 0 && node.children[slot] != EMPTY_CHILD {
                        stack.push(node.children[slot]);
                    }
                }
            }
            ChildRef::Leaf {
                first_quad,
                quad_count,
            } => {
                visit_leaf(first_quad, quad_count, &qray, ray);
                qray.set_maxt(ray.maxt);
            }
            ChildRef::Empty => {}
        }
    }
}

/// Quad BVH over a triangle soup.
#[derive(Clone, Debug)]
pub struct QbvhTree {
    nodes: Vec<QbvhNode>,
    quads: Vec<QuadTriangle>,
    max_depth: usize,
}

impl QbvhTree {
    /// Build over `lanes`. An empty input gives a tree that never hits.
    pub fn build(params: &QbvhParams, lanes: &[QuadLane]) -> Result<Self> {
        let build = build_quads(params, lanes)?;
        Ok(Self {
            nodes: build.nodes,
            quads: build.quads,
            max_depth: build.max_depth,
        })
    }

    #[inline]
    pub fn nodes(&self) -> &[QbvhNode] {
        &self.nodes
    }

    #[inline]
    pub fn quads(&self) -> &[QuadTriangle] {
        &self.quads
    }

    /// Deepest binary split level reached by the builder.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Bytes held by the node and quad arrays.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of_val(self.nodes.as_slice()) + std::mem::size_of_val(self.quads.as_slice())
    }

    /// Nearest hit in `(ray.mint, ray.maxt)`. On a hit `ray.maxt` shrinks to
    /// the hit distance and `hit` is overwritten; returns whether that
    /// happened.
    pub fn intersect(&self, ray: &mut Ray, hit: &mut RayHit) -> bool {
        let mut found = false;
        let quads = &self.quads;
        traverse(&self.nodes, ray, |first, count, qray, ray| {
            for quad in &quads[first as usize..(first + count) as usize] {
                found |= quad.intersect(qray, ray, hit);
            }
        });
        found
    }
}

impl Default for QbvhTree {
    fn default() -> Self {
        Self {
            nodes: vec![QbvhNode::EMPTY],
            quads: Vec::new(),
            max_depth: 0,
        }
    }
}
