//! Binned SAH builder for quad BVHs.
//!
//! The tree is built as a binary split hierarchy where every two levels
//! collapse into one four-wide node: an even-depth range allocates a node
//! and hands slots 0 and 2 to its halves, an odd-depth range splits again
//! into slots `i` and `i + 1` of that same node.
//!
//! In triangle mode leaves first hold primitive ranges, which a final
//! depth-first pass swizzles into [`QuadTriangle`] packets. In object mode
//! every leaf references one object directly and no quads are produced.

use std::time::Instant;

use tracing::{debug, warn};

use super::{ChildRef, QbvhNode, QuadLane, QuadTriangle, MAX_LEAF_QUADS, MAX_QUAD_INDEX};
use crate::core::{QbvhParams, QBVH_MAX_LEAF_PRIMS};
use crate::util::{partition, BBox3f, Error, Result, Vec3};

/// Depth past which ranges are turned into leaves.
pub const MAX_BUILD_DEPTH: usize = 64;

/// Bins per split evaluation.
const NB_BINS: usize = 8;

/// What the leaves of a tree reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LeafMode {
    /// Runs of up to 16 quads of triangles.
    Quads,
    /// One object per leaf; the leaf index is the object index.
    Objects,
}

/// Pending range of the primitive index array.
struct Task {
    start: usize,
    end: usize,
    bbox: BBox3f,
    centroid_bbox: BBox3f,
    parent: Option<u32>,
    slot: usize,
    depth: usize,
}

struct Builder<'a> {
    mode: LeafMode,
    max_leaf_prims: usize,
    forced_leaf_limit: usize,
    full_sweep_threshold: usize,
    skip_factor: usize,
    bboxes: &'a [BBox3f],
    centroids: Vec<Vec3>,
    prims: Vec<u32>,
    nodes: Vec<QbvhNode>,
    /// Primitive ranges of the temporary leaves (triangle mode).
    leaf_ranges: Vec<(u32, u32)>,
    stack: Vec<Task>,
    max_depth: usize,
    oversized_leaves: usize,
}

impl<'a> Builder<'a> {
    fn new(params: &QbvhParams, mode: LeafMode, bboxes: &'a [BBox3f]) -> Self {
        let (max_leaf_prims, forced_leaf_limit) = match mode {
            LeafMode::Quads => (
                params.max_prims_per_leaf as usize,
                QBVH_MAX_LEAF_PRIMS as usize,
            ),
            LeafMode::Objects => (1, 1),
        };
        let n = bboxes.len();
        Self {
            mode,
            max_leaf_prims,
            forced_leaf_limit,
            full_sweep_threshold: params.full_sweep_threshold as usize,
            skip_factor: params.skip_factor.max(1) as usize,
            bboxes,
            centroids: bboxes.iter().map(BBox3f::center).collect(),
            prims: (0..n as u32).collect(),
            nodes: Vec::with_capacity(estimate_node_count(n, max_leaf_prims)),
            leaf_ranges: Vec::new(),
            stack: Vec::new(),
            max_depth: 0,
            oversized_leaves: 0,
        }
    }

    fn run(&mut self) {
        let mut bbox = BBox3f::EMPTY;
        let mut centroid_bbox = BBox3f::EMPTY;
        for (b, &c) in self.bboxes.iter().zip(&self.centroids) {
            bbox.expand_by_box(b);
            centroid_bbox.expand_by_point(c);
        }
        self.stack.push(Task {
            start: 0,
            end: self.prims.len(),
            bbox,
            centroid_bbox,
            parent: None,
            slot: 0,
            depth: 0,
        });
        while let Some(task) = self.stack.pop() {
            self.build_range(task);
        }
        if self.oversized_leaves > 0 {
            warn!(
                count = self.oversized_leaves,
                limit = self.forced_leaf_limit,
                "ranges with coincident centroids exceeded the leaf limit and were split at the median"
            );
        }
    }

    fn build_range(&mut self, task: Task) {
        let count = task.end - task.start;
        if count <= self.max_leaf_prims {
            self.make_leaf(&task);
            return;
        }
        if task.depth > MAX_BUILD_DEPTH {
            self.force_leaf(task);
            return;
        }

        let axis = task.centroid_bbox.maximum_extent();
        let k0 = task.centroid_bbox.min[axis];
        let extent = task.centroid_bbox.max[axis] - k0;
        let k1 = NB_BINS as f32 / extent;
        if !k1.is_finite() {
            self.force_leaf(task);
            return;
        }

        let split_pos = self.find_split(&task, axis, k0, k1, extent);
        let centroids = &self.centroids;
        let mid = task.start
            + partition(&mut self.prims[task.start..task.end], |&p| {
                centroids[p as usize][axis] <= split_pos
            });
        let mid = if mid == task.start || mid == task.end {
            task.start + count / 2
        } else {
            mid
        };
        self.split(task, mid);
    }

    /// Sweep the bins on `axis` and return the cheapest split position.
    fn find_split(&self, task: &Task, axis: usize, k0: f32, k1: f32, extent: f32) -> f32 {
        let count = task.end - task.start;
        let step = if count < self.full_sweep_threshold {
            1
        } else {
            self.skip_factor
        };

        let mut bins = [(BBox3f::EMPTY, 0usize); NB_BINS];
        for &p in self.prims[task.start..task.end].iter().step_by(step) {
            let c = self.centroids[p as usize][axis];
            let bin = (((c - k0) * k1) as usize).min(NB_BINS - 1);
            bins[bin].0.expand_by_box(&self.bboxes[p as usize]);
            bins[bin].1 += 1;
        }

        let mut left_area = [0.0f32; NB_BINS];
        let mut left_count = [0usize; NB_BINS];
        let mut right_area = [0.0f32; NB_BINS];
        let mut right_count = [0usize; NB_BINS];
        let (mut acc, mut n) = (BBox3f::EMPTY, 0);
        for i in 0..NB_BINS {
            acc.expand_by_box(&bins[i].0);
            n += bins[i].1;
            left_area[i] = acc.surface_area();
            left_count[i] = n;
        }
        let (mut acc, mut n) = (BBox3f::EMPTY, 0);
        for i in (0..NB_BINS).rev() {
            acc.expand_by_box(&bins[i].0);
            n += bins[i].1;
            right_area[i] = acc.surface_area();
            right_count[i] = n;
        }

        let mut best_bin = NB_BINS / 2 - 1;
        let mut best_cost = f32::INFINITY;
        for i in 0..NB_BINS - 1 {
            let cost = left_area[i] * left_count[i] as f32
                + right_area[i + 1] * right_count[i + 1] as f32;
            if cost < best_cost {
                best_cost = cost;
                best_bin = i;
            }
        }
        k0 + (best_bin + 1) as f32 * (extent / NB_BINS as f32)
    }

    /// Split `[start, mid)` / `[mid, end)` into two child tasks.
    fn split(&mut self, task: Task, mid: usize) {
        let (node, left_slot, right_slot) = match task.parent {
            Some(parent) if task.depth % 2 == 1 => (parent, task.slot, task.slot + 1),
            _ => (self.new_node(task.parent, task.slot, &task.bbox), 0, 2),
        };

        let (left_bbox, left_centroids) = self.range_bounds(task.start, mid);
        let (right_bbox, right_centroids) = self.range_bounds(mid, task.end);
        let depth = task.depth + 1;
        self.stack.push(Task {
            start: mid,
            end: task.end,
            bbox: right_bbox,
            centroid_bbox: right_centroids,
            parent: Some(node),
            slot: right_slot,
            depth,
        });
        self.stack.push(Task {
            start: task.start,
            end: mid,
            bbox: left_bbox,
            centroid_bbox: left_centroids,
            parent: Some(node),
            slot: left_slot,
            depth,
        });
    }

    fn range_bounds(&self, start: usize, end: usize) -> (BBox3f, BBox3f) {
        let mut bbox = BBox3f::EMPTY;
        let mut centroid_bbox = BBox3f::EMPTY;
        for &p in &self.prims[start..end] {
            bbox.expand_by_box(&self.bboxes[p as usize]);
            centroid_bbox.expand_by_point(self.centroids[p as usize]);
        }
        (bbox, centroid_bbox)
    }

    /// Leaf for a range that can no longer be split by position.
    fn force_leaf(&mut self, task: Task) {
        let count = task.end - task.start;
        if count <= self.forced_leaf_limit {
            self.make_leaf(&task);
        } else {
            self.oversized_leaves += 1;
            let mid = task.start + count / 2;
            self.split(task, mid);
        }
    }

    fn make_leaf(&mut self, task: &Task) {
        let (node, slot) = match task.parent {
            Some(parent) => (parent, task.slot),
            None => (self.new_node(None, 0, &task.bbox), 0),
        };
        self.max_depth = self.max_depth.max(task.depth);

        let count = task.end - task.start;
        if count == 0 {
            self.nodes[node as usize].set_child(slot, ChildRef::Empty);
            return;
        }
        let child = match self.mode {
            LeafMode::Quads => {
                let leaf = self.leaf_ranges.len() as u32;
                self.leaf_ranges.push((task.start as u32, task.end as u32));
                ChildRef::Leaf {
                    first_quad: leaf,
                    quad_count: count.div_ceil(4) as u32,
                }
            }
            LeafMode::Objects => ChildRef::Leaf {
                first_quad: self.prims[task.start],
                quad_count: 1,
            },
        };
        let n = &mut self.nodes[node as usize];
        n.set_child_bbox(slot, &task.bbox);
        n.set_child(slot, child);
    }

    fn new_node(&mut self, parent: Option<u32>, slot: usize, bbox: &BBox3f) -> u32 {
        if self.nodes.len() == self.nodes.capacity() {
            let grow = self.nodes.len().max(16);
            debug!(
                nodes = self.nodes.len(),
                grow, "QBVH node estimate exceeded, growing"
            );
            self.nodes.reserve_exact(grow);
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(QbvhNode::EMPTY);
        if let Some(parent) = parent {
            let p = &mut self.nodes[parent as usize];
            p.set_child_bbox(slot, bbox);
            p.set_child(slot, ChildRef::Interior(index));
        }
        index
    }

    /// Replace temporary leaves by runs of quads. Lanes past the end of a
    /// leaf repeat its last triangle.
    fn swizzle(&mut self, lanes: &[QuadLane]) -> Result<Vec<QuadTriangle>> {
        let mut quads = Vec::with_capacity(lanes.len().div_ceil(4) + self.leaf_ranges.len());
        let mut stack = vec![0u32];
        while let Some(n) = stack.pop() {
            for slot in 0..4 {
                match self.nodes[n as usize].child(slot) {
                    ChildRef::Empty => {}
                    ChildRef::Interior(child) => stack.push(child),
                    ChildRef::Leaf {
                        first_quad: leaf,
                        quad_count,
                    } => {
                        let (start, end) = self.leaf_ranges[leaf as usize];
                        let (start, end) = (start as usize, end as usize);
                        if quad_count > MAX_LEAF_QUADS {
                            return Err(Error::CapacityExceeded {
                                what: "quads per leaf",
                                limit: MAX_LEAF_QUADS as usize,
                            });
                        }
                        let first = quads.len();
                        if first > MAX_QUAD_INDEX as usize {
                            return Err(Error::CapacityExceeded {
                                what: "quad triangles",
                                limit: MAX_QUAD_INDEX as usize,
                            });
                        }
                        for q in 0..quad_count as usize {
                            let lane = |i: usize| {
                                let k = (start + 4 * q + i).min(end - 1);
                                &lanes[self.prims[k] as usize]
                            };
                            quads.push(QuadTriangle::new([lane(0), lane(1), lane(2), lane(3)]));
                        }
                        self.nodes[n as usize].set_child(
                            slot,
                            ChildRef::Leaf {
                                first_quad: first as u32,
                                quad_count,
                            },
                        );
                    }
                }
            }
        }
        Ok(quads)
    }
}

/// Node count of a full four-wide tree over the expected leaves.
fn estimate_node_count(prim_count: usize, max_leaf_prims: usize) -> usize {
    let mut layer = prim_count.div_ceil(max_leaf_prims.max(1));
    let mut total = 0;
    while layer > 1 {
        layer = layer.div_ceil(4);
        total += layer;
    }
    total.max(1)
}

fn check_capacity(count: usize) -> Result<()> {
    if count > MAX_QUAD_INDEX as usize {
        return Err(Error::CapacityExceeded {
            what: "primitives",
            limit: MAX_QUAD_INDEX as usize,
        });
    }
    Ok(())
}

/// Nodes and quads of a triangle-mode tree.
pub(crate) struct QuadBuild {
    pub nodes: Vec<QbvhNode>,
    pub quads: Vec<QuadTriangle>,
    pub max_depth: usize,
}

/// Build a triangle-mode tree over `lanes`.
#[tracing::instrument(skip_all, fields(tri_count = lanes.len()))]
pub(crate) fn build_quads(params: &QbvhParams, lanes: &[QuadLane]) -> Result<QuadBuild> {
    params.validate()?;
    check_capacity(lanes.len())?;
    if lanes.is_empty() {
        return Ok(QuadBuild {
            nodes: vec![QbvhNode::EMPTY],
            quads: Vec::new(),
            max_depth: 0,
        });
    }

    let started = Instant::now();
    let bboxes: Vec<BBox3f> = lanes
        .iter()
        .map(|l| {
            let mut b = BBox3f::from_points(l.vertices);
            b.expand_by_epsilon();
            b
        })
        .collect();

    let mut builder = Builder::new(params, LeafMode::Quads, &bboxes);
    builder.run();
    let quads = builder.swizzle(lanes)?;
    debug!(
        nodes = builder.nodes.len(),
        quads = quads.len(),
        max_depth = builder.max_depth,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "QBVH built"
    );
    Ok(QuadBuild {
        nodes: builder.nodes,
        quads,
        max_depth: builder.max_depth,
    })
}

/// Build an object-mode tree: each leaf holds exactly one index into
/// `bboxes`.
#[tracing::instrument(skip_all, fields(object_count = bboxes.len()))]
pub(crate) fn build_objects(params: &QbvhParams, bboxes: &[BBox3f]) -> Result<Vec<QbvhNode>> {
    params.validate()?;
    check_capacity(bboxes.len())?;
    if bboxes.is_empty() {
        return Ok(vec![QbvhNode::EMPTY]);
    }
    let mut builder = Builder::new(params, LeafMode::Objects, bboxes);
    builder.run();
    debug!(
        nodes = builder.nodes.len(),
        max_depth = builder.max_depth,
        "object QBVH built"
    );
    Ok(builder.nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lane(cx: f32, cy: f32, cz: f32, index: u32) -> QuadLane {
        QuadLane {
            vertices: [
                Vec3::new(cx - 0.5, cy - 0.5, cz),
                Vec3::new(cx + 0.5, cy - 0.5, cz),
                Vec3::new(cx, cy + 0.5, cz),
            ],
            mesh_index: 0,
            triangle_index: index,
        }
    }

    /// Every triangle index referenced by the quads, padding included.
    fn referenced(build: &QuadBuild) -> Vec<u32> {
        let mut seen: Vec<u32> = build
            .quads
            .iter()
            .flat_map(|q| q.triangle_index)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen
    }

    #[test]
    fn test_empty_tree() {
        let build = build_quads(&QbvhParams::default(), &[]).unwrap();
        assert_eq!(build.nodes.len(), 1);
        assert!(build.quads.is_empty());
        assert!((0..4).all(|s| build.nodes[0].child(s) == ChildRef::Empty));
    }

    #[test]
    fn test_single_triangle() {
        let build = build_quads(&QbvhParams::default(), &[make_lane(0.0, 0.0, 0.0, 0)]).unwrap();
        assert_eq!(build.nodes.len(), 1);
        assert_eq!(build.quads.len(), 1);
        assert_eq!(
            build.nodes[0].child(0),
            ChildRef::Leaf {
                first_quad: 0,
                quad_count: 1
            }
        );
        assert_eq!(build.quads[0].triangle_index, [0; 4]);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        let lanes: Vec<QuadLane> = (0..101)
            .map(|i| make_lane(i as f32 * 2.0, 0.0, 0.0, i))
            .collect();
        let build = build_quads(&QbvhParams::default(), &lanes).unwrap();
        assert!(build.nodes.len() > 1);
        assert_eq!(referenced(&build), (0..101).collect::<Vec<_>>());

        let root = build.nodes[0];
        let mut bbox = BBox3f::EMPTY;
        for slot in 0..4 {
            bbox.expand_by_box(&root.child_bbox(slot));
        }
        assert!(bbox.min.x < -0.5);
        assert!(bbox.max.x > 200.0);
    }

    #[test]
    fn test_degenerate_centroids() {
        let lanes: Vec<QuadLane> = (0..100).map(|i| make_lane(1.0, 1.0, 1.0, i)).collect();
        let build = build_quads(&QbvhParams::default(), &lanes).unwrap();
        assert_eq!(referenced(&build), (0..100).collect::<Vec<_>>());
        for node in &build.nodes {
            for slot in 0..4 {
                if let ChildRef::Leaf { quad_count, .. } = node.child(slot) {
                    assert!(quad_count <= 16);
                }
            }
        }
    }

    #[test]
    fn test_object_leaves_hold_one_object() {
        let bboxes: Vec<BBox3f> = (0..37)
            .map(|i| {
                let p = Vec3::new((i % 5) as f32, (i / 5) as f32, 0.0);
                BBox3f::new(p, p + Vec3::splat(0.5))
            })
            .collect();
        let nodes = build_objects(&QbvhParams::default(), &bboxes).unwrap();
        let mut objects = Vec::new();
        for node in &nodes {
            for slot in 0..4 {
                if let ChildRef::Leaf {
                    first_quad,
                    quad_count,
                } = node.child(slot)
                {
                    assert_eq!(quad_count, 1);
                    assert!(node.child_bbox(slot).contains_box(&bboxes[first_quad as usize]));
                    objects.push(first_quad);
                }
            }
        }
        objects.sort_unstable();
        assert_eq!(objects, (0..37).collect::<Vec<_>>());
    }

    #[test]
    fn test_node_estimate() {
        assert_eq!(estimate_node_count(0, 4), 1);
        assert_eq!(estimate_node_count(4, 4), 1);
        assert_eq!(estimate_node_count(64, 4), 4 + 1);
    }
}
