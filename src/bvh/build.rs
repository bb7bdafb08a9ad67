//! Builder front end: a temporary node arena filled top-down by one of
//! the split strategies, then flattened into a skip-index array.

use std::ops::Range;
use std::time::Instant;

use smallvec::SmallVec;
use tracing::debug;

use super::{binned, classic, morton, BvhArrayNode};
use crate::core::{BvhBuilderKind, BvhParams};
use crate::util::{BBox3f, Vec3};

/// A box to build over, tagged with the caller's primitive index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuildPrimitive {
    pub bbox: BBox3f,
    pub index: u32,
}

impl BuildPrimitive {
    #[inline]
    pub fn centroid(&self) -> Vec3 {
        self.bbox.center()
    }
}

/// Child ranges produced by one split step.
pub(super) type ChildRanges = SmallVec<[Range<usize>; 8]>;

#[derive(Clone, Debug)]
pub(crate) enum BuildNode {
    Leaf {
        prim: u32,
    },
    Interior {
        bbox: BBox3f,
        children: SmallVec<[u32; 8]>,
    },
}

/// Temporary tree; node 0 is the root when not empty.
#[derive(Clone, Debug, Default)]
pub(crate) struct BuildArena {
    pub nodes: Vec<BuildNode>,
    pub max_depth: usize,
}

impl BuildArena {
    fn reserve(&mut self) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(BuildNode::Leaf { prim: u32::MAX });
        index
    }
}

pub(super) fn range_bbox(prims: &[BuildPrimitive]) -> BBox3f {
    let mut bbox = BBox3f::EMPTY;
    for p in prims {
        bbox.expand_by_box(&p.bbox);
    }
    bbox
}

/// Fill an arena top-down. `split` must cut any range of two or more
/// primitives into at least two non-empty ranges, reordering `prims` as
/// needed. Single primitives become leaves.
pub(super) fn build_top_down<S>(prims: &mut [BuildPrimitive], mut split: S) -> BuildArena
where
    S: FnMut(&mut [BuildPrimitive], Range<usize>) -> ChildRanges,
{
    let mut arena = BuildArena::default();
    if prims.is_empty() {
        return arena;
    }
    let root = arena.reserve();
    let mut stack = vec![(root, 0..prims.len(), 0usize)];
    while let Some((node, range, depth)) = stack.pop() {
        arena.max_depth = arena.max_depth.max(depth);
        if range.len() == 1 {
            arena.nodes[node as usize] = BuildNode::Leaf {
                prim: prims[range.start].index,
            };
            continue;
        }
        let bbox = range_bbox(&prims[range.clone()]);
        let mut children = SmallVec::new();
        for child_range in split(prims, range) {
            let child = arena.reserve();
            children.push(child);
            stack.push((child, child_range, depth + 1));
        }
        arena.nodes[node as usize] = BuildNode::Interior { bbox, children };
    }
    arena
}

/// Build an arena over `prims` with the configured strategy.
#[tracing::instrument(skip_all, fields(prim_count = prims.len(), builder = %params.builder))]
pub(crate) fn build_arena(params: &BvhParams, prims: &mut [BuildPrimitive]) -> BuildArena {
    let started = Instant::now();
    let arena = match params.builder {
        BvhBuilderKind::Classic => classic::build(params, prims),
        BvhBuilderKind::BinnedSah => binned::build(prims),
        BvhBuilderKind::Morton => morton::build(prims),
    };
    debug!(
        nodes = arena.nodes.len(),
        max_depth = arena.max_depth,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "BVH arena built"
    );
    arena
}

/// Depth-first flattening. `leaf_payload` maps a primitive index to the
/// payload stored in its leaf.
pub(crate) fn flatten<F>(arena: &BuildArena, mut leaf_payload: F) -> Vec<BvhArrayNode>
where
    F: FnMut(u32) -> [u32; 6],
{
    enum Visit {
        Enter(u32),
        Exit(usize),
    }

    let mut out = Vec::with_capacity(arena.nodes.len());
    if arena.nodes.is_empty() {
        return out;
    }
    let mut stack = vec![Visit::Enter(0)];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(index) => match &arena.nodes[index as usize] {
                BuildNode::Leaf { prim } => {
                    let position = out.len() as u32;
                    out.push(BvhArrayNode::leaf(leaf_payload(*prim), position));
                }
                BuildNode::Interior { bbox, children } => {
                    let position = out.len();
                    out.push(BvhArrayNode::interior(bbox, 0));
                    stack.push(Visit::Exit(position));
                    for &child in children.iter().rev() {
                        stack.push(Visit::Enter(child));
                    }
                }
            },
            Visit::Exit(position) => out[position].node_data = out.len() as u32,
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Boxes on a jittered 3D lattice.
    pub(crate) fn lattice(n: u32) -> Vec<BuildPrimitive> {
        (0..n)
            .map(|i| {
                let p = Vec3::new(
                    (i % 7) as f32 * 1.5,
                    ((i / 7) % 5) as f32 * 2.0 + (i % 3) as f32 * 0.1,
                    (i / 35) as f32,
                );
                BuildPrimitive {
                    bbox: BBox3f::new(p, p + Vec3::splat(0.4)),
                    index: i,
                }
            })
            .collect()
    }

    /// Check that each flat node array is a valid skip-index tree holding
    /// every primitive exactly once.
    pub(crate) fn check_flat(nodes: &[BvhArrayNode], prims: &[BuildPrimitive]) {
        let mut seen: Vec<u32> = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            let skip = node.skip_index() as usize;
            assert!(skip > i && skip <= nodes.len());
            if node.is_leaf() {
                assert_eq!(skip, i + 1);
                seen.push(node.payload[0]);
            } else {
                let bbox = node.bbox();
                for inner in &nodes[i + 1..skip] {
                    if inner.is_leaf() {
                        let prim = prims.iter().find(|p| p.index == inner.payload[0]).unwrap();
                        assert!(bbox.contains_box(&prim.bbox));
                    } else {
                        assert!(bbox.contains_box(&inner.bbox()));
                    }
                }
            }
        }
        assert_eq!(nodes[0].skip_index() as usize, nodes.len());
        seen.sort_unstable();
        let mut expected: Vec<u32> = prims.iter().map(|p| p.index).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_every_builder_produces_valid_tree() {
        for builder in [
            BvhBuilderKind::Classic,
            BvhBuilderKind::BinnedSah,
            BvhBuilderKind::Morton,
        ] {
            for tree_type in [2, 4, 8] {
                let params = BvhParams {
                    builder,
                    tree_type,
                    ..Default::default()
                };
                let original = lattice(150);
                let mut prims = original.clone();
                let arena = build_arena(&params, &mut prims);
                let flat = flatten(&arena, |p| [p, 0, 0, 0, 0, 0]);
                check_flat(&flat, &original);
            }
        }
    }

    #[test]
    fn test_empty_and_single() {
        let params = BvhParams::default();
        let arena = build_arena(&params, &mut []);
        assert!(flatten(&arena, |p| [p, 0, 0, 0, 0, 0]).is_empty());

        let mut one = lattice(1);
        let arena = build_arena(&params, &mut one);
        let flat = flatten(&arena, |p| [p, 0, 0, 0, 0, 0]);
        assert_eq!(flat.len(), 1);
        assert!(flat[0].is_leaf());
        assert_eq!(flat[0].skip_index(), 1);
    }

    #[test]
    fn test_coincident_boxes() {
        let p = Vec3::splat(2.0);
        let original: Vec<BuildPrimitive> = (0..40)
            .map(|index| BuildPrimitive {
                bbox: BBox3f::new(p, p + Vec3::ONE),
                index,
            })
            .collect();
        for builder in [
            BvhBuilderKind::Classic,
            BvhBuilderKind::BinnedSah,
            BvhBuilderKind::Morton,
        ] {
            let params = BvhParams {
                builder,
                cost_samples: 8,
                ..Default::default()
            };
            let mut prims = original.clone();
            let arena = build_arena(&params, &mut prims);
            check_flat(&flatten(&arena, |p| [p, 0, 0, 0, 0, 0]), &original);
        }
    }
}
