//! N-ary top-down builder splitting on the axis of largest centroid
//! variance.
//!
//! Each range is cut into `tree_type` children by `log2(tree_type)` rounds
//! of binary splits. Centroids are kept doubled (`min + max`) so split
//! values compare without a division.

use std::ops::Range;

use smallvec::smallvec;

use super::build::{build_top_down, range_bbox, BuildArena, BuildPrimitive, ChildRanges};
use crate::core::BvhParams;
use crate::util::{partition, BBox3f, Vec3};

pub(super) fn build(params: &BvhParams, prims: &mut [BuildPrimitive]) -> BuildArena {
    let rounds = params.normalized_tree_type().trailing_zeros();
    build_top_down(prims, |prims, range| {
        let mut ranges: ChildRanges = smallvec![range];
        for _ in 0..rounds {
            let mut next = ChildRanges::new();
            for r in ranges {
                if r.len() < 2 {
                    next.push(r);
                } else {
                    let mid = split_in_two(params, prims, r.clone());
                    next.push(r.start..mid);
                    next.push(mid..r.end);
                }
            }
            ranges = next;
        }
        ranges
    })
}

#[inline]
fn doubled_centroid(p: &BuildPrimitive, axis: usize) -> f32 {
    p.bbox.min[axis] + p.bbox.max[axis]
}

/// Partition `range` in two and return the absolute middle index, which is
/// always strictly inside the range.
fn split_in_two(params: &BvhParams, prims: &mut [BuildPrimitive], range: Range<usize>) -> usize {
    let begin = range.start;
    let slice = &mut prims[range];
    let len = slice.len();

    let (axis, split) = if len == 2 {
        (0, (doubled_centroid(&slice[0], 0) + doubled_centroid(&slice[1], 0)) * 0.5)
    } else {
        let n = len as f32;
        let mut mean = Vec3::ZERO;
        for p in slice.iter() {
            mean += p.bbox.min + p.bbox.max;
        }
        mean /= n;
        let mut variance = Vec3::ZERO;
        for p in slice.iter() {
            let d = p.bbox.min + p.bbox.max - mean;
            variance += d * d;
        }
        let axis = if variance.x > variance.y && variance.x > variance.z {
            0
        } else if variance.y > variance.z {
            1
        } else {
            2
        };
        let split = if params.cost_samples > 1 {
            sampled_split(params, slice, axis)
        } else {
            mean[axis]
        };
        (axis, split)
    };

    let mid = partition(slice, |p| doubled_centroid(p, axis) < split);
    begin + mid.clamp(1, len - 1)
}

/// Best of `cost_samples` evenly spaced candidate planes under the
/// surface-area cost model.
fn sampled_split(params: &BvhParams, prims: &[BuildPrimitive], axis: usize) -> f32 {
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for p in prims {
        let c = doubled_centroid(p, axis);
        lo = lo.min(c);
        hi = hi.max(c);
    }
    let area = range_bbox(prims).surface_area();
    let inv_area = if area > 0.0 { 1.0 / area } else { 0.0 };

    let samples = params.cost_samples;
    let mut best_cost = f32::INFINITY;
    let mut best_split = (lo + hi) * 0.5;
    for k in 0..samples {
        let split = lo + (k + 1) as f32 * (hi - lo) / (samples + 1) as f32;
        let (mut below, mut above) = (BBox3f::EMPTY, BBox3f::EMPTY);
        let (mut n_below, mut n_above) = (0u32, 0u32);
        for p in prims {
            if doubled_centroid(p, axis) < split {
                below.expand_by_box(&p.bbox);
                n_below += 1;
            } else {
                above.expand_by_box(&p.bbox);
                n_above += 1;
            }
        }
        let empty_bonus = if n_below == 0 || n_above == 0 {
            params.empty_bonus
        } else {
            0.0
        };
        let p_below = below.surface_area() * inv_area;
        let p_above = above.surface_area() * inv_area;
        let cost = params.trav_cost
            + params.isect_cost
                * (1.0 - empty_bonus)
                * (p_below * n_below as f32 + p_above * n_above as f32);
        if cost < best_cost {
            best_cost = cost;
            best_split = split;
        }
    }
    best_split
}
