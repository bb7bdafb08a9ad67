//! Binary builder driven by binned SAH over all three axes.

use std::ops::Range;

use smallvec::smallvec;

use super::build::{build_top_down, BuildArena, BuildPrimitive, ChildRanges};
use crate::util::{partition, BBox3f};

/// Number of SAH bins per axis.
const NUM_BINS: usize = 12;

#[derive(Clone, Copy)]
struct Bin {
    bounds: BBox3f,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: BBox3f::EMPTY,
        count: 0,
    };
}

pub(super) fn build(prims: &mut [BuildPrimitive]) -> BuildArena {
    build_top_down(prims, split)
}

fn split(prims: &mut [BuildPrimitive], range: Range<usize>) -> ChildRanges {
    let (start, end) = (range.start, range.end);
    let slice = &mut prims[range];

    let mut centroid_bounds = BBox3f::EMPTY;
    for p in slice.iter() {
        centroid_bounds.expand_by_point(p.centroid());
    }

    let mid = match find_best_split(slice, &centroid_bounds) {
        Some((axis, pos)) => start + partition(slice, |p| p.centroid()[axis] < pos),
        None => start,
    };
    // Degenerate centroids or an empty side: split in the middle
    let mid = if mid == start || mid == end {
        (start + end) / 2
    } else {
        mid
    };
    smallvec![start..mid, mid..end]
}

/// SAH binned split search across all 3 axes.
/// Returns `(axis, position)`, or `None` when every axis is degenerate.
fn find_best_split(prims: &[BuildPrimitive], centroid_bounds: &BBox3f) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    let mut best_cost = f32::INFINITY;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;
        for p in prims {
            let bin_id = ((p.centroid()[axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&p.bbox);
            bin.count += 1;
        }

        // Prefix areas and counts from the left
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = BBox3f::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.surface_area();
            left_count[i] = sweep_count;
        }

        // Sweep from the right and evaluate
        sweep = BBox3f::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = left_count[i - 1] as f32 * left_area[i - 1]
                + sweep_count as f32 * sweep.surface_area();
            if cost < best_cost {
                best_cost = cost;
                best = Some((
                    axis,
                    centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent,
                ));
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec3;

    fn make_prim(cx: f32, cy: f32, cz: f32, index: u32) -> BuildPrimitive {
        let c = Vec3::new(cx, cy, cz);
        BuildPrimitive {
            bbox: BBox3f::new(c - Vec3::splat(0.5), c + Vec3::splat(0.5)),
            index,
        }
    }

    #[test]
    fn test_splits_along_spread_axis() {
        let mut prims: Vec<BuildPrimitive> =
            (0..100).map(|i| make_prim(0.0, i as f32 * 2.0, 0.0, i)).collect();
        let ranges = split(&mut prims, 0..100);
        assert_eq!(ranges.len(), 2);
        let max_left = prims[ranges[0].clone()]
            .iter()
            .map(|p| p.centroid().y)
            .fold(f32::NEG_INFINITY, f32::max);
        let min_right = prims[ranges[1].clone()]
            .iter()
            .map(|p| p.centroid().y)
            .fold(f32::INFINITY, f32::min);
        assert!(max_left < min_right);
    }

    #[test]
    fn test_degenerate_falls_back_to_median() {
        let mut prims: Vec<BuildPrimitive> = (0..10).map(|i| make_prim(1.0, 1.0, 1.0, i)).collect();
        let ranges = split(&mut prims, 0..10);
        assert_eq!(ranges.as_slice(), &[0..5, 5..10]);
    }
}
