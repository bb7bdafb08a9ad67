//! Linear BVH builder over Morton-sorted centroids.

use super::build::{build_top_down, BuildArena, BuildPrimitive, ChildRanges};
use crate::util::{BBox3f, Vec3};

/// Morton grid resolution per axis (10 bits).
const MORTON_SCALE: f32 = 1024.0;

/// Spread the low 10 bits of `x` so they sit 3 places apart.
fn left_shift3(mut x: u32) -> u32 {
    if x == 1 << 10 {
        x -= 1;
    }
    x = (x | (x << 16)) & 0b0000_0011_0000_0000_0000_0000_1111_1111;
    x = (x | (x << 8)) & 0b0000_0011_0000_0000_1111_0000_0000_1111;
    x = (x | (x << 4)) & 0b0000_0011_0000_1100_0011_0000_1100_0011;
    x = (x | (x << 2)) & 0b0000_1001_0010_0100_1001_0010_0100_1001;
    x
}

/// 30-bit interleaved code of a point in the unit cube.
pub fn morton_encode3(v: Vec3) -> u32 {
    let scaled = (v.clamp(Vec3::ZERO, Vec3::ONE) * MORTON_SCALE).as_uvec3();
    (left_shift3(scaled.z) << 2) | (left_shift3(scaled.y) << 1) | left_shift3(scaled.x)
}

pub(super) fn build(prims: &mut [BuildPrimitive]) -> BuildArena {
    let mut centroid_bounds = BBox3f::EMPTY;
    for p in prims.iter() {
        centroid_bounds.expand_by_point(p.centroid());
    }
    let origin = centroid_bounds.min;
    let size = centroid_bounds.size();
    let inv_size = Vec3::select(size.cmpgt(Vec3::ZERO), size.recip(), Vec3::ZERO);

    let mut keyed: Vec<(u32, BuildPrimitive)> = prims
        .iter()
        .map(|p| (morton_encode3((p.centroid() - origin) * inv_size), *p))
        .collect();
    keyed.sort_unstable_by_key(|&(code, p)| (code, p.index));

    let mut codes = Vec::with_capacity(keyed.len());
    for (slot, (code, p)) in prims.iter_mut().zip(keyed) {
        *slot = p;
        codes.push(code);
    }

    build_top_down(prims, |_, range| {
        let (start, end) = (range.start, range.end);
        let (first, last) = (codes[start], codes[end - 1]);
        let mid = if first == last {
            (start + end) / 2
        } else {
            // Codes are sorted: everything above the highest differing bit
            // is shared, so that bit splits the range in two.
            let bit = 31 - (first ^ last).leading_zeros();
            start + codes[range].partition_point(|&c| c & (1 << bit) == 0)
        };
        ChildRanges::from_iter([start..mid, mid..end])
    })
}
