//! Indexed triangles and the scalar ray/triangle test.

use bytemuck::{Pod, Zeroable};

use crate::geom::Ray;
use crate::util::{BBox3f, Vec3};

/// Three vertex indices into a mesh's vertex array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Triangle {
    pub v: [u32; 3],
}

impl Triangle {
    #[inline]
    pub const fn new(v0: u32, v1: u32, v2: u32) -> Self {
        Self { v: [v0, v1, v2] }
    }

    /// Fetch the three corner positions from a vertex array.
    #[inline]
    pub fn positions(&self, vertices: &[Vec3]) -> [Vec3; 3] {
        [
            vertices[self.v[0] as usize],
            vertices[self.v[1] as usize],
            vertices[self.v[2] as usize],
        ]
    }

    /// Bounding box of the triangle.
    #[inline]
    pub fn world_bound(&self, vertices: &[Vec3]) -> BBox3f {
        BBox3f::from_points(self.positions(vertices))
    }
}

/// Moller-Trumbore test of `ray` against triangle `(p0, p1, p2)`.
///
/// Returns `(t, b1, b2)` when `t` lies strictly inside `(ray.mint, ray.maxt)`
/// and the barycentrics are non-negative. This is the reference the
/// four-lane test in `qbvh::quad` must agree with operation for operation.
#[inline]
pub fn intersect_triangle(ray: &Ray, p0: Vec3, p1: Vec3, p2: Vec3) -> Option<(f32, f32, f32)> {
    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let s1 = ray.d.cross(e2);
    let divisor = s1.dot(e1);
    if divisor == 0.0 {
        return None;
    }
    let inv_divisor = 1.0 / divisor;

    let dist = ray.o - p0;
    let b1 = dist.dot(s1) * inv_divisor;
    if b1 < 0.0 {
        return None;
    }

    let s2 = dist.cross(e1);
    let b2 = ray.d.dot(s2) * inv_divisor;
    if b2 < 0.0 {
        return None;
    }

    let b0 = 1.0 - b1 - b2;
    if b0 < 0.0 {
        return None;
    }

    let t = e2.dot(s2) * inv_divisor;
    if t > ray.mint && t < ray.maxt {
        Some((t, b1, b2))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> [Vec3; 3] {
        [Vec3::ZERO, Vec3::X, Vec3::Y]
    }

    #[test]
    fn test_hit_inside() {
        let [p0, p1, p2] = unit_triangle();
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z);
        let (t, b1, b2) = intersect_triangle(&ray, p0, p1, p2).unwrap();
        assert!((t - 1.0).abs() < 1e-6);
        assert!((b1 - 0.25).abs() < 1e-6);
        assert!((b2 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_miss_outside_and_behind() {
        let [p0, p1, p2] = unit_triangle();
        let outside = Ray::new(Vec3::new(0.8, 0.8, 1.0), Vec3::NEG_Z);
        assert!(intersect_triangle(&outside, p0, p1, p2).is_none());

        let behind = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::Z);
        assert!(intersect_triangle(&behind, p0, p1, p2).is_none());
    }

    #[test]
    fn test_interval_is_strict() {
        let [p0, p1, p2] = unit_triangle();
        let ray = Ray::with_bounds(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z, 0.0, 1.0);
        assert!(intersect_triangle(&ray, p0, p1, p2).is_none());
    }

    #[test]
    fn test_parallel_ray() {
        let [p0, p1, p2] = unit_triangle();
        let ray = Ray::new(Vec3::new(-1.0, 0.25, 0.0), Vec3::X);
        assert!(intersect_triangle(&ray, p0, p1, p2).is_none());
    }

    #[test]
    fn test_world_bound() {
        let verts = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 3.0, -1.0)];
        let b = Triangle::new(0, 1, 2).world_bound(&verts);
        assert_eq!(b.min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(b.max, Vec3::new(2.0, 3.0, 0.0));
    }
}
