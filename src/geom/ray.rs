//! Rays and ray hits.

use bytemuck::{Pod, Zeroable};

use crate::util::{machine_epsilon_vec, Mat4, Vec3};

/// A ray with a parametric validity interval `[mint, maxt]` and a time
/// value used to sample motion blur.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Origin.
    pub o: Vec3,
    /// Direction (not required to be normalized).
    pub d: Vec3,
    pub mint: f32,
    pub maxt: f32,
    pub time: f32,
}

impl Ray {
    /// Create a ray starting an epsilon away from its origin, unbounded
    /// in the forward direction.
    #[inline]
    pub fn new(o: Vec3, d: Vec3) -> Self {
        Self {
            o,
            d,
            mint: machine_epsilon_vec(o),
            maxt: f32::INFINITY,
            time: 0.0,
        }
    }

    /// Create a ray with an explicit interval.
    #[inline]
    pub fn with_bounds(o: Vec3, d: Vec3, mint: f32, maxt: f32) -> Self {
        Self {
            o,
            d,
            mint,
            maxt,
            time: 0.0,
        }
    }

    /// Same ray at another time.
    #[inline]
    pub fn at_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    /// Point at parameter `t`.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.o + self.d * t
    }

    /// Ray expressed in another frame. The parametric interval is kept:
    /// an affine map preserves `t`.
    #[inline]
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self {
            o: m.transform_point3(self.o),
            d: m.transform_vector3(self.d),
            ..*self
        }
    }
}

/// Nearest intersection found along a ray.
///
/// A miss is a sentinel state (`mesh_index == u32::MAX`), never an error.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RayHit {
    pub t: f32,
    pub b1: f32,
    pub b2: f32,
    pub mesh_index: u32,
    pub triangle_index: u32,
}

impl RayHit {
    /// Sentinel for "no intersection".
    pub const MISS: Self = Self {
        t: f32::INFINITY,
        b1: 0.0,
        b2: 0.0,
        mesh_index: u32::MAX,
        triangle_index: u32::MAX,
    };

    #[inline]
    pub fn is_miss(&self) -> bool {
        self.mesh_index == u32::MAX
    }

    /// Barycentric weight of the first vertex.
    #[inline]
    pub fn b0(&self) -> f32 {
        1.0 - self.b1 - self.b2
    }
}

impl Default for RayHit {
    fn default() -> Self {
        Self::MISS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_defaults() {
        let r = Ray::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        assert!(r.mint > 0.0);
        assert!(r.maxt.is_infinite());
        assert_eq!(r.at(2.0), Vec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn test_transformed_keeps_parameter() {
        let r = Ray::with_bounds(Vec3::ZERO, Vec3::X, 0.0, 10.0);
        let m = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            crate::util::Quat::from_rotation_y(0.3),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let tr = r.transformed(&m);
        assert_eq!(tr.maxt, 10.0);
        let p = m.transform_point3(r.at(4.0));
        assert!((tr.at(4.0) - p).length() < 1e-4);
    }

    #[test]
    fn test_miss_sentinel() {
        let h = RayHit::default();
        assert!(h.is_miss());
        assert_eq!(std::mem::size_of::<RayHit>(), 20);
    }
}
