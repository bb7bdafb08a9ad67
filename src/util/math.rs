//! Math type re-exports and bounding-box utilities.
//!
//! This module re-exports types from `glam` and provides the axis-aligned
//! box and numeric epsilon helpers shared by every builder.

// Re-export glam types
pub use glam::{
    // Single precision vectors
    Vec2, Vec3, Vec3A, Vec4,
    // Integer vectors
    UVec3, UVec4,
    // Matrices
    Mat3, Mat4,
    // Quaternions
    Quat,
};

use bytemuck::{Pod, Zeroable};
use std::fmt;

use crate::geom::Ray;

/// Smallest epsilon returned by [`machine_epsilon`].
pub const EPSILON_MIN: f32 = 1e-9;

/// Largest epsilon returned by [`machine_epsilon`].
pub const EPSILON_MAX: f32 = 1e-1;

/// Distance, in ulps, between a value and its epsilon neighbour.
pub const EPSILON_ULPS: u32 = 0x80;

/// Value-relative epsilon: the gap to the float `EPSILON_ULPS` steps
/// above `|value|`, clamped to `[EPSILON_MIN, EPSILON_MAX]`.
#[inline]
pub fn machine_epsilon(value: f32) -> f32 {
    let a = value.abs();
    if !a.is_finite() {
        return EPSILON_MAX;
    }
    let next = f32::from_bits(a.to_bits() + EPSILON_ULPS);
    if !next.is_finite() {
        return EPSILON_MAX;
    }
    (next - a).clamp(EPSILON_MIN, EPSILON_MAX)
}

/// Largest [`machine_epsilon`] over the components of a point.
#[inline]
pub fn machine_epsilon_vec(v: Vec3) -> f32 {
    machine_epsilon(v.x)
        .max(machine_epsilon(v.y))
        .max(machine_epsilon(v.z))
}

/// 3D bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BBox3f {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox3f {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Create the tightest box around a set of points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_by_point(p);
        }
        b
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Union of two boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        let mut b = *self;
        b.expand_by_box(other);
        b
    }

    /// Grow every face outward by `delta`.
    #[inline]
    pub fn expand(&mut self, delta: f32) {
        if !self.is_empty() {
            self.min -= Vec3::splat(delta);
            self.max += Vec3::splat(delta);
        }
    }

    /// Grow the box by its own [`machine_epsilon_vec`] margin.
    #[inline]
    pub fn expand_by_epsilon(&mut self) {
        if !self.is_empty() {
            let e = machine_epsilon_vec(self.min).max(machine_epsilon_vec(self.max));
            self.expand(e);
        }
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area; zero for empty boxes.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Axis (0, 1 or 2) with the largest extent.
    #[inline]
    pub fn maximum_extent(&self) -> usize {
        let d = self.size();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Check whether a point lies inside (boundary included).
    #[inline]
    pub fn inside(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Check whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains_box(&self, other: &Self) -> bool {
        other.is_empty() || (self.inside(other.min) && self.inside(other.max))
    }

    /// Box around the 8 transformed corners.
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut b = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            b.expand_by_point(m.transform_point3(corner));
        }
        b
    }

    /// Scalar slab test against `[ray.mint, ray.maxt]`, bounds inclusive.
    #[inline]
    pub fn intersect_p(&self, ray: &Ray) -> bool {
        let mut t0 = ray.mint;
        let mut t1 = ray.maxt;
        for axis in 0..3 {
            let inv = 1.0 / ray.d[axis];
            let mut t_near = (self.min[axis] - ray.o[axis]) * inv;
            let mut t_far = (self.max[axis] - ray.o[axis]) * inv;
            if t_near > t_far {
                std::mem::swap(&mut t_near, &mut t_far);
            }
            t0 = t0.max(t_near);
            t1 = t1.min(t_far);
            if t0 > t1 {
                return false;
            }
        }
        true
    }
}

impl Default for BBox3f {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3f {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox3f({:?} - {:?})", self.min, self.max)
    }
}
