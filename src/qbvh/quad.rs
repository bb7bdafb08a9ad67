//! Four triangles tested against one ray in a single SIMD pass.

use bytemuck::{Pod, Zeroable};

use crate::geom::{Ray, RayHit};
use crate::util::{Vec3, Vec4};

/// A ray broadcast across four lanes, with the per-axis direction sign
/// precomputed for the slab test.
#[derive(Clone, Copy, Debug)]
pub struct QuadRay {
    pub o: [Vec4; 3],
    pub d: [Vec4; 3],
    pub inv_d: [Vec4; 3],
    /// 1 where the inverse direction is negative.
    pub sign: [usize; 3],
    pub mint: Vec4,
    pub maxt: Vec4,
}

impl QuadRay {
    #[inline]
    pub fn new(ray: &Ray) -> Self {
        let inv = ray.d.recip();
        Self {
            o: [
                Vec4::splat(ray.o.x),
                Vec4::splat(ray.o.y),
                Vec4::splat(ray.o.z),
            ],
            d: [
                Vec4::splat(ray.d.x),
                Vec4::splat(ray.d.y),
                Vec4::splat(ray.d.z),
            ],
            inv_d: [Vec4::splat(inv.x), Vec4::splat(inv.y), Vec4::splat(inv.z)],
            sign: [
                usize::from(inv.x < 0.0),
                usize::from(inv.y < 0.0),
                usize::from(inv.z < 0.0),
            ],
            mint: Vec4::splat(ray.mint),
            maxt: Vec4::splat(ray.maxt),
        }
    }

    /// Pick up a shortened `maxt` after a hit.
    #[inline]
    pub fn set_maxt(&mut self, maxt: f32) {
        self.maxt = Vec4::splat(maxt);
    }
}

/// One triangle as handed to [`QuadTriangle::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadLane {
    pub vertices: [Vec3; 3],
    pub mesh_index: u32,
    pub triangle_index: u32,
}

/// Four triangles stored as origin and two edges per lane.
///
/// Lanes past the end of a leaf repeat a real triangle of the same leaf, so
/// every lane always names a valid `(mesh, triangle)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C, align(16))]
pub struct QuadTriangle {
    /// `origin[axis][lane]`
    pub origin: [[f32; 4]; 3],
    pub edge1: [[f32; 4]; 3],
    pub edge2: [[f32; 4]; 3],
    pub mesh_index: [u32; 4],
    pub triangle_index: [u32; 4],
}

impl QuadTriangle {
    pub fn new(lanes: [&QuadLane; 4]) -> Self {
        let mut q = Self::zeroed();
        for (lane, tri) in lanes.iter().enumerate() {
            let [p0, p1, p2] = tri.vertices;
            let e1 = p1 - p0;
            let e2 = p2 - p0;
            for axis in 0..3 {
                q.origin[axis][lane] = p0[axis];
                q.edge1[axis][lane] = e1[axis];
                q.edge2[axis][lane] = e2[axis];
            }
            q.mesh_index[lane] = tri.mesh_index;
            q.triangle_index[lane] = tri.triangle_index;
        }
        q
    }

    #[inline]
    fn load(v: &[[f32; 4]; 3]) -> [Vec4; 3] {
        [
            Vec4::from_array(v[0]),
            Vec4::from_array(v[1]),
            Vec4::from_array(v[2]),
        ]
    }

    /// Test all four lanes and keep the nearest hit.
    ///
    /// Lanes are taken in order 0..3 and only when strictly nearer than the
    /// current `ray.maxt`, which each accepted lane shrinks. Returns true
    /// when `hit` changed.
    #[inline]
    pub fn intersect(&self, qray: &QuadRay, ray: &mut Ray, hit: &mut RayHit) -> bool {
        let [ox, oy, oz] = qray.o;
        let [dx, dy, dz] = qray.d;
        let [px, py, pz] = Self::load(&self.origin);
        let [e1x, e1y, e1z] = Self::load(&self.edge1);
        let [e2x, e2y, e2z] = Self::load(&self.edge2);

        // s1 = d x e2
        let s1x = dy * e2z - e2y * dz;
        let s1y = dz * e2x - e2z * dx;
        let s1z = dx * e2y - e2x * dy;
        let divisor = s1x * e1x + s1y * e1y + s1z * e1z;
        let inv_divisor = Vec4::ONE / divisor;

        let distx = ox - px;
        let disty = oy - py;
        let distz = oz - pz;
        let b1 = (distx * s1x + disty * s1y + distz * s1z) * inv_divisor;

        // s2 = dist x e1
        let s2x = disty * e1z - e1y * distz;
        let s2y = distz * e1x - e1z * distx;
        let s2z = distx * e1y - e1x * disty;
        let b2 = (dx * s2x + dy * s2y + dz * s2z) * inv_divisor;
        let b0 = Vec4::ONE - b1 - b2;
        let t = (e2x * s2x + e2y * s2y + e2z * s2z) * inv_divisor;

        let valid = divisor.cmpne(Vec4::ZERO)
            & b1.cmpge(Vec4::ZERO)
            & b2.cmpge(Vec4::ZERO)
            & b0.cmpge(Vec4::ZERO)
            & t.cmpgt(Vec4::splat(ray.mint))
            & t.cmplt(Vec4::splat(ray.maxt));
        let mask = valid.bitmask();
        if mask == 0 {
            return false;
        }

        let t = t.to_array();
        let b1 = b1.to_array();
        let b2 = b2.to_array();
        let mut found = false;
        for lane in 0..4 {
            if mask & (1 << lane) != 0 && t[lane] < ray.maxt {
                ray.maxt = t[lane];
                hit.t = t[lane];
                hit.b1 = b1[lane];
                hit.b2 = b2[lane];
                hit.mesh_index = self.mesh_index[lane];
                hit.triangle_index = self.triangle_index[lane];
                found = true;
            }
        }
        found
    }

    /// Lane-by-lane version of [`intersect`](Self::intersect) with the same
    /// operation order.
    pub fn intersect_scalar(&self, ray: &mut Ray, hit: &mut RayHit) -> bool {
        let mut found = false;
        for lane in 0..4 {
            let e1 = Vec3::new(self.edge1[0][lane], self.edge1[1][lane], self.edge1[2][lane]);
            let e2 = Vec3::new(self.edge2[0][lane], self.edge2[1][lane], self.edge2[2][lane]);
            let p0 = Vec3::new(self.origin[0][lane], self.origin[1][lane], self.origin[2][lane]);

            let s1 = ray.d.cross(e2);
            let divisor = s1.dot(e1);
            if divisor == 0.0 {
                continue;
            }
            let inv_divisor = 1.0 / divisor;
            let dist = ray.o - p0;
            let b1 = dist.dot(s1) * inv_divisor;
            let s2 = dist.cross(e1);
            let b2 = ray.d.dot(s2) * inv_divisor;
            let b0 = 1.0 - b1 - b2;
            let t = e2.dot(s2) * inv_divisor;
            if b1 >= 0.0 && b2 >= 0.0 && b0 >= 0.0 && t > ray.mint && t < ray.maxt {
                ray.maxt = t;
                hit.t = t;
                hit.b1 = b1;
                hit.b2 = b2;
                hit.mesh_index = self.mesh_index[lane];
                hit.triangle_index = self.triangle_index[lane];
                found = true;
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(z: f32, x: f32, tri: u32) -> QuadLane {
        QuadLane {
            vertices: [
                Vec3::new(x - 1.0, -1.0, z),
                Vec3::new(x + 1.0, -1.0, z),
                Vec3::new(x, 1.0, z),
            ],
            mesh_index: 0,
            triangle_index: tri,
        }
    }

    #[test]
    fn test_quad_layout() {
        assert_eq!(std::mem::size_of::<QuadTriangle>(), 176);
        assert_eq!(std::mem::align_of::<QuadTriangle>(), 16);
    }

    #[test]
    fn test_nearest_lane_wins() {
        let lanes = [lane(5.0, 0.0, 0), lane(3.0, 0.0, 1), lane(4.0, 0.0, 2), lane(2.0, 9.0, 3)];
        let quad = QuadTriangle::new([&lanes[0], &lanes[1], &lanes[2], &lanes[3]]);

        let mut ray = Ray::new(Vec3::new(0.0, 0.0, 0.0), Vec3::Z);
        let qray = QuadRay::new(&ray);
        let mut hit = RayHit::MISS;
        assert!(quad.intersect(&qray, &mut ray, &mut hit));
        assert_eq!(hit.triangle_index, 1);
        assert_eq!(hit.t, 3.0);
        assert_eq!(ray.maxt, 3.0);
    }

    #[test]
    fn test_matches_scalar() {
        let lanes = [
            lane(5.0, 0.0, 0),
            lane(3.0, 0.3, 1),
            lane(4.0, -0.2, 2),
            QuadLane {
                vertices: [Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)],
                mesh_index: 1,
                triangle_index: 3,
            },
        ];
        let quad = QuadTriangle::new([&lanes[0], &lanes[1], &lanes[2], &lanes[3]]);
        for dir in [
            Vec3::new(0.1, 0.05, 1.0),
            Vec3::new(-0.13, 0.2, 1.0),
            Vec3::new(0.0, 0.0, -1.0),
        ] {
            let mut simd_ray = Ray::new(Vec3::new(0.0, 0.1, 0.5), dir);
            let mut scalar_ray = simd_ray;
            let mut simd_hit = RayHit::MISS;
            let mut scalar_hit = RayHit::MISS;
            let a = quad.intersect(&QuadRay::new(&simd_ray), &mut simd_ray, &mut simd_hit);
            let b = quad.intersect_scalar(&mut scalar_ray, &mut scalar_hit);
            assert_eq!(a, b);
            assert_eq!(simd_hit, scalar_hit);
            assert_eq!(simd_ray.maxt, scalar_ray.maxt);
        }
    }

    #[test]
    fn test_degenerate_lane_never_hits() {
        let flat = QuadLane {
            vertices: [Vec3::ZERO, Vec3::ZERO, Vec3::ZERO],
            mesh_index: 0,
            triangle_index: 0,
        };
        let quad = QuadTriangle::new([&flat; 4]);
        let mut ray = Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z);
        let mut hit = RayHit::MISS;
        assert!(!quad.intersect(&QuadRay::new(&ray), &mut ray, &mut hit));
        assert!(hit.is_miss());
    }
}
