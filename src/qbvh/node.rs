//! Four-wide BVH nodes and the child reference encoding.

use bytemuck::{Pod, Zeroable};

use super::QuadRay;
use crate::geom::Ray;
use crate::util::{BBox3f, Vec3, Vec4};

const LEAF_FLAG: u32 = 0x8000_0000;
const LEAF_COUNT_SHIFT: u32 = 27;
const LEAF_COUNT_MASK: u32 = 0xf;
const LEAF_INDEX_MASK: u32 = 0x07ff_ffff;

/// Raw code of an unused child slot.
pub const EMPTY_CHILD: i32 = -1;

/// Most quads a single leaf can reference.
pub const MAX_LEAF_QUADS: u32 = LEAF_COUNT_MASK + 1;

/// Largest first-quad index a leaf can encode. One below the index mask so
/// that a leaf code never collides with [`EMPTY_CHILD`].
pub const MAX_QUAD_INDEX: u32 = LEAF_INDEX_MASK - 1;

/// Decoded child slot of a [`QbvhNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildRef {
    Empty,
    /// `quad_count` consecutive quads starting at `first_quad`.
    Leaf { first_quad: u32, quad_count: u32 },
    /// Index of another node.
    Interior(u32),
}

impl ChildRef {
    /// Pack into the 32-bit slot code.
    ///
    /// Leaf: sign bit set, 4 bits of `quad_count - 1`, 27 bits of
    /// `first_quad`. Interior: the non-negative node index.
    #[inline]
    pub const fn encode(self) -> i32 {
        match self {
            Self::Empty => EMPTY_CHILD,
            Self::Leaf {
                first_quad,
                quad_count,
            } => {
                (LEAF_FLAG
                    | (((quad_count - 1) & LEAF_COUNT_MASK) << LEAF_COUNT_SHIFT)
                    | (first_quad & LEAF_INDEX_MASK)) as i32
            }
            Self::Interior(index) => index as i32,
        }
    }

    #[inline]
    pub const fn decode(code: i32) -> Self {
        if code == EMPTY_CHILD {
            Self::Empty
        } else if code < 0 {
            let bits = code as u32;
            Self::Leaf {
                first_quad: bits & LEAF_INDEX_MASK,
                quad_count: ((bits >> LEAF_COUNT_SHIFT) & LEAF_COUNT_MASK) + 1,
            }
        } else {
            Self::Interior(code as u32)
        }
    }
}

/// A node with four child boxes stored lane-wise, so one SIMD test covers
/// all children.
///
/// `bboxes[corner][axis][lane]`: corner 0 is the minimum, 1 the maximum.
/// Empty slots keep an inverted box and can never be hit.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C, align(16))]
pub struct QbvhNode {
    pub bboxes: [[[f32; 4]; 3]; 2],
    pub children: [i32; 4],
}

impl QbvhNode {
    /// Node with four empty slots.
    pub const EMPTY: Self = Self {
        bboxes: [[[f32::INFINITY; 4]; 3], [[f32::NEG_INFINITY; 4]; 3]],
        children: [EMPTY_CHILD; 4],
    };

    #[inline]
    pub fn child(&self, slot: usize) -> ChildRef {
        ChildRef::decode(self.children[slot])
    }

    #[inline]
    pub fn set_child(&mut self, slot: usize, child: ChildRef) {
        self.children[slot] = child.encode();
    }

    #[inline]
    pub fn is_leaf_slot(&self, slot: usize) -> bool {
        matches!(self.child(slot), ChildRef::Leaf { .. })
    }

    pub fn child_bbox(&self, slot: usize) -> BBox3f {
        let b = &self.bboxes;
        BBox3f::new(
            Vec3::new(b[0][0][slot], b[0][1][slot], b[0][2][slot]),
            Vec3::new(b[1][0][slot], b[1][1][slot], b[1][2][slot]),
        )
    }

    pub fn set_child_bbox(&mut self, slot: usize, bbox: &BBox3f) {
        for axis in 0..3 {
            self.bboxes[0][axis][slot] = bbox.min[axis];
            self.bboxes[1][axis][slot] = bbox.max[axis];
        }
    }

    /// Slab test of the four child boxes. Bit `i` of the result is set when
    /// child `i` overlaps `[ray.mint, ray.maxt]`.
    #[inline]
    pub fn bbox_intersect(&self, ray: &QuadRay) -> u32 {
        let mut t_min = ray.mint;
        let mut t_max = ray.maxt;
        for axis in 0..3 {
            let sign = ray.sign[axis];
            let near = Vec4::from_array(self.bboxes[sign][axis]);
            let far = Vec4::from_array(self.bboxes[1 - sign][axis]);
            t_min = t_min.max((near - ray.o[axis]) * ray.inv_d[axis]);
            t_max = t_max.min((far - ray.o[axis]) * ray.inv_d[axis]);
        }
        t_max.cmpge(t_min).bitmask()
    }

    /// One-lane-at-a-time version of [`bbox_intersect`](Self::bbox_intersect)
    /// with the same operation order.
    pub fn bbox_intersect_scalar(&self, ray: &Ray) -> u32 {
        let inv_d = ray.d.recip();
        let mut mask = 0;
        for lane in 0..4 {
            let mut t_min = ray.mint;
            let mut t_max = ray.maxt;
            for axis in 0..3 {
                let sign = usize::from(inv_d[axis] < 0.0);
                let near = self.bboxes[sign][axis][lane];
                let far = self.bboxes[1 - sign][axis][lane];
                t_min = t_min.max((near - ray.o[axis]) * inv_d[axis]);
                t_max = t_max.min((far - ray.o[axis]) * inv_d[axis]);
            }
            if t_max >= t_min {
                mask |= 1 << lane;
            }
        }
        mask
    }
}

impl Default for QbvhNode {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_layout() {
        assert_eq!(std::mem::size_of::<QbvhNode>(), 112);
        assert_eq!(std::mem::align_of::<QbvhNode>(), 16);
    }

    #[test]
    fn test_child_encoding() {
        assert_eq!(ChildRef::Empty.encode(), -1);
        assert_eq!(ChildRef::decode(-1), ChildRef::Empty);
        assert_eq!(ChildRef::Interior(7).encode(), 7);

        let leaf = ChildRef::Leaf {
            first_quad: 12345,
            quad_count: 3,
        };
        let code = leaf.encode();
        assert!(code < 0);
        assert_eq!(code as u32, 0x8000_0000 | (2 << 27) | 12345);
        assert_eq!(ChildRef::decode(code), leaf);
    }

    #[test]
    fn test_child_encoding_limits() {
        let leaf = ChildRef::Leaf {
            first_quad: MAX_QUAD_INDEX,
            quad_count: MAX_LEAF_QUADS,
        };
        assert_ne!(leaf.encode(), EMPTY_CHILD);
        assert_eq!(ChildRef::decode(leaf.encode()), leaf);

        let single = ChildRef::Leaf {
            first_quad: 0,
            quad_count: 1,
        };
        assert_eq!(single.encode() as u32, 0x8000_0000);
        assert_eq!(ChildRef::decode(single.encode()), single);
    }

    #[test]
    fn test_bbox_intersect_matches_scalar() {
        let mut node = QbvhNode::EMPTY;
        node.set_child_bbox(0, &BBox3f::new(Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 5.0)));
        node.set_child_bbox(1, &BBox3f::new(Vec3::new(3.0, 3.0, 4.0), Vec3::new(4.0, 4.0, 5.0)));
        node.set_child_bbox(2, &BBox3f::new(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, -4.0)));
        assert_eq!(node.child_bbox(1).min, Vec3::new(3.0, 3.0, 4.0));

        let rays = [
            Ray::new(Vec3::new(0.1, 0.2, 0.0), Vec3::new(0.01, 0.02, 1.0)),
            Ray::new(Vec3::new(0.1, 0.2, 0.0), Vec3::new(0.01, 0.02, -1.0)),
            Ray::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.75, 0.75, 1.0)),
        ];
        let expected = [0b0001, 0b0100, 0b0010];
        for (ray, expected) in rays.iter().zip(expected) {
            let simd = node.bbox_intersect(&QuadRay::new(ray));
            assert_eq!(simd, node.bbox_intersect_scalar(ray));
            assert_eq!(simd, expected);
        }
    }

    #[test]
    fn test_bbox_intersect_respects_maxt() {
        let mut node = QbvhNode::EMPTY;
        node.set_child_bbox(0, &BBox3f::new(Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 5.0)));
        let mut ray = Ray::new(Vec3::ZERO, Vec3::new(0.01, 0.01, 1.0));
        ray.maxt = 3.0;
        assert_eq!(node.bbox_intersect(&QuadRay::new(&ray)), 0);
        assert_eq!(node.bbox_intersect_scalar(&ray), 0);
    }
}
