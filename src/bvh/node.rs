//! Flat BVH node layout.

use bytemuck::{Pod, Zeroable};

use crate::util::{BBox3f, Vec3};

const LEAF_FLAG: u32 = 0x8000_0000;

/// One entry of a depth-first BVH array.
///
/// Interior nodes store their box as raw `f32` bits in `payload[0..6]`
/// (`min.xyz, max.xyz`) and the index of the first node after their subtree
/// in `node_data`. Leaves set the top bit of `node_data`; the low bits are
/// the index of the next node. A triangle leaf's payload is
/// `[v0, v1, v2, mesh, triangle, 0]`, an object leaf's payload starts with
/// the object index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BvhArrayNode {
    pub payload: [u32; 6],
    pub node_data: u32,
}

impl BvhArrayNode {
    pub fn interior(bbox: &BBox3f, skip_index: u32) -> Self {
        let (min, max) = (bbox.min, bbox.max);
        Self {
            payload: [
                min.x.to_bits(),
                min.y.to_bits(),
                min.z.to_bits(),
                max.x.to_bits(),
                max.y.to_bits(),
                max.z.to_bits(),
            ],
            node_data: skip_index,
        }
    }

    /// Leaf at array position `index`.
    pub fn leaf(payload: [u32; 6], index: u32) -> Self {
        Self {
            payload,
            node_data: LEAF_FLAG | (index + 1),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.node_data & LEAF_FLAG != 0
    }

    /// Index to continue at when this node is done with or skipped.
    #[inline]
    pub fn skip_index(&self) -> u32 {
        self.node_data & !LEAF_FLAG
    }

    /// Box of an interior node.
    #[inline]
    pub fn bbox(&self) -> BBox3f {
        let p = &self.payload;
        BBox3f::new(
            Vec3::new(f32::from_bits(p[0]), f32::from_bits(p[1]), f32::from_bits(p[2])),
            Vec3::new(f32::from_bits(p[3]), f32::from_bits(p[4]), f32::from_bits(p[5])),
        )
    }

    /// Vertex indices of a triangle leaf.
    #[inline]
    pub fn triangle_vertices(&self) -> [u32; 3] {
        [self.payload[0], self.payload[1], self.payload[2]]
    }

    /// `(mesh, triangle)` of a triangle leaf.
    #[inline]
    pub fn triangle_id(&self) -> (u32, u32) {
        (self.payload[3], self.payload[4])
    }

    /// Object index of an object leaf.
    #[inline]
    pub fn object_index(&self) -> u32 {
        self.payload[0]
    }
}
