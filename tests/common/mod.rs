//! Scene builders and the brute-force reference shared by the
//! integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use quadbvh::geom::intersect_triangle;
use quadbvh::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// `count` small random triangles inside `[0, 1]^3`.
pub fn random_soup(rng: &mut StdRng, count: usize) -> Arc<TriangleMesh> {
    let mut vertices = Vec::with_capacity(count * 3);
    let mut triangles = Vec::with_capacity(count);
    for i in 0..count as u32 {
        let c = Vec3::new(rng.random(), rng.random(), rng.random());
        for _ in 0..3 {
            let j = Vec3::new(
                rng.random_range(-0.1..0.1),
                rng.random_range(-0.1..0.1),
                rng.random_range(-0.1..0.1),
            );
            vertices.push(c + j);
        }
        triangles.push(Triangle::new(i * 3, i * 3 + 1, i * 3 + 2));
    }
    Arc::new(TriangleMesh::new(vertices, triangles).unwrap())
}

/// Two triangles covering `[0, 1]^2` at `z = 0`.
pub fn unit_square() -> Arc<TriangleMesh> {
    Arc::new(
        TriangleMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            vec![Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
        )
        .unwrap(),
    )
}

pub fn totals(meshes: &[Arc<Mesh>]) -> (usize, usize) {
    (
        meshes.iter().map(|m| m.vertex_count()).sum(),
        meshes.iter().map(|m| m.triangle_count()).sum(),
    )
}

pub fn build(ty: AcceleratorType, config: &AcceleratorConfig, meshes: &[Arc<Mesh>]) -> Box<dyn Accelerator> {
    let (vertices, triangles) = totals(meshes);
    let mut accel = new_accelerator(ty, config).unwrap();
    accel.init(meshes, vertices, triangles).unwrap();
    accel
}

/// Nearest hit over every triangle of every mesh, in world space at the
/// ray's time.
pub fn brute_force(meshes: &[Arc<Mesh>], ray: &Ray) -> RayHit {
    let mut hit = RayHit::MISS;
    let mut r = *ray;
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        for (triangle_index, tri) in mesh.triangles().iter().enumerate() {
            let [a, b, c] = tri.v.map(|v| mesh.vertex(ray.time, v as usize));
            if let Some((t, b1, b2)) = intersect_triangle(&r, a, b, c) {
                r.maxt = t;
                hit = RayHit {
                    t,
                    b1,
                    b2,
                    mesh_index: mesh_index as u32,
                    triangle_index: triangle_index as u32,
                };
            }
        }
    }
    hit
}

/// Rays from outside the unit cube aimed at random triangle centroids, so
/// almost every one hits.
pub fn rays_at_centroids(rng: &mut StdRng, meshes: &[Arc<Mesh>], count: usize) -> Vec<Ray> {
    (0..count)
        .map(|_| {
            let mesh = &meshes[rng.random_range(0..meshes.len())];
            let tri = mesh.triangles()[rng.random_range(0..mesh.triangle_count())];
            let centroid = tri
                .v
                .iter()
                .map(|&v| mesh.vertex(0.0, v as usize))
                .sum::<Vec3>()
                / 3.0;
            let origin = Vec3::new(
                rng.random_range(-2.0..3.0),
                rng.random_range(-2.0..3.0),
                rng.random_range(2.0..3.0),
            );
            Ray::new(origin, centroid - origin)
        })
        .collect()
}

/// Rays between random points of a box around the unit cube.
pub fn random_rays(rng: &mut StdRng, count: usize) -> Vec<Ray> {
    (0..count)
        .map(|_| {
            let o = Vec3::new(
                rng.random_range(-1.0..2.0),
                rng.random_range(-1.0..2.0),
                rng.random_range(-1.0..2.0),
            );
            let target = Vec3::new(rng.random(), rng.random(), rng.random());
            Ray::new(o, target - o)
        })
        .collect()
}

/// Same hit/miss outcome and, for hits, distances within `tolerance`.
pub fn same_hit(a: &RayHit, b: &RayHit, tolerance: f32) -> bool {
    if a.is_miss() || b.is_miss() {
        return a.is_miss() == b.is_miss();
    }
    (a.t - b.t).abs() <= tolerance * a.t.max(1.0)
}
