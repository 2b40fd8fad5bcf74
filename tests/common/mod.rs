//! Common test fixtures for ALICE-Fusion integration tests
//!
//! Synthetic TSDF volumes filled analytically (no camera involved) plus a
//! few mesh topology helpers.
//!
//! Author: Moroya Sakamoto

// Not every test binary uses every fixture.
#![allow(dead_code)]

use alice_fusion::prelude::*;
use std::collections::HashMap;

/// Fill every voxel of every allocated block from an analytic signed
/// distance, clamped to the truncation band, with weight 1.
pub fn fill_analytic<F>(grid: &mut VoxelBlockGrid<TsdfVoxel>, sdf: F)
where
    F: Fn(Vec3) -> f32,
{
    let resolution = grid.resolution();
    let voxel_size = grid.voxel_size();
    let sdf_trunc = grid.sdf_trunc();

    for slot in 0..grid.n_blocks() {
        let base = grid.block_keys()[slot] * resolution as i32;
        for x in 0..resolution {
            for y in 0..resolution {
                for z in 0..resolution {
                    let p = voxel_size
                        * Vec3::new(
                            (base.x + x as i32) as f32,
                            (base.y + y as i32) as f32,
                            (base.z + z as i32) as f32,
                        );
                    *grid.voxel_mut(slot, x, y, z) = TsdfVoxel {
                        tsdf: (sdf(p) / sdf_trunc).clamp(-1.0, 1.0),
                        weight: 1.0,
                    };
                }
            }
        }
    }
}

/// Allocate every block whose key lies in the inclusive world-space AABB.
pub fn allocate_aabb(grid: &mut VoxelBlockGrid<TsdfVoxel>, min: Vec3, max: Vec3) {
    let block_size = grid.block_size();
    let lo = (min / block_size).floor().as_ivec3();
    let hi = (max / block_size).floor().as_ivec3();
    for x in lo.x..=hi.x {
        for y in lo.y..=hi.y {
            for z in lo.z..=hi.z {
                grid.allocate(IVec3::new(x, y, z));
            }
        }
    }
}

/// Synthetic sphere TSDF: radius `radius` at `center`, fully covered by
/// allocated blocks with a truncation-band margin on every side.
pub fn sphere_grid(center: Vec3, radius: f32) -> (VoxelBlockGrid<TsdfVoxel>, ActiveBlocks) {
    let mut grid = VoxelBlockGrid::new(8, 0.02, 0.06).unwrap();
    let margin = grid.sdf_trunc() + grid.block_size();
    let ext = Vec3::splat(radius + margin);
    allocate_aabb(&mut grid, center - ext, center + ext);
    fill_analytic(&mut grid, |p| (p - center).length() - radius);
    let active = grid.active_blocks();
    (grid, active)
}

/// Synthetic plane TSDF at `z = z_plane` (positive in front of the plane,
/// the integration convention), covering `|x|, |y| <= extent`.
pub fn plane_grid(z_plane: f32, extent: f32) -> (VoxelBlockGrid<TsdfVoxel>, ActiveBlocks) {
    let mut grid = VoxelBlockGrid::new(8, 0.01, 0.04).unwrap();
    let margin = grid.sdf_trunc() + grid.block_size();
    allocate_aabb(
        &mut grid,
        Vec3::new(-extent, -extent, z_plane - margin),
        Vec3::new(extent, extent, z_plane + margin),
    );
    fill_analytic(&mut grid, |p| z_plane - p.z);
    let active = grid.active_blocks();
    (grid, active)
}

/// Undirected edge -> incident triangle count.
pub fn edge_incidence(mesh: &SurfaceMesh) -> HashMap<(u32, u32), usize> {
    let mut edges = HashMap::new();
    for t in &mesh.triangles {
        for i in 0..3 {
            let (a, b) = (t[i], t[(i + 1) % 3]);
            let key = (a.min(b), a.max(b));
            *edges.entry(key).or_insert(0) += 1;
        }
    }
    edges
}

/// Assert the mesh is a closed 2-manifold: every edge borders exactly two
/// triangles, and the closed genus-0 Euler relation `T = 2V - 4` holds.
pub fn assert_closed_manifold(mesh: &SurfaceMesh) {
    assert!(!mesh.triangles.is_empty(), "mesh is empty");
    for (edge, count) in edge_incidence(mesh) {
        assert_eq!(
            count, 2,
            "edge {:?} borders {} triangles, expected 2",
            edge, count
        );
    }
    assert_eq!(
        mesh.triangles.len(),
        2 * mesh.vertices.len() - 4,
        "Euler relation violated for a closed genus-0 surface"
    );
}

/// Assert a position sits on an axis-aligned voxel edge: at least two of
/// its three coordinates are integral in voxel units.
pub fn assert_on_voxel_edge(p: Vec3, voxel_size: f32) {
    let v = p / voxel_size;
    let integral = [v.x, v.y, v.z]
        .iter()
        .filter(|c| (*c - c.round()).abs() < 1e-3)
        .count();
    assert!(
        integral >= 2,
        "{:?} (voxel units {:?}) is not on an axis-aligned edge",
        p,
        v
    );
}
