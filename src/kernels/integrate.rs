//! Depth/color frame integration kernel
//!
//! Fuses one posed depth (and optionally color) frame into the TSDF. The
//! workload is every (block, voxel) pair of the active set; each voxel
//! projects into the frame, validates its observation, and applies the
//! fused running-average update. Voxels are disjoint across workloads, so
//! the payload needs no synchronization; blocks are the parallel unit
//! here, with the `R^3` voxels enumerated inside.
//!
//! Author: Moroya Sakamoto

use glam::{Affine3A, Vec3};
use rayon::prelude::*;

use crate::camera::{ImageView, PinholeIntrinsics};
use crate::grid::{voxel_coord, VoxelBlockGrid};
use crate::voxel::Voxel;

/// Integration parameters.
#[derive(Debug, Clone, Copy)]
pub struct IntegrateConfig {
    /// Divisor turning raw depth units into meters.
    pub depth_scale: f32,
    /// Observations beyond this depth (meters) are rejected.
    pub depth_max: f32,
    /// Optional weight saturation; `None` leaves the weight unbounded.
    pub max_weight: Option<f32>,
}

impl Default for IntegrateConfig {
    fn default() -> Self {
        IntegrateConfig {
            depth_scale: 1000.0,
            depth_max: 3.0,
            max_weight: None,
        }
    }
}

/// Fuse a depth/color frame into the grid.
///
/// * `indices` - block slots to integrate (usually every allocated block)
/// * `depth` - `H x W x 1` raw depth image
/// * `color` - optional `H x W x 3` color image, `[0, 255]` per channel;
///   only sampled when the voxel type carries color
/// * `extrinsics` - world-to-camera rigid transform
///
/// Out-of-frame voxels, invalid depth, voxels behind the camera and
/// observations more than `sdf_trunc` behind the surface are skipped
/// silently, per voxel.
pub fn integrate<V: Voxel>(
    grid: &mut VoxelBlockGrid<V>,
    indices: &[i64],
    depth: &ImageView<'_>,
    color: Option<&ImageView<'_>>,
    intrinsics: &PinholeIntrinsics,
    extrinsics: &Affine3A,
    config: &IntegrateConfig,
) {
    let resolution = grid.resolution();
    let r3 = resolution * resolution * resolution;
    let voxel_size = grid.voxel_size();
    let sdf_trunc = grid.sdf_trunc();
    let inv_trunc = 1.0 / sdf_trunc;

    let color = if V::HAS_COLOR { color.copied() } else { None };

    let mut in_set = vec![false; grid.n_blocks()];
    for &slot in indices {
        in_set[slot as usize] = true;
    }

    let (keys, voxels) = grid.parts_mut();
    voxels
        .par_chunks_mut(r3)
        .enumerate()
        .filter(|(slot, _)| in_set[*slot])
        .for_each(|(slot, block)| {
            let base = keys[slot] * resolution as i32;
            for (voxel_idx, voxel) in block.iter_mut().enumerate() {
                let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);

                // world coordinate (in voxels -> meters)
                let p = voxel_size
                    * Vec3::new(
                        (base.x + xv as i32) as f32,
                        (base.y + yv as i32) as f32,
                        (base.z + zv as i32) as f32,
                    );
                let pc = extrinsics.transform_point3(p);

                let uv = intrinsics.project(pc);
                if !depth.in_bounds(uv.x, uv.y) {
                    continue;
                }
                let (u, v) = (uv.x as usize, uv.y as usize);

                let d = depth.at(u, v) / config.depth_scale;
                let sdf = d - pc.z;
                if d <= 0.0 || d > config.depth_max || pc.z <= 0.0 || sdf < -sdf_trunc {
                    continue;
                }
                let sdf = sdf.min(sdf_trunc) * inv_trunc;

                match &color {
                    Some(img) => {
                        // nearest-neighbor color sample
                        let c = img.pixel(u, v);
                        voxel.integrate_with_color(sdf, Vec3::new(c[0], c[1], c[2]));
                    }
                    None => voxel.integrate(sdf),
                }
                if let Some(max_weight) = config.max_weight {
                    voxel.clamp_weight(max_weight);
                }
            }
        });
}
