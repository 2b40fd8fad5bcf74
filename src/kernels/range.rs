//! Ray-cast range estimation kernel
//!
//! Projects the allocated blocks into a downsampled image and rasterizes
//! per-pixel near/far depth bounds. Three phases: per-block screen-space
//! bounding, 16x16 fragment tiling through a shared fragment buffer, and
//! atomic float min/max rasterization into the range map. The map is
//! pre-filled inverted (`(depth_max, depth_min)`) so the atomic folds only
//! ever widen it.
//!
//! Author: Moroya Sakamoto

use glam::{Affine3A, IVec3, Vec3};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::camera::PinholeIntrinsics;
use crate::launch::{atomic_max_f32, atomic_min_f32, launch, ScatterBuffer};

/// Screen-space tile edge length, in downsampled pixels.
pub const FRAGMENT_SIZE: usize = 16;

/// Shared fragment buffer capacity; blocks past it are dropped with a
/// diagnostic.
const FRAGMENT_BUFFER_CAPACITY: usize = 65535;

/// Range estimation parameters.
#[derive(Debug, Clone, Copy)]
pub struct RangeConfig {
    /// Downsampling factor from the render resolution to the range map.
    pub down_factor: usize,
    /// Near clip plane, in meters.
    pub depth_min: f32,
    /// Far clip plane, in meters.
    pub depth_max: f32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        RangeConfig {
            down_factor: 8,
            depth_min: 0.1,
            depth_max: 3.0,
        }
    }
}

/// Per-pixel near/far depth bounds at `1 / down_factor` resolution.
///
/// Pixels no block projects to keep the inverted prefill
/// (`min == depth_max > max == depth_min`), which reads as "empty".
#[derive(Debug, Clone)]
pub struct RangeMap {
    /// Row-major `(near, far)` pairs.
    pub min_max: Vec<[f32; 2]>,
    /// Map height (downsampled rows).
    pub height: usize,
    /// Map width (downsampled columns).
    pub width: usize,
    /// The downsampling factor the map was built with.
    pub down_factor: usize,
}

impl RangeMap {
    /// Bounds of the downsampled pixel `(u, v)`.
    #[inline(always)]
    pub fn at(&self, u: usize, v: usize) -> [f32; 2] {
        self.min_max[v * self.width + u]
    }

    /// Bounds covering the full-resolution pixel `(x, y)`.
    #[inline(always)]
    pub fn at_full_res(&self, x: usize, y: usize) -> [f32; 2] {
        self.at(
            (x / self.down_factor).min(self.width - 1),
            (y / self.down_factor).min(self.height - 1),
        )
    }
}

/// Estimate per-pixel ray depth bounds from the allocated block set.
///
/// * `block_keys` - keys of every allocated block
/// * `pose` - camera-to-world rigid transform
/// * `height`, `width` - full render resolution; the map is
///   `down_factor` times smaller
pub fn estimate_range(
    block_keys: &[IVec3],
    block_resolution: usize,
    voxel_size: f32,
    intrinsics: &PinholeIntrinsics,
    pose: &Affine3A,
    height: usize,
    width: usize,
    config: &RangeConfig,
) -> RangeMap {
    let h_down = height / config.down_factor;
    let w_down = width / config.down_factor;
    let down = config.down_factor as f32;
    let block_size = block_resolution as f32 * voxel_size;
    let w2c = pose.inverse();

    // Phase 1: project block corners, tile the bounding rectangles into
    // fragments. Unreserved slots hold an empty rectangle (v_min > v_max)
    // so a dropped block can never rasterize.
    let mut fragments = vec![[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]; FRAGMENT_BUFFER_CAPACITY];
    let frag_counter = AtomicU32::new(0);
    {
        let frag_buf = ScatterBuffer::new(&mut fragments);

        launch(block_keys.len(), |workload| {
            let key = block_keys[workload];

            let mut u_min = w_down as i32 - 1;
            let mut v_min = h_down as i32 - 1;
            let mut u_max = 0i32;
            let mut v_max = 0i32;
            let mut z_min = config.depth_max;
            let mut z_max = config.depth_min;

            // Project the 8 world corners to the downsampled image.
            for corner in 0..8 {
                let pw = block_size
                    * Vec3::new(
                        (key.x + ((corner & 1) != 0) as i32) as f32,
                        (key.y + ((corner & 2) != 0) as i32) as f32,
                        (key.z + ((corner & 4) != 0) as i32) as f32,
                    );
                let pc = w2c.transform_point3(pw);
                if pc.z <= 0.0 {
                    continue;
                }
                let uv = intrinsics.project(pc) / down;

                v_min = v_min.min(uv.y.floor() as i32);
                v_max = v_max.max(uv.y.ceil() as i32);
                u_min = u_min.min(uv.x.floor() as i32);
                u_max = u_max.max(uv.x.ceil() as i32);
                z_min = z_min.min(pc.z);
                z_max = z_max.max(pc.z);
            }

            let v_min = v_min.max(0);
            let v_max = v_max.min(h_down as i32 - 1);
            let u_min = u_min.max(0);
            let u_max = u_max.min(w_down as i32 - 1);
            if v_min >= v_max || u_min >= u_max || z_min >= z_max {
                return;
            }

            // Tile into 16x16 fragments, reserving a contiguous slice.
            let fs = FRAGMENT_SIZE as i32;
            let frag_v_count = (v_max - v_min + 1 + fs - 1) / fs;
            let frag_u_count = (u_max - u_min + 1 + fs - 1) / fs;
            let frag_count = (frag_v_count * frag_u_count) as usize;

            let start = frag_counter.fetch_add(frag_count as u32, Ordering::Relaxed) as usize;
            if start + frag_count > FRAGMENT_BUFFER_CAPACITY {
                log::error!(
                    "fragment buffer overflow ({} > {}), dropping block ({}, {}, {})",
                    start + frag_count,
                    FRAGMENT_BUFFER_CAPACITY,
                    key.x,
                    key.y,
                    key.z
                );
                return;
            }

            let mut offset = 0;
            for frag_v in 0..frag_v_count {
                for frag_u in 0..frag_u_count {
                    let fv_min = v_min + frag_v * fs;
                    let fu_min = u_min + frag_u * fs;
                    frag_buf.write(
                        start + offset,
                        [
                            z_min,
                            z_max,
                            fv_min as f32,
                            fu_min as f32,
                            (fv_min + fs - 1).min(v_max) as f32,
                            (fu_min + fs - 1).min(u_max) as f32,
                        ],
                    );
                    offset += 1;
                }
            }
        });
    }
    let frag_count = (frag_counter.load(Ordering::Relaxed) as usize).min(FRAGMENT_BUFFER_CAPACITY);

    // Phase 2: inverted prefill, so the atomic folds below only widen.
    let range_bits: Vec<[AtomicU32; 2]> = (0..h_down * w_down)
        .map(|_| {
            [
                AtomicU32::new(config.depth_max.to_bits()),
                AtomicU32::new(config.depth_min.to_bits()),
            ]
        })
        .collect();

    // Phase 3: rasterize fragments with atomic min/max.
    launch(frag_count * FRAGMENT_SIZE * FRAGMENT_SIZE, |workload| {
        let frag_idx = workload / (FRAGMENT_SIZE * FRAGMENT_SIZE);
        let local_idx = workload % (FRAGMENT_SIZE * FRAGMENT_SIZE);
        let dv = local_idx / FRAGMENT_SIZE;
        let du = local_idx % FRAGMENT_SIZE;

        let frag = &fragments[frag_idx];
        let v = frag[2] as usize + dv;
        let u = frag[3] as usize + du;
        if v > frag[4] as usize || u > frag[5] as usize {
            return;
        }

        let cell = &range_bits[v * w_down + u];
        atomic_min_f32(&cell[0], frag[0]);
        atomic_max_f32(&cell[1], frag[1]);
    });

    let min_max = range_bits
        .into_iter()
        .map(|[near, far]| {
            [
                f32::from_bits(near.into_inner()),
                f32::from_bits(far.into_inner()),
            ]
        })
        .collect();

    RangeMap {
        min_max,
        height: h_down,
        width: w_down,
        down_factor: config.down_factor,
    }
}
