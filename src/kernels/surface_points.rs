//! Isosurface point extraction kernel
//!
//! Emits one point sample per axis-aligned voxel edge with a TSDF zero
//! crossing, linearly interpolated between the edge endpoints. Output
//! compaction runs through an atomic counter; when the caller provides no
//! capacity estimate a counting pass sizes the buffers exactly first.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::grid::{voxel_coord, ActiveBlocks, IndexedVoxelAccess, VoxelBlockGrid};
use crate::launch::{launch, ScatterBuffer};
use crate::voxel::Voxel;

/// Surface point extraction parameters.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePointsConfig {
    /// Minimum weight for a voxel to be trusted.
    pub weight_threshold: f32,
    /// Output capacity estimate. `None` triggers a counting pass that
    /// sizes the buffers exactly (slower, two sweeps over the volume).
    pub estimated_point_count: Option<usize>,
    /// Emit per-point normals (central-difference TSDF gradient).
    pub with_normals: bool,
    /// Emit per-point colors (only when the voxel type carries color).
    pub with_colors: bool,
}

impl Default for SurfacePointsConfig {
    fn default() -> Self {
        SurfacePointsConfig {
            weight_threshold: 3.0,
            estimated_point_count: None,
            with_normals: true,
            with_colors: true,
        }
    }
}

/// Extracted isosurface point samples.
///
/// Point order is unspecified; the three buffers are index-aligned.
#[derive(Debug, Clone, Default)]
pub struct SurfacePoints {
    /// Zero-crossing positions, in meters.
    pub points: Vec<Vec3>,
    /// Unit surface normals, when requested.
    pub normals: Option<Vec<Vec3>>,
    /// Linear RGB in `[0, 1]`, when requested and available.
    pub colors: Option<Vec<Vec3>>,
    /// Total zero crossings found. Exceeds `points.len()` when the caller's
    /// capacity estimate was too small and the excess was dropped.
    pub detected: usize,
}

/// Extract zero-crossing point samples from the active blocks.
///
/// A crossing is an edge from a voxel to its +x/+y/+z neighbor whose TSDFs
/// have opposite signs, with both weights above the threshold. The sample
/// sits at `ratio = -tsdf_o / (tsdf_i - tsdf_o)` along the edge.
pub fn extract_surface_points<V: Voxel>(
    grid: &VoxelBlockGrid<V>,
    active: &ActiveBlocks,
    config: &SurfacePointsConfig,
) -> SurfacePoints {
    let resolution = grid.resolution();
    let r3 = resolution * resolution * resolution;
    let voxel_size = grid.voxel_size();
    let n = active.len() * r3;

    let access = IndexedVoxelAccess::new(grid, active);
    let voxels = grid.voxels();
    let keys = grid.block_keys();
    let weight_threshold = config.weight_threshold;

    let counter = AtomicU32::new(0);

    let capacity = match config.estimated_point_count {
        Some(estimate) => estimate,
        None => {
            log::warn!(
                "no estimated point count provided, using a two-pass extraction; \
                 this will be slower"
            );
            launch(n, |workload| {
                let block_pos = workload / r3;
                let voxel_idx = workload % r3;
                let slot = active.indices[block_pos] as usize;
                let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);

                let voxel = &voxels[slot * r3 + voxel_idx];
                let tsdf_o = voxel.tsdf();
                if voxel.weight() <= weight_threshold {
                    return;
                }
                for axis in 0..3 {
                    let nb = access.voxel_at(
                        xv as i32 + (axis == 0) as i32,
                        yv as i32 + (axis == 1) as i32,
                        zv as i32 + (axis == 2) as i32,
                        block_pos,
                    );
                    if let Some(nb) = nb {
                        if nb.weight() > weight_threshold && nb.tsdf() * tsdf_o < 0.0 {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
            let counted = counter.load(Ordering::Relaxed) as usize;
            counter.store(0, Ordering::Relaxed);
            counted
        }
    };

    let extract_normals = config.with_normals;
    let extract_colors = config.with_colors && V::HAS_COLOR;

    let mut points = vec![Vec3::ZERO; capacity];
    let mut normals = vec![Vec3::ZERO; if extract_normals { capacity } else { 0 }];
    let mut colors = vec![Vec3::ZERO; if extract_colors { capacity } else { 0 }];

    {
        let point_buf = ScatterBuffer::new(&mut points);
        let normal_buf = ScatterBuffer::new(&mut normals);
        let color_buf = ScatterBuffer::new(&mut colors);

        launch(n, |workload| {
            let block_pos = workload / r3;
            let voxel_idx = workload % r3;
            let slot = active.indices[block_pos] as usize;
            let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);
            let (xv, yv, zv) = (xv as i32, yv as i32, zv as i32);

            let voxel = &voxels[slot * r3 + voxel_idx];
            let tsdf_o = voxel.tsdf();
            if voxel.weight() <= weight_threshold {
                return;
            }

            // global voxel coordinate
            let base = keys[slot] * resolution as i32;
            let gx = (base.x + xv) as f32;
            let gy = (base.y + yv) as f32;
            let gz = (base.z + zv) as f32;

            let normal_o = if extract_normals {
                access.normal_at(xv, yv, zv, block_pos)
            } else {
                Vec3::ZERO
            };

            for axis in 0..3 {
                let (xi, yi, zi) = (
                    xv + (axis == 0) as i32,
                    yv + (axis == 1) as i32,
                    zv + (axis == 2) as i32,
                );
                let Some(nb) = access.voxel_at(xi, yi, zi, block_pos) else {
                    continue;
                };
                let tsdf_i = nb.tsdf();
                if nb.weight() <= weight_threshold || tsdf_i * tsdf_o >= 0.0 {
                    continue;
                }

                let ratio = -tsdf_o / (tsdf_i - tsdf_o);
                let idx = counter.fetch_add(1, Ordering::Relaxed) as usize;
                if idx >= capacity {
                    // Estimate exhausted; keep counting so the caller can
                    // see the real total, but drop the sample.
                    continue;
                }

                point_buf.write(
                    idx,
                    voxel_size
                        * Vec3::new(
                            gx + ratio * (axis == 0) as i32 as f32,
                            gy + ratio * (axis == 1) as i32 as f32,
                            gz + ratio * (axis == 2) as i32 as f32,
                        ),
                );

                if extract_colors {
                    let c = (1.0 - ratio) * voxel.color() + ratio * nb.color();
                    color_buf.write(idx, c / 255.0);
                }

                if extract_normals {
                    let normal_i = access.normal_at(xi, yi, zi, block_pos);
                    let nv = (1.0 - ratio) * normal_o + ratio * normal_i;
                    normal_buf.write(idx, nv / (nv.length() + 1e-5));
                }
            }
        });
    }

    let detected = counter.load(Ordering::Relaxed) as usize;
    if detected > capacity {
        log::warn!(
            "point cloud larger than the estimate ({} > {}), {} points dropped; \
             increase the estimate",
            detected,
            capacity,
            detected - capacity
        );
    }
    log::info!("{} surface points extracted", detected.min(capacity));

    let len = detected.min(capacity);
    points.truncate(len);
    normals.truncate(len);
    colors.truncate(len);

    SurfacePoints {
        points,
        normals: extract_normals.then_some(normals),
        colors: extract_colors.then_some(colors),
        detected,
    }
}
