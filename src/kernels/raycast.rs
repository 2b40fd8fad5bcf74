//! Perspective ray-cast kernel
//!
//! Sphere-traces one ray per output pixel through the sparse volume. The
//! march steps by whole blocks over unallocated space (hash-map misses read
//! as free space) and adapts to the TSDF magnitude inside the truncation
//! band, clamped to at least one voxel per step. A sign change between
//! consecutive trusted samples is the surface; depth and vertex come from
//! the linear root, color and normal from trilinear interpolation over the
//! 8 surrounding voxels.
//!
//! Author: Moroya Sakamoto

use glam::{Affine3A, Vec3};

use crate::camera::{ImageBuffer, PinholeIntrinsics};
use crate::grid::{BlockIndex, HashedVoxelAccess, VoxelBlockGrid};
use crate::kernels::range::RangeMap;
use crate::launch::{launch, ScatterBuffer};
use crate::voxel::Voxel;

/// Ray casting parameters.
#[derive(Debug, Clone, Copy)]
pub struct RayCastConfig {
    /// Multiplier turning meters back into raw depth units.
    pub depth_scale: f32,
    /// March start distance, in meters (overridden per pixel by a range map).
    pub depth_min: f32,
    /// March stop distance, in meters.
    pub depth_max: f32,
    /// Minimum weight for a sample to register a crossing.
    pub weight_threshold: f32,
    /// Step budget per ray.
    pub max_steps: usize,
    /// Produce the depth map.
    pub with_depth: bool,
    /// Produce the world-space vertex map.
    pub with_vertex: bool,
    /// Produce the color map (voxel type permitting).
    pub with_color: bool,
    /// Produce the camera-frame normal map.
    pub with_normal: bool,
}

impl Default for RayCastConfig {
    fn default() -> Self {
        RayCastConfig {
            depth_scale: 1000.0,
            depth_min: 0.1,
            depth_max: 3.0,
            weight_threshold: 3.0,
            max_steps: 100,
            with_depth: true,
            with_vertex: false,
            with_color: false,
            with_normal: false,
        }
    }
}

/// Ray-cast output maps; disabled maps are `None`. Pixels whose ray found
/// no surface stay zero.
#[derive(Debug, Clone, Default)]
pub struct RayCastMaps {
    /// `H x W x 1` depth in raw units (`t * depth_scale`).
    pub depth: Option<ImageBuffer>,
    /// `H x W x 3` world-space intersection points.
    pub vertex: Option<ImageBuffer>,
    /// `H x W x 3` linear RGB in `[0, 1]`.
    pub color: Option<ImageBuffer>,
    /// `H x W x 3` unit normals in the camera frame.
    pub normal: Option<ImageBuffer>,
}

/// Ray-cast the volume into per-pixel maps.
///
/// * `map` - block index to traverse (the grid's live map or a frozen
///   snapshot)
/// * `pose` - camera-to-world rigid transform
/// * `range` - optional per-pixel start bounds from
///   [`estimate_range`](crate::kernels::range::estimate_range)
///
/// With no output enabled the kernel warns and returns empty maps.
pub fn ray_cast<V: Voxel, M: BlockIndex>(
    grid: &VoxelBlockGrid<V>,
    map: &M,
    intrinsics: &PinholeIntrinsics,
    pose: &Affine3A,
    range: Option<&RangeMap>,
    height: usize,
    width: usize,
    config: &RayCastConfig,
) -> RayCastMaps {
    let with_color = config.with_color && V::HAS_COLOR;
    if !(config.with_depth || config.with_vertex || with_color || config.with_normal) {
        log::warn!("no output map enabled for ray casting");
        return RayCastMaps::default();
    }

    let access = HashedVoxelAccess::new(grid, map);
    let voxel_size = grid.voxel_size();
    let sdf_trunc = grid.sdf_trunc();
    let block_size = grid.block_size();
    let w2c = pose.inverse();
    let origin = pose.transform_point3(Vec3::ZERO);

    let mut depth_map = config
        .with_depth
        .then(|| ImageBuffer::new(height, width, 1));
    let mut vertex_map = config
        .with_vertex
        .then(|| ImageBuffer::new(height, width, 3));
    let mut color_map = with_color.then(|| ImageBuffer::new(height, width, 3));
    let mut normal_map = config
        .with_normal
        .then(|| ImageBuffer::new(height, width, 3));

    {
        let depth_buf = depth_map.as_mut().map(|m| ScatterBuffer::new(&mut m.data));
        let vertex_buf = vertex_map.as_mut().map(|m| ScatterBuffer::new(&mut m.data));
        let color_buf = color_map.as_mut().map(|m| ScatterBuffer::new(&mut m.data));
        let normal_buf = normal_map.as_mut().map(|m| ScatterBuffer::new(&mut m.data));

        launch(height * width, |workload| {
            let y = workload / width;
            let x = workload % width;

            let mut t = config.depth_min;
            if let Some(range_map) = range {
                let [z_min, z_max] = range_map.at_full_res(x, y);
                if z_min >= z_max {
                    // No block projects here.
                    return;
                }
                t = z_min;
            }

            // Ray direction: unproject the pixel at unit depth, rotate to
            // world. Unnormalized, so t stays in camera z-depth units.
            let pc = intrinsics.unproject(x as f32, y as f32, 1.0);
            let dir = pose.transform_point3(pc) - origin;

            let mut t_prev = t;
            let mut tsdf_prev = 1.0f32;

            for _ in 0..config.max_steps {
                if t > config.depth_max {
                    break;
                }
                let Some((voxel, _, _)) = access.voxel_at_point(origin + t * dir) else {
                    t_prev = t;
                    t += block_size;
                    continue;
                };
                let tsdf = voxel.tsdf();
                let weight = voxel.weight();

                if tsdf_prev > 0.0 && weight >= config.weight_threshold && tsdf <= 0.0 {
                    let t_intersect = (t * tsdf_prev - t_prev * tsdf) / (tsdf_prev - tsdf);
                    let g = origin + t_intersect * dir;

                    if let Some(buf) = &depth_buf {
                        buf.write(workload, t_intersect * config.depth_scale);
                    }
                    if let Some(buf) = &vertex_buf {
                        buf.write(workload * 3, g.x);
                        buf.write(workload * 3 + 1, g.y);
                        buf.write(workload * 3 + 2, g.z);
                    }
                    if color_buf.is_some() || normal_buf.is_some() {
                        interpolate_maps(
                            &access,
                            g,
                            workload,
                            &w2c,
                            color_buf.as_ref(),
                            normal_buf.as_ref(),
                        );
                    }
                    break;
                }

                tsdf_prev = tsdf;
                t_prev = t;
                let delta = tsdf * sdf_trunc;
                t += if delta < voxel_size { voxel_size } else { delta };
            }
        });
    }

    RayCastMaps {
        depth: depth_map,
        vertex: vertex_map,
        color: color_map,
        normal: normal_map,
    }
}

/// Trilinear color/normal interpolation over the 8 voxels around `g`.
///
/// Corner contributions are weighted by the fractional position and
/// filtered on observation weight; the normal accumulates per-corner
/// central differences with per-axis validity tracking folded into the
/// shared weight sum.
fn interpolate_maps<V: Voxel, M: BlockIndex>(
    access: &HashedVoxelAccess<'_, V, M>,
    g: Vec3,
    workload: usize,
    w2c: &Affine3A,
    color_buf: Option<&ScatterBuffer<'_, f32>>,
    normal_buf: Option<&ScatterBuffer<'_, f32>>,
) {
    let Some((_, block, slot)) = access.voxel_at_point(g) else {
        return;
    };
    let local = (g - block.as_vec3() * access.block_size()) / access.voxel_size();
    let floor = local.floor();
    let (xf, yf, zf) = (floor.x as i32, floor.y as i32, floor.z as i32);
    let ratio = local - floor;

    let mut color_sum = Vec3::ZERO;
    let mut normal_sum = Vec3::ZERO;
    let mut sum_weight_color = 0.0f32;
    let mut sum_weight_normal = 0.0f32;
    let inv_2vs = 1.0 / (2.0 * access.voxel_size());

    for corner in 0..8 {
        let dx = (corner & 1) as i32;
        let dy = ((corner >> 1) & 1) as i32;
        let dz = ((corner >> 2) & 1) as i32;
        let weight = (dx as f32 * ratio.x + (1 - dx) as f32 * (1.0 - ratio.x))
            * (dy as f32 * ratio.y + (1 - dy) as f32 * (1.0 - ratio.y))
            * (dz as f32 * ratio.z + (1 - dz) as f32 * (1.0 - ratio.z));

        if color_buf.is_some() {
            if let Some(v) = access.voxel_at(block, xf + dx, yf + dy, zf + dz, slot) {
                if v.weight() > 0.0 {
                    sum_weight_color += weight;
                    color_sum += weight * v.color();
                }
            }
        }

        if normal_buf.is_some() {
            for dim in 0..3 {
                let plus = access.voxel_at(
                    block,
                    xf + dx + (dim == 0) as i32,
                    yf + dy + (dim == 1) as i32,
                    zf + dz + (dim == 2) as i32,
                    slot,
                );
                let minus = access.voxel_at(
                    block,
                    xf + dx - (dim == 0) as i32,
                    yf + dy - (dim == 1) as i32,
                    zf + dz - (dim == 2) as i32,
                    slot,
                );
                let mut valid = false;
                if let Some(v) = plus {
                    if v.weight() > 0.0 {
                        normal_sum[dim] += weight * v.tsdf() * inv_2vs;
                        valid = true;
                    }
                }
                if let Some(v) = minus {
                    if v.weight() > 0.0 {
                        normal_sum[dim] -= weight * v.tsdf() * inv_2vs;
                        valid = true;
                    }
                }
                if valid {
                    sum_weight_normal += weight;
                }
            }
        }
    }

    if let Some(buf) = color_buf {
        if sum_weight_color > 0.0 {
            let c = color_sum / (sum_weight_color * 255.0);
            buf.write(workload * 3, c.x);
            buf.write(workload * 3 + 1, c.y);
            buf.write(workload * 3 + 2, c.z);
        }
    }
    if let Some(buf) = normal_buf {
        if sum_weight_normal > 0.0 {
            let n = (normal_sum / sum_weight_normal).normalize_or_zero();
            let n = w2c.transform_vector3(n);
            buf.write(workload * 3, n.x);
            buf.write(workload * 3 + 1, n.y);
            buf.write(workload * 3 + 2, n.z);
        }
    }
}
