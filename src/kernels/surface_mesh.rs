//! Marching Cubes surface mesh extraction kernel
//!
//! A three-pass algorithm over a per-voxel structure tensor (3 edge-vertex
//! channels + 1 table-index channel) that produces globally consistent
//! vertex indices across block boundaries:
//!
//! - **Pass 0** marks every edge needing a vertex with `-1` in the voxel
//!   that *owns* the edge (via [`EDGE_SHIFTS`]). Marks racing from
//!   neighboring cubes all store the same value, so relaxed atomic stores
//!   are sufficient.
//! - **Pass 1** counts the marks.
//! - **Pass 2** turns each mark into an atomically allocated global vertex
//!   index and interpolates position/normal/(color).
//! - **Pass 3** connects vertices into triangles through [`TRI_TABLE`],
//!   reversing the winding so normals face outward.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use thiserror::Error;

use crate::grid::{
    neighbor_slot, voxel_coord, voxel_linear_index, ActiveBlocks, IndexedVoxelAccess,
    VoxelBlockGrid, NB_COUNT,
};
use crate::kernels::tables::{EDGE_SHIFTS, EDGE_TABLE, TRI_COUNT, TRI_TABLE, VTX_SHIFTS};
use crate::launch::{launch, ScatterBuffer};
use crate::voxel::Voxel;

/// Mesh extraction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// The per-voxel structure tensor does not fit in memory. Recoverable
    /// by re-integrating at a larger voxel size.
    #[error(
        "unable to allocate the marching-cubes structure for {n_blocks} voxel blocks \
         (voxel size {voxel_size}); consider a larger voxel size"
    )]
    StructureAllocation {
        /// Active block count at the failed allocation.
        n_blocks: usize,
        /// Current voxel size in meters.
        voxel_size: f32,
    },
}

/// Mesh extraction parameters.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceMeshConfig {
    /// Minimum weight for a cube corner to be trusted.
    pub weight_threshold: f32,
}

impl Default for SurfaceMeshConfig {
    fn default() -> Self {
        SurfaceMeshConfig {
            weight_threshold: 3.0,
        }
    }
}

/// Extracted triangle mesh. Vertex and triangle order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    /// Vertex positions, in meters.
    pub vertices: Vec<Vec3>,
    /// Unit vertex normals, index-aligned with `vertices`.
    pub normals: Vec<Vec3>,
    /// Linear RGB in `[0, 1]`, when the voxel type carries color.
    pub colors: Option<Vec<Vec3>>,
    /// Vertex index triplets, wound for outward-facing normals.
    pub triangles: Vec<[u32; 3]>,
}

/// Run Marching Cubes over the active blocks.
///
/// Vertices on edges shared between voxels, including voxels of different
/// blocks, are allocated exactly once and referenced by index from every
/// adjacent triangle.
pub fn extract_surface_mesh<V: Voxel>(
    grid: &VoxelBlockGrid<V>,
    active: &ActiveBlocks,
    config: &SurfaceMeshConfig,
) -> Result<SurfaceMesh, MeshError> {
    let resolution = grid.resolution();
    let r = resolution as i32;
    let r3 = resolution * resolution * resolution;
    let voxel_size = grid.voxel_size();
    let n_blocks = active.len();
    let n = n_blocks * r3;

    // Voxel-wise mesh structure: 3 edge-vertex channels + 1 table index.
    let structure_len = n * 4;
    let mut mesh_structure: Vec<AtomicI32> = Vec::new();
    if mesh_structure.try_reserve_exact(structure_len).is_err() {
        return Err(MeshError::StructureAllocation {
            n_blocks,
            voxel_size,
        });
    }
    mesh_structure.resize_with(structure_len, || AtomicI32::new(0));

    let access = IndexedVoxelAccess::new(grid, active);
    let voxels = grid.voxels();
    let keys = grid.block_keys();
    let weight_threshold = config.weight_threshold;

    // Resolve the voxel owning `(xs, ys, zs, axis)` of the cube at
    // `block_pos` to its channel in the structure tensor. Owner offsets are
    // in {0, 1} per axis, so the owning block is one of the cube's corner
    // blocks and is guaranteed present once the corners resolved.
    let owner_channel = |xs: i32, ys: i32, zs: i32, axis: usize, block_pos: usize| -> usize {
        let (dxb, xl) = (xs.div_euclid(r), xs.rem_euclid(r));
        let (dyb, yl) = (ys.div_euclid(r), ys.rem_euclid(r));
        let (dzb, zl) = (zs.div_euclid(r), zs.rem_euclid(r));

        let nb = block_pos * NB_COUNT + neighbor_slot(dxb, dyb, dzb);
        debug_assert!(active.nb_masks[nb]);
        let slot = active.nb_indices[nb] as usize;
        let owner_pos = active.inv_indices[slot];
        debug_assert!(owner_pos >= 0);

        let lin = voxel_linear_index(resolution, xl as usize, yl as usize, zl as usize);
        (owner_pos as usize * r3 + lin) * 4 + axis
    };

    // Pass 0: per-cube sign configuration, mark edges carrying a vertex.
    launch(n, |workload| {
        let block_pos = workload / r3;
        let voxel_idx = workload % r3;
        let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);
        let (xv, yv, zv) = (xv as i32, yv as i32, zv as i32);

        let mut table_idx = 0usize;
        for (corner, shift) in VTX_SHIFTS.iter().enumerate() {
            let Some(v) = access.voxel_at(
                xv + shift[0] as i32,
                yv + shift[1] as i32,
                zv + shift[2] as i32,
                block_pos,
            ) else {
                return;
            };
            if v.weight() <= weight_threshold {
                return;
            }
            if v.tsdf() < 0.0 {
                table_idx |= 1 << corner;
            }
        }

        mesh_structure[workload * 4 + 3].store(table_idx as i32, Ordering::Relaxed);
        if table_idx == 0 || table_idx == 255 {
            return;
        }

        let edges = EDGE_TABLE[table_idx];
        for edge in 0..12usize {
            if edges & (1u16 << edge) != 0 {
                let shift = EDGE_SHIFTS[edge];
                let channel = owner_channel(
                    xv + shift[0] as i32,
                    yv + shift[1] as i32,
                    zv + shift[2] as i32,
                    shift[3] as usize,
                    block_pos,
                );
                // Racing writers all store -1.
                mesh_structure[channel].store(-1, Ordering::Relaxed);
            }
        }
    });

    // Pass 1: count vertices to allocate.
    let total_vtx: usize = mesh_structure
        .par_chunks(4)
        .map(|channels| {
            (0..3)
                .filter(|&e| channels[e].load(Ordering::Relaxed) == -1)
                .count()
        })
        .sum();
    log::info!("total vertex count = {}", total_vtx);

    // Pass 2: allocate vertex indices, interpolate attributes.
    let extract_colors = V::HAS_COLOR;
    let mut vertices = vec![Vec3::ZERO; total_vtx];
    let mut normals = vec![Vec3::ZERO; total_vtx];
    let mut colors = vec![Vec3::ZERO; if extract_colors { total_vtx } else { 0 }];
    let vtx_counter = AtomicU32::new(0);
    {
        let vertex_buf = ScatterBuffer::new(&mut vertices);
        let normal_buf = ScatterBuffer::new(&mut normals);
        let color_buf = ScatterBuffer::new(&mut colors);

        launch(n, |workload| {
            let entry = workload * 4;
            if (0..3).all(|e| mesh_structure[entry + e].load(Ordering::Relaxed) != -1) {
                return;
            }

            let block_pos = workload / r3;
            let voxel_idx = workload % r3;
            let slot = active.indices[block_pos] as usize;
            let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);
            let (xv, yv, zv) = (xv as i32, yv as i32, zv as i32);

            let base = keys[slot] * r;
            let voxel = &voxels[slot * r3 + voxel_idx];
            let tsdf_o = voxel.tsdf();
            let normal_o = access.normal_at(xv, yv, zv, block_pos);

            for e in 0..3 {
                if mesh_structure[entry + e].load(Ordering::Relaxed) != -1 {
                    continue;
                }
                let (xe, ye, ze) = (
                    xv + (e == 0) as i32,
                    yv + (e == 1) as i32,
                    zv + (e == 2) as i32,
                );
                let Some(voxel_e) = access.voxel_at(xe, ye, ze, block_pos) else {
                    continue;
                };
                let tsdf_e = voxel_e.tsdf();
                let ratio = -tsdf_o / (tsdf_e - tsdf_o);

                let idx = vtx_counter.fetch_add(1, Ordering::Relaxed) as usize;
                mesh_structure[entry + e].store(idx as i32, Ordering::Relaxed);

                vertex_buf.write(
                    idx,
                    voxel_size
                        * Vec3::new(
                            (base.x + xv) as f32 + ratio * (e == 0) as i32 as f32,
                            (base.y + yv) as f32 + ratio * (e == 1) as i32 as f32,
                            (base.z + zv) as f32 + ratio * (e == 2) as i32 as f32,
                        ),
                );

                let normal_e = access.normal_at(xe, ye, ze, block_pos);
                let nv = (1.0 - ratio) * normal_o + ratio * normal_e;
                normal_buf.write(idx, nv / (nv.length() + 1e-5));

                if extract_colors {
                    let c = (1.0 - ratio) * voxel.color() + ratio * voxel_e.color();
                    color_buf.write(idx, c / 255.0);
                }
            }
        });
    }

    // Pass 3: connect vertices into triangles.
    let mut triangles = vec![[0u32; 3]; total_vtx * 3];
    let tri_counter = AtomicU32::new(0);
    {
        let tri_buf = ScatterBuffer::new(&mut triangles);

        launch(n, |workload| {
            let table_idx = mesh_structure[workload * 4 + 3].load(Ordering::Relaxed) as usize;
            if TRI_COUNT[table_idx] == 0 {
                return;
            }

            let block_pos = workload / r3;
            let voxel_idx = workload % r3;
            let (xv, yv, zv) = voxel_coord(resolution, voxel_idx);
            let (xv, yv, zv) = (xv as i32, yv as i32, zv as i32);

            for tri in (0..16).step_by(3) {
                if TRI_TABLE[table_idx][tri] == -1 {
                    return;
                }
                let tri_idx = tri_counter.fetch_add(1, Ordering::Relaxed) as usize;

                let mut triangle = [0u32; 3];
                for vertex in 0..3 {
                    let edge = TRI_TABLE[table_idx][tri + vertex] as usize;
                    let shift = EDGE_SHIFTS[edge];
                    let channel = owner_channel(
                        xv + shift[0] as i32,
                        yv + shift[1] as i32,
                        zv + shift[2] as i32,
                        shift[3] as usize,
                        block_pos,
                    );
                    let vertex_idx = mesh_structure[channel].load(Ordering::Relaxed);
                    debug_assert!(vertex_idx >= 0);
                    // Reverse winding for outward normal orientation.
                    triangle[2 - vertex] = vertex_idx as u32;
                }
                tri_buf.write(tri_idx, triangle);
            }
        });
    }

    let total_tri = tri_counter.load(Ordering::Relaxed) as usize;
    triangles.truncate(total_tri);
    log::info!("total triangle count = {}", total_tri);

    Ok(SurfaceMesh {
        vertices,
        normals,
        colors: extract_colors.then_some(colors),
        triangles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::TsdfVoxel;
    use glam::IVec3;

    // A single negative voxel: corner of 8 surrounding cubes, each
    // clipping it with one triangle.
    #[test]
    fn single_negative_voxel_meshes_an_octahedron() {
        let mut grid = VoxelBlockGrid::new(8, 0.01, 0.04).unwrap();
        let slot = grid.allocate(IVec3::ZERO);
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    *grid.voxel_mut(slot, x, y, z) = TsdfVoxel {
                        tsdf: 0.5,
                        weight: 1.0,
                    };
                }
            }
        }
        *grid.voxel_mut(slot, 3, 3, 3) = TsdfVoxel {
            tsdf: -0.5,
            weight: 1.0,
        };

        let active = grid.active_blocks();
        let mesh = extract_surface_mesh(
            &grid,
            &active,
            &SurfaceMeshConfig {
                weight_threshold: 0.0,
            },
        )
        .unwrap();

        // The negative voxel is the corner of 8 surrounding cubes; its 6
        // incident axis edges each carry exactly one shared vertex, and
        // each of the 8 cubes emits one corner-clipping triangle.
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.triangles.len(), 8);
        assert!(mesh.colors.is_none());

        // All triangle indices resolve, and every vertex is referenced.
        let mut referenced = vec![false; mesh.vertices.len()];
        for t in &mesh.triangles {
            for &i in t {
                referenced[i as usize] = true;
            }
        }
        assert!(referenced.iter().all(|&r| r));

        // Every vertex sits at the midpoint of an edge incident to the
        // negative voxel (ratio 0.5 between +/-0.5 endpoints).
        for v in &mesh.vertices {
            let centered = *v / 0.01 - Vec3::new(3.0, 3.0, 3.0);
            assert!(
                (centered.length() - 0.5).abs() < 1e-5,
                "vertex {:?} not on a half-edge",
                v
            );
        }
    }

    #[test]
    fn empty_active_set_yields_empty_mesh() {
        let mut grid = VoxelBlockGrid::<TsdfVoxel>::new(8, 0.01, 0.04).unwrap();
        grid.allocate(IVec3::ZERO);
        let active = grid.active_subset(Vec::new());
        let mesh = extract_surface_mesh(&grid, &active, &SurfaceMeshConfig::default()).unwrap();
        assert!(mesh.vertices.is_empty());
        assert!(mesh.triangles.is_empty());
    }
}
