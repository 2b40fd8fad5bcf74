//! # ALICE-Fusion
//!
//! **A.L.I.C.E. - Adaptive Lightweight Incremental Carving Engine**
//!
//! A sparse volumetric fusion engine around a truncated signed distance
//! field (TSDF) stored as a hash-indexed grid of fixed-resolution voxel
//! blocks. Posed depth (and optional color) frames from a calibrated
//! pinhole camera fold into a running weighted average of the distance to
//! the nearest observed surface; surfaces read back as point clouds,
//! watertight triangle meshes, or ray-cast depth/vertex/color/normal maps.
//!
//! ## Features
//!
//! - **Integration**: per-voxel fused TSDF/color updates, optional weight cap
//! - **Point extraction**: zero-crossing samples with normals and colors
//! - **Mesh extraction**: Marching Cubes with globally consistent vertex
//!   indexing across block boundaries
//! - **Range estimation**: per-pixel ray bounds from the allocated blocks
//! - **Ray casting**: sphere tracing with trilinear color/normal lookup
//!
//! ## Example
//!
//! ```rust
//! use alice_fusion::prelude::*;
//! use glam::Affine3A;
//!
//! // 8^3 blocks of 1 cm voxels, 4 cm truncation band.
//! let mut grid: VoxelBlockGrid<TsdfVoxel> = VoxelBlockGrid::new(8, 0.01, 0.04).unwrap();
//!
//! // A 1x1 depth frame observing a surface 1 m straight ahead.
//! let depth = [1.0f32];
//! let image = ImageView::new(&depth, 1, 1, 1);
//! let intrinsics = PinholeIntrinsics::new(1.0, 1.0, 0.0, 0.0);
//!
//! grid.touch(&image, &intrinsics, &Affine3A::IDENTITY, 1.0, 3.0, 1);
//! let indices: Vec<i64> = (0..grid.n_blocks() as i64).collect();
//! let config = IntegrateConfig { depth_scale: 1.0, depth_max: 3.0, max_weight: None };
//! integrate(&mut grid, &indices, &image, None, &intrinsics, &Affine3A::IDENTITY, &config);
//!
//! // The voxel on the surface carries a zero crossing.
//! let slot = grid.find_block(glam::IVec3::new(0, 0, 12)).unwrap();
//! let voxel = grid.voxel(slot, 0, 0, 4);
//! assert_eq!(voxel.weight, 1.0);
//! assert!(voxel.tsdf.abs() < 1e-6);
//! ```
//!
//! ## Author
//!
//! Moroya Sakamoto

#![warn(missing_docs)]

pub mod camera;
pub mod grid;
pub mod kernels;
pub mod voxel;

mod launch;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::camera::{ImageBuffer, ImageView, PinholeIntrinsics};
    pub use crate::grid::{
        ActiveBlocks, BlockIndex, GridError, HashedVoxelAccess, IndexedVoxelAccess, VoxelBlockGrid,
    };
    pub use crate::kernels::{
        estimate_range, extract_surface_mesh, extract_surface_points, integrate, ray_cast,
        IntegrateConfig, MeshError, RangeConfig, RangeMap, RayCastConfig, RayCastMaps, SurfaceMesh,
        SurfaceMeshConfig, SurfacePoints, SurfacePointsConfig,
    };
    pub use crate::voxel::{ColorTsdfVoxel, TsdfVoxel, Voxel};
    pub use glam::{Affine3A, IVec3, Vec3};
}

// Re-exports for convenience
pub use grid::VoxelBlockGrid;
pub use kernels::{extract_surface_mesh, extract_surface_points, integrate, ray_cast};
pub use voxel::{ColorTsdfVoxel, TsdfVoxel};
