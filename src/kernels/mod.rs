//! Data-parallel fusion kernels
//!
//! The five bulk operations over the sparse voxel storage:
//!
//! - [`integrate`]: fuse a posed depth/color frame into the TSDF
//! - [`extract_surface_points`]: zero-crossing point samples
//! - [`extract_surface_mesh`]: watertight Marching Cubes triangle mesh
//! - [`estimate_range`]: per-pixel near/far bounds for ray casting
//! - [`ray_cast`]: sphere-traced depth/vertex/color/normal maps
//!
//! Every kernel is a parallel map over a flat workload space; shared state
//! is limited to atomic compaction counters, value-stable structure marks
//! and atomic float min/max folds. Output ordering is unspecified.
//!
//! Author: Moroya Sakamoto

pub mod integrate;
pub mod range;
pub mod raycast;
pub mod surface_mesh;
pub mod surface_points;
pub mod tables;

pub use integrate::{integrate, IntegrateConfig};
pub use range::{estimate_range, RangeConfig, RangeMap, FRAGMENT_SIZE};
pub use raycast::{ray_cast, RayCastConfig, RayCastMaps};
pub use surface_mesh::{extract_surface_mesh, MeshError, SurfaceMesh, SurfaceMeshConfig};
pub use surface_points::{extract_surface_points, SurfacePoints, SurfacePointsConfig};
