//! Benchmarks for the fusion kernels
//!
//! Author: Moroya Sakamoto

use alice_fusion::kernels::estimate_range;
use alice_fusion::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sphere_grid(center: Vec3, radius: f32) -> VoxelBlockGrid<TsdfVoxel> {
    let mut grid = VoxelBlockGrid::new(8, 0.02, 0.06).unwrap();
    let block_size = grid.block_size();
    let margin = grid.sdf_trunc() + block_size;
    let lo = ((center - Vec3::splat(radius + margin)) / block_size)
        .floor()
        .as_ivec3();
    let hi = ((center + Vec3::splat(radius + margin)) / block_size)
        .floor()
        .as_ivec3();
    for x in lo.x..=hi.x {
        for y in lo.y..=hi.y {
            for z in lo.z..=hi.z {
                grid.allocate(IVec3::new(x, y, z));
            }
        }
    }

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
                        tsdf: (((p - center).length() - radius) / sdf_trunc).clamp(-1.0, 1.0),
                        weight: 4.0,
                    };
                }
            }
        }
    }
    grid
}

fn bench_integrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrate");

    let depth = vec![1500.0f32; 240 * 320];
    let image = ImageView::new(&depth, 240, 320, 1);
    let intrinsics = PinholeIntrinsics::new(260.0, 260.0, 160.0, 120.0);
    let config = IntegrateConfig::default();

    group.bench_function("vga_quarter_depth", |b| {
        let mut grid: VoxelBlockGrid<TsdfVoxel> = VoxelBlockGrid::new(8, 0.01, 0.04).unwrap();
        grid.touch(&image, &intrinsics, &Affine3A::IDENTITY, 1000.0, 3.0, 4);
        let indices: Vec<i64> = (0..grid.n_blocks() as i64).collect();
        b.iter(|| {
            integrate(
                black_box(&mut grid),
                &indices,
                &image,
                None,
                &intrinsics,
                &Affine3A::IDENTITY,
                &config,
            )
        })
    });

    group.finish();
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");

    let grid = sphere_grid(Vec3::new(0.013, -0.011, 1.203), 0.3);
    let active = grid.active_blocks();

    group.bench_function("surface_points", |b| {
        let config = SurfacePointsConfig {
            weight_threshold: 1.0,
            estimated_point_count: Some(200_000),
            with_normals: true,
            with_colors: false,
        };
        b.iter(|| extract_surface_points(black_box(&grid), &active, &config))
    });

    group.bench_function("surface_mesh", |b| {
        let config = SurfaceMeshConfig {
            weight_threshold: 1.0,
        };
        b.iter(|| extract_surface_mesh(black_box(&grid), &active, &config).unwrap())
    });

    group.finish();
}

fn bench_raycast(c: &mut Criterion) {
    let mut group = c.benchmark_group("raycast");

    let grid = sphere_grid(Vec3::new(0.013, -0.011, 1.203), 0.3);
    let frozen = grid.frozen_index();
    let intrinsics = PinholeIntrinsics::new(260.0, 260.0, 160.0, 120.0);
    let config = RayCastConfig {
        depth_scale: 1.0,
        weight_threshold: 1.0,
        with_depth: true,
        with_vertex: true,
        with_normal: true,
        ..RayCastConfig::default()
    };

    group.bench_function("qvga_depth_vertex_normal", |b| {
        b.iter(|| {
            ray_cast(
                black_box(&grid),
                &frozen,
                &intrinsics,
                &Affine3A::IDENTITY,
                None,
                240,
                320,
                &config,
            )
        })
    });

    group.bench_function("estimate_range", |b| {
        b.iter(|| {
            estimate_range(
                black_box(grid.block_keys()),
                grid.resolution(),
                grid.voxel_size(),
                &intrinsics,
                &Affine3A::IDENTITY,
                240,
                320,
                &RangeConfig::default(),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_integrate, bench_extraction, bench_raycast);
criterion_main!(benches);
