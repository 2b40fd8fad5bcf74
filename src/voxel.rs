//! TSDF voxel records (Deep Fried Edition)
//!
//! Two packed per-voxel payloads selected at grid creation time:
//! - [`TsdfVoxel`]: distance + weight (8 bytes)
//! - [`ColorTsdfVoxel`]: distance + weight + running RGB average (20 bytes)
//!
//! Kernels are monomorphized over the [`Voxel`] trait, so the color and
//! monochrome inner loops are compiled separately with no dynamic dispatch
//! in the hot path. The record byte size (`size_of::<V>()`) is the dispatch
//! key a device backend would switch on.
//!
//! Author: Moroya Sakamoto

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Per-voxel TSDF payload.
///
/// Invariants: `weight >= 0`; `tsdf` is only meaningful when `weight > 0`;
/// a freshly allocated (zeroed) voxel has `weight == 0`.
pub trait Voxel: Pod + Send + Sync + 'static {
    /// Whether the record carries RGB channels.
    const HAS_COLOR: bool;

    /// Truncated signed distance, normalized to `[-1, 1]`.
    fn tsdf(&self) -> f32;

    /// Accumulated observation weight.
    fn weight(&self) -> f32;

    /// Running RGB average in `[0, 255]` per channel (zero for monochrome).
    fn color(&self) -> Vec3;

    /// Fused TSDF update:
    /// `tsdf' = (w * tsdf + sdf) / (w + 1)`, `w' = w + 1`.
    fn integrate(&mut self, sdf: f32);

    /// Fused TSDF + color update. Monochrome records ignore the color term.
    fn integrate_with_color(&mut self, sdf: f32, color: Vec3);

    /// Saturate the weight at `max_weight`, turning the running average
    /// into an exponential moving average for long sequences.
    fn clamp_weight(&mut self, max_weight: f32);
}

/// Monochrome TSDF voxel: 4 + 4 = 8 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TsdfVoxel {
    /// Truncated signed distance in `[-1, 1]`.
    pub tsdf: f32,
    /// Observation weight, `0` = never observed.
    pub weight: f32,
}

impl Voxel for TsdfVoxel {
    const HAS_COLOR: bool = false;

    #[inline(always)]
    fn tsdf(&self) -> f32 {
        self.tsdf
    }

    #[inline(always)]
    fn weight(&self) -> f32 {
        self.weight
    }

    #[inline(always)]
    fn color(&self) -> Vec3 {
        Vec3::ZERO
    }

    #[inline(always)]
    fn integrate(&mut self, sdf: f32) {
        let w = self.weight;
        let inv_w = 1.0 / (w + 1.0);
        self.tsdf = (self.tsdf * w + sdf) * inv_w;
        self.weight = w + 1.0;
    }

    #[inline(always)]
    fn integrate_with_color(&mut self, sdf: f32, _color: Vec3) {
        self.integrate(sdf);
    }

    #[inline(always)]
    fn clamp_weight(&mut self, max_weight: f32) {
        self.weight = self.weight.min(max_weight);
    }
}

/// Color TSDF voxel: 8 + 12 = 20 bytes.
///
/// RGB channels hold a weighted running average in `[0, 255]`, updated with
/// the same fused rule as the distance channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ColorTsdfVoxel {
    /// Truncated signed distance in `[-1, 1]`.
    pub tsdf: f32,
    /// Observation weight, `0` = never observed.
    pub weight: f32,
    /// Red channel average.
    pub r: f32,
    /// Green channel average.
    pub g: f32,
    /// Blue channel average.
    pub b: f32,
}

impl Voxel for ColorTsdfVoxel {
    const HAS_COLOR: bool = true;

    #[inline(always)]
    fn tsdf(&self) -> f32 {
        self.tsdf
    }

    #[inline(always)]
    fn weight(&self) -> f32 {
        self.weight
    }

    #[inline(always)]
    fn color(&self) -> Vec3 {
        Vec3::new(self.r, self.g, self.b)
    }

    #[inline(always)]
    fn integrate(&mut self, sdf: f32) {
        let w = self.weight;
        let inv_w = 1.0 / (w + 1.0);
        self.tsdf = (self.tsdf * w + sdf) * inv_w;
        self.weight = w + 1.0;
    }

    #[inline(always)]
    fn integrate_with_color(&mut self, sdf: f32, color: Vec3) {
        let w = self.weight;
        let inv_w = 1.0 / (w + 1.0);
        self.tsdf = (self.tsdf * w + sdf) * inv_w;
        self.r = (self.r * w + color.x) * inv_w;
        self.g = (self.g * w + color.y) * inv_w;
        self.b = (self.b * w + color.z) * inv_w;
        self.weight = w + 1.0;
    }

    #[inline(always)]
    fn clamp_weight(&mut self, max_weight: f32) {
        self.weight = self.weight.min(max_weight);
    }
}
