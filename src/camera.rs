//! Pinhole camera model and image indexing
//!
//! The fusion kernels consume posed depth/color frames from a calibrated
//! pinhole camera: a 3x3 intrinsic matrix `[[fx,0,cx],[0,fy,cy],[0,0,1]]`
//! and a rigid world-to-camera extrinsic (`glam::Affine3A`). No distortion
//! correction is applied.
//!
//! [`ImageView`] is a borrowed row-major `H x W x C` f32 indexer with the
//! half-open in-bounds test the kernels rely on; [`ImageBuffer`] is its
//! owned counterpart used for kernel outputs.
//!
//! Author: Moroya Sakamoto

use glam::{Vec2, Vec3};

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeIntrinsics {
    /// Focal length along x, in pixels.
    pub fx: f32,
    /// Focal length along y, in pixels.
    pub fy: f32,
    /// Principal point x.
    pub cx: f32,
    /// Principal point y.
    pub cy: f32,
}

impl PinholeIntrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        PinholeIntrinsics { fx, fy, cx, cy }
    }

    /// Extract intrinsics from a row-major 3x3 matrix.
    pub fn from_matrix(k: &[[f32; 3]; 3]) -> Self {
        PinholeIntrinsics {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    /// Project a camera-space point to pixel coordinates:
    /// `(u, v) = (fx * x / z + cx, fy * y / z + cy)`.
    #[inline(always)]
    pub fn project(&self, p: Vec3) -> Vec2 {
        let inv_z = 1.0 / p.z;
        Vec2::new(
            self.fx * p.x * inv_z + self.cx,
            self.fy * p.y * inv_z + self.cy,
        )
    }

    /// Unproject a pixel at the given depth back into camera space.
    #[inline(always)]
    pub fn unproject(&self, u: f32, v: f32, depth: f32) -> Vec3 {
        Vec3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }
}

/// Borrowed view over a contiguous row-major `H x W x C` f32 image.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [f32],
    /// Image height (rows).
    pub height: usize,
    /// Image width (columns).
    pub width: usize,
    /// Channels per pixel.
    pub channels: usize,
}

impl<'a> ImageView<'a> {
    /// Wrap a flat buffer. The buffer length must be `height * width * channels`.
    pub fn new(data: &'a [f32], height: usize, width: usize, channels: usize) -> Self {
        assert_eq!(
            data.len(),
            height * width * channels,
            "image buffer length does not match {}x{}x{}",
            height,
            width,
            channels
        );
        ImageView {
            data,
            height,
            width,
            channels,
        }
    }

    /// Half-open in-bounds test with integer truncation of `(u, v)`.
    #[inline(always)]
    pub fn in_bounds(&self, u: f32, v: f32) -> bool {
        u >= 0.0 && v >= 0.0 && (u as i64) < self.width as i64 && (v as i64) < self.height as i64
    }

    /// Channel slice of the pixel at `(u, v)` (column, row).
    #[inline(always)]
    pub fn pixel(&self, u: usize, v: usize) -> &'a [f32] {
        let offset = (v * self.width + u) * self.channels;
        &self.data[offset..offset + self.channels]
    }

    /// First channel of the pixel at `(u, v)`, the whole pixel for depth maps.
    #[inline(always)]
    pub fn at(&self, u: usize, v: usize) -> f32 {
        self.data[(v * self.width + u) * self.channels]
    }
}

/// Owned row-major `H x W x C` f32 image, produced by the ray-cast kernel.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    /// Flat pixel storage, length `height * width * channels`.
    pub data: Vec<f32>,
    /// Image height (rows).
    pub height: usize,
    /// Image width (columns).
    pub width: usize,
    /// Channels per pixel.
    pub channels: usize,
}

impl ImageBuffer {
    /// Allocate a zero-filled image.
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        ImageBuffer {
            data: vec![0.0; height * width * channels],
            height,
            width,
            channels,
        }
    }

    /// Borrow as an [`ImageView`].
    pub fn view(&self) -> ImageView<'_> {
        ImageView::new(&self.data, self.height, self.width, self.channels)
    }

    /// Channel slice of the pixel at `(u, v)`.
    #[inline(always)]
    pub fn pixel(&self, u: usize, v: usize) -> &[f32] {
        let offset = (v * self.width + u) * self.channels;
        &self.data[offset..offset + self.channels]
    }
}
