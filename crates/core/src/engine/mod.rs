//! Inference engine capabilities injected into the pipelines.
//!
//! Engines are owned by the caller and borrowed `&mut` for each call, so at
//! most one inference is in flight per engine.

pub mod backend;
pub mod onnx;

use anyhow::{bail, Result};
use ndarray::Array4;

pub use backend::{build_session, InferenceBackend, SessionConfig};
pub use onnx::{OnnxInpainter, OnnxUpscaler};

pub(crate) const ENGINE_NOT_INITIALIZED: &str = "inference engine is not initialized";

/// Fixed-shape tile upscaler: `[1, C, T, T]` in, `[1, C, T * scale, T * scale]` out.
pub trait UpscaleEngine {
    /// Whether the engine can accept calls (e.g. a model session is loaded).
    fn is_ready(&self) -> bool {
        true
    }

    fn upscale_tile(&mut self, tile: Array4<f32>) -> Result<Array4<f32>>;
}

/// Single-pass mask-guided inpainter over 8-bit planar tensors.
///
/// `image` is `[1, 3, H, W]`, `mask` is `[1, 1, H, W]` with 255 marking pixels
/// to repair; the result is `[1, 3, H, W]`.
pub trait InpaintEngine {
    fn is_ready(&self) -> bool {
        true
    }

    fn inpaint(&mut self, image: Array4<u8>, mask: Array4<u8>) -> Result<Array4<u8>>;
}

/// Pixel-replication upscaler. Useful to check tiling geometry without a model:
/// a seam-free tiled run is identical to upscaling the whole image at once.
#[derive(Debug, Clone)]
pub struct NearestUpscaler {
    scale: usize,
    calls: usize,
}

impl NearestUpscaler {
    pub fn new(scale: usize) -> Self {
        Self { scale, calls: 0 }
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Number of tiles processed so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl UpscaleEngine for NearestUpscaler {
    fn is_ready(&self) -> bool {
        self.scale > 0
    }

    fn upscale_tile(&mut self, tile: Array4<f32>) -> Result<Array4<f32>> {
        let s = self.scale;
        if s == 0 {
            bail!("NearestUpscaler: scale must be at least 1");
        }

        self.calls += 1;
        let (n, c, h, w) = tile.dim();
        Ok(Array4::from_shape_fn((n, c, h * s, w * s), |(b, ch, y, x)| {
            tile[[b, ch, y / s, x / s]]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_upscaler_replicates_pixels() {
        let tile = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mut engine = NearestUpscaler::new(2);

        let out = engine.upscale_tile(tile).unwrap();
        assert_eq!(out.shape(), &[1, 1, 4, 4]);
        assert_eq!(
            out.as_slice().unwrap(),
            &[1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 3.0, 3.0, 4.0, 4.0]
        );
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn test_nearest_upscaler_zero_scale_is_not_ready() {
        let mut engine = NearestUpscaler::new(0);
        assert!(!engine.is_ready());
        assert!(engine.upscale_tile(Array4::zeros((1, 3, 4, 4))).is_err());
        assert_eq!(engine.calls(), 0);
    }
}
