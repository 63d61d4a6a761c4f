//! Tiled super-resolution and mask-guided inpainting over ONNX models.

pub mod config;
pub mod engine;
pub mod inpaint;
pub mod layout;
pub mod logging;
pub mod runtime;
pub mod tiling;
pub mod types;
pub mod upscale;
