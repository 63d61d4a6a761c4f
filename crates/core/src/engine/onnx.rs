//! ONNX Runtime implementations of the engine traits.
//!
//! Input and output names are resolved once at load time from the model's
//! declared IO order, never guessed per call.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::{Array4, Ix4};
use ort::{session::Session, value::Tensor};
use tracing::{debug, info};

use super::backend::{build_session, InferenceBackend, SessionConfig};
use super::{InpaintEngine, UpscaleEngine, ENGINE_NOT_INITIALIZED};

struct LoadedUpscaler {
    session: Session,
    input_name: String,
    output_name: String,
    is_fp16: bool,
}

/// Super-resolution model behind an `ort::Session`.
///
/// Created unloaded; [`OnnxUpscaler::load`] must succeed before tiles are
/// accepted. FP16 models are fed half-precision tiles converted on the fly.
pub struct OnnxUpscaler {
    model_path: PathBuf,
    backend: InferenceBackend,
    trt_cache_dir: Option<PathBuf>,
    loaded: Option<LoadedUpscaler>,
}

impl OnnxUpscaler {
    pub fn new(model_path: impl Into<PathBuf>, backend: InferenceBackend) -> Self {
        Self {
            model_path: model_path.into(),
            backend,
            trt_cache_dir: None,
            loaded: None,
        }
    }

    pub fn with_trt_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trt_cache_dir = Some(dir.into());
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_fp16(&self) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.is_fp16)
    }

    pub fn load(&mut self) -> Result<()> {
        debug!(
            model = %self.model_path.display(),
            backend = %self.backend,
            "Loading ONNX super-resolution model"
        );

        let session = build_session(&SessionConfig {
            model_path: &self.model_path,
            backend: self.backend,
            trt_cache_dir: self.trt_cache_dir.as_deref(),
        })?;

        let input = session
            .inputs()
            .first()
            .context("super-resolution model declares no inputs")?;
        let input_name = input.name().to_string();
        let is_fp16 = match input.dtype() {
            ort::value::ValueType::Tensor { ty, .. } => {
                *ty == ort::tensor::TensorElementType::Float16
            }
            _ => false,
        };
        let output_name = session
            .outputs()
            .first()
            .context("super-resolution model declares no outputs")?
            .name()
            .to_string();

        info!(%input_name, %output_name, is_fp16, "Super-resolution model loaded");

        self.loaded = Some(LoadedUpscaler {
            session,
            input_name,
            output_name,
            is_fp16,
        });
        Ok(())
    }
}

fn run_f32(session: &mut Session, tile: Array4<f32>, input: &str, output: &str) -> Result<Array4<f32>> {
    let input_tensor = Tensor::from_array(tile)?;
    let outputs = session.run(ort::inputs![input => &input_tensor])?;
    let output_view = outputs[output].try_extract_array::<f32>()?;
    Ok(output_view.to_owned().into_dimensionality::<Ix4>()?)
}

fn run_f16(session: &mut Session, tile: Array4<f32>, input: &str, output: &str) -> Result<Array4<f32>> {
    let shape = tile.dim();
    let contiguous = tile.as_standard_layout();
    let f32_slice = contiguous
        .as_slice()
        .context("tile must be contiguous for f16 conversion")?;
    let mut fp16_data = vec![f16::ZERO; f32_slice.len()];
    fp16_data.convert_from_f32_slice(f32_slice);

    let fp16_array = Array4::from_shape_vec(shape, fp16_data)?;
    let input_tensor = Tensor::from_array(fp16_array)?;
    let outputs = session.run(ort::inputs![input => &input_tensor])?;
    let output_view = outputs[output].try_extract_array::<f16>()?;

    let fp16_owned = output_view.as_standard_layout();
    let fp16_slice = fp16_owned
        .as_slice()
        .context("f16 output must be contiguous")?;
    let mut f32_data = vec![0.0f32; fp16_slice.len()];
    fp16_slice.convert_to_f32_slice(&mut f32_data);

    let out_shape = output_view.shape().to_vec();
    if out_shape.len() != 4 {
        bail!("expected a 4-D output tensor, got shape {out_shape:?}");
    }
    Ok(Array4::from_shape_vec(
        (out_shape[0], out_shape[1], out_shape[2], out_shape[3]),
        f32_data,
    )?)
}

impl UpscaleEngine for OnnxUpscaler {
    fn is_ready(&self) -> bool {
        self.loaded.is_some()
    }

    fn upscale_tile(&mut self, tile: Array4<f32>) -> Result<Array4<f32>> {
        let loaded = self.loaded.as_mut().context(ENGINE_NOT_INITIALIZED)?;
        if loaded.is_fp16 {
            run_f16(&mut loaded.session, tile, &loaded.input_name, &loaded.output_name)
        } else {
            run_f32(&mut loaded.session, tile, &loaded.input_name, &loaded.output_name)
        }
    }
}

struct LoadedInpainter {
    session: Session,
    image_input: String,
    mask_input: String,
    output_name: String,
}

/// Inpainting model with two u8 inputs (image at index 0, mask at index 1).
pub struct OnnxInpainter {
    model_path: PathBuf,
    backend: InferenceBackend,
    loaded: Option<LoadedInpainter>,
}

impl OnnxInpainter {
    pub fn new(model_path: impl Into<PathBuf>, backend: InferenceBackend) -> Self {
        Self {
            model_path: model_path.into(),
            backend,
            loaded: None,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn load(&mut self) -> Result<()> {
        debug!(
            model = %self.model_path.display(),
            backend = %self.backend,
            "Loading ONNX inpainting model"
        );

        let session = build_session(&SessionConfig {
            model_path: &self.model_path,
            backend: self.backend,
            trt_cache_dir: None,
        })?;

        let inputs = session.inputs();
        if inputs.len() < 2 {
            bail!(
                "inpainting model must declare image and mask inputs, found {}",
                inputs.len()
            );
        }
        let image_input = inputs[0].name().to_string();
        let mask_input = inputs[1].name().to_string();
        let output_name = session
            .outputs()
            .first()
            .context("inpainting model declares no outputs")?
            .name()
            .to_string();

        info!(%image_input, %mask_input, %output_name, "Inpainting model loaded");

        self.loaded = Some(LoadedInpainter {
            session,
            image_input,
            mask_input,
            output_name,
        });
        Ok(())
    }
}

impl InpaintEngine for OnnxInpainter {
    fn is_ready(&self) -> bool {
        self.loaded.is_some()
    }

    fn inpaint(&mut self, image: Array4<u8>, mask: Array4<u8>) -> Result<Array4<u8>> {
        let loaded = self.loaded.as_mut().context(ENGINE_NOT_INITIALIZED)?;

        let image_tensor = Tensor::from_array(image)?;
        let mask_tensor = Tensor::from_array(mask)?;
        let outputs = loaded.session.run(ort::inputs![
            loaded.image_input.as_str() => &image_tensor,
            loaded.mask_input.as_str() => &mask_tensor,
        ])?;
        let output_view = outputs[loaded.output_name.as_str()].try_extract_array::<u8>()?;
        Ok(output_view.to_owned().into_dimensionality::<Ix4>()?)
    }
}
