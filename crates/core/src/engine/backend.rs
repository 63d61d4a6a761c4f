//! Execution provider selection for ONNX Runtime sessions.
//!
//! Provides [`InferenceBackend`] and [`build_session`], which registers the
//! requested execution providers and optional TensorRT engine caching.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Inference backend selection.
///
/// `Tensorrt` needs the TensorRT runtime (`libnvinfer.so.10` or `nvinfer.dll`);
/// when it is missing ORT falls back to the CUDA EP registered after it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackend {
    Cpu,
    #[default]
    Cuda,
    Tensorrt,
}

impl InferenceBackend {
    /// Parse from string (case-insensitive). Returns `Cuda` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "tensorrt" | "trt" => Self::Tensorrt,
            _ => Self::Cuda,
        }
    }
}

impl std::fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Tensorrt => write!(f, "tensorrt"),
        }
    }
}

pub struct SessionConfig<'a> {
    pub model_path: &'a Path,
    pub backend: InferenceBackend,
    pub trt_cache_dir: Option<&'a Path>,
}

/// File count and total size of a TRT engine cache directory (non-recursive).
fn cache_footprint(dir: &Path) -> (u64, u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0);
    };

    entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .fold((0, 0), |(files, bytes), meta| (files + 1, bytes + meta.len()))
}

fn load_failure(model_path: &Path) -> String {
    format!("Failed to load ONNX model: {}", model_path.display())
}

/// Build an `ort::Session` for `config.backend`.
///
/// - `Tensorrt`: TRT EP with engine cache, CUDA EP as fallback.
/// - `Cuda`: CUDA EP only (ORT itself falls back to CPU if it cannot initialize).
/// - `Cpu`: no execution providers registered.
pub fn build_session(config: &SessionConfig<'_>) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let model_path = config.model_path;

    let session = match config.backend {
        InferenceBackend::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .unwrap_or_else(|| Path::new("trt_cache"));
            if let Err(e) = std::fs::create_dir_all(cache_dir) {
                warn!(
                    dir = %cache_dir.display(),
                    error = %e,
                    "Failed to create TRT cache directory"
                );
            }

            let (files_before, bytes_before) = cache_footprint(cache_dir);
            info!(
                cache_dir = %cache_dir.display(),
                cache_files = files_before,
                cache_bytes = bytes_before,
                "Initializing TensorRT session (first run may take several minutes)"
            );

            let cache_path = cache_dir.to_string_lossy().to_string();
            let started = Instant::now();
            let result = builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .with_engine_cache_path(&cache_path)
                        .with_fp16(true)
                        .with_device_id(0)
                        .build(),
                    CUDAExecutionProvider::default().build(),
                ])?
                .commit_from_file(model_path)
                .with_context(|| load_failure(model_path));

            let elapsed_secs = started.elapsed().as_secs_f64();
            let (files_after, bytes_after) = cache_footprint(cache_dir);
            match result {
                Ok(session) => {
                    info!(
                        elapsed_secs,
                        cache_updated = files_after > files_before || bytes_after > bytes_before,
                        cache_files = files_after,
                        cache_bytes = bytes_after,
                        "TensorRT session ready"
                    );
                    session
                }
                Err(e) => {
                    error!(
                        elapsed_secs,
                        cache_dir = %cache_dir.display(),
                        error = %e,
                        "TensorRT session initialization failed"
                    );
                    return Err(e);
                }
            }
        }
        InferenceBackend::Cuda => {
            if !CUDAExecutionProvider::default()
                .is_available()
                .unwrap_or(false)
            {
                warn!("CUDA EP is not available; inference will fall back to CPU");
            }

            debug!(backend = "cuda", "Building session with CUDA EP");
            builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .build()
                    .error_on_failure()])?
                .commit_from_file(model_path)
                .with_context(|| load_failure(model_path))?
        }
        InferenceBackend::Cpu => {
            debug!(backend = "cpu", "Building session without execution providers");
            builder
                .commit_from_file(model_path)
                .with_context(|| load_failure(model_path))?
        }
    };

    Ok(session)
}
