use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use tilescale_core::config::{config_path, data_dir, initialize_data_dir, AppConfig, TilingConfig};
use tilescale_core::engine::{
    InferenceBackend, NearestUpscaler, OnnxInpainter, OnnxUpscaler, UpscaleEngine,
};
use tilescale_core::layout::ValueRange;
use tilescale_core::logging::{self, FileSinkPlan, LoggingInitOptions, PanicHookInstallPlan, DEFAULT_LOG_FILTER};
use tilescale_core::runtime::{log_runtime_lib_status, setup_runtime_libs};
use tilescale_core::tiling::TileGrid;
use tilescale_core::types::ImageBuffer;
use tilescale_core::upscale::{super_resolve, TileProgress, UpscaleSettings};

#[derive(Parser)]
#[command(
    name = "tilescale",
    about = "Tiled 4x super-resolution and mask-guided inpainting with ONNX models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale an image tile by tile.
    Upscale(UpscaleArgs),
    /// Repair the masked regions of an image.
    Inpaint(InpaintArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum EngineKind {
    Onnx,
    /// Pixel replication, no model required.
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RangeArg {
    /// Samples in [0, 1].
    Unit,
    /// Samples in [0, 255].
    Byte,
}

impl From<RangeArg> for ValueRange {
    fn from(arg: RangeArg) -> Self {
        match arg {
            RangeArg::Unit => ValueRange::Unit,
            RangeArg::Byte => ValueRange::Byte,
        }
    }
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Input image (PNG, JPEG or WebP)")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output PNG path (default: <input>_x<scale>.png)")]
    output: Option<PathBuf>,
    #[arg(long, help = "Super-resolution ONNX model (overrides config)")]
    model: Option<PathBuf>,
    #[arg(long)]
    tile_size: Option<usize>,
    #[arg(long)]
    tile_padding: Option<usize>,
    #[arg(long)]
    scale: Option<usize>,
    #[arg(long, value_enum, help = "Sample range the model expects")]
    value_range: Option<RangeArg>,
    #[arg(long, value_name = "cpu|cuda|tensorrt")]
    backend: Option<String>,
    #[arg(long, value_enum, default_value_t = EngineKind::Onnx)]
    engine: EngineKind,
    #[arg(long, value_name = "PATH", help = "Write a JSON run summary")]
    summary_json: Option<PathBuf>,
}

#[derive(Args)]
struct InpaintArgs {
    image: PathBuf,
    #[arg(help = "Mask image; white keeps, anything else is repaired")]
    mask: PathBuf,
    #[arg(short = 'o', long, help = "Output PNG path (default: <image>_inpainted.png)")]
    output: Option<PathBuf>,
    #[arg(long, help = "Inpainting ONNX model (overrides config)")]
    model: Option<PathBuf>,
    #[arg(long, value_name = "cpu|cuda|tensorrt")]
    backend: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    input: PathBuf,
    output: PathBuf,
    engine: EngineKind,
    backend: Option<InferenceBackend>,
    input_width: u32,
    input_height: u32,
    output_width: u32,
    output_height: u32,
    tile_size: usize,
    tile_padding: usize,
    scale: usize,
    value_range: ValueRange,
    tiles: usize,
    elapsed_secs: f64,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    let runtime_report = setup_runtime_libs();
    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_runtime_lib_status(&runtime_report);
    log_startup_metadata(&resolved_data_dir);

    let config = load_config(&resolved_data_dir);
    match cli.command {
        Commands::Upscale(args) => run_upscale(args, &config, &resolved_data_dir),
        Commands::Inpaint(args) => run_inpaint(args, &config, &resolved_data_dir),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let panic_hook_plan = logging::install_panic_hook(data_dir);
    if let PanicHookInstallPlan::Fallback {
        attempted_crash_dir,
        reason,
    } = &panic_hook_plan
    {
        eprintln!(
            "Warning: panic crash artifact hook unavailable (path: {}; reason: {reason}). Panics will not be persisted to crash logs.",
            display_or_none(attempted_crash_dir.as_deref())
        );
    }

    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let console_filter = parse_env_filter_with_fallback(&init_plan.filters.console_filter, "console");

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let file_filter = parse_env_filter_with_fallback(&init_plan.filters.file_filter, "file");
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(console_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(file_filter),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(console_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %display_or_none(fallback.attempted_log_dir.as_deref()),
                reason = %fallback.reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }

    if let PanicHookInstallPlan::Fallback { reason, .. } = panic_hook_plan {
        warn!(reason = %reason, "Panic crash artifact hook unavailable");
    }
}

fn display_or_none(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn load_config(data_dir: &Path) -> AppConfig {
    if let Err(e) = initialize_data_dir(data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    match AppConfig::load_from_path(&config_path(data_dir)) {
        Ok(config) => config,
        Err(err) => {
            let error = format!("{err:#}");
            warn!(%error, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    }
}

/// Apply CLI overrides on top of the `[tiling]` section.
fn resolve_settings(tiling: &TilingConfig, args: &UpscaleArgs) -> Result<UpscaleSettings> {
    let merged = TilingConfig {
        tile_size: args.tile_size.unwrap_or(tiling.tile_size),
        tile_padding: args.tile_padding.unwrap_or(tiling.tile_padding),
        scale: args.scale.unwrap_or(tiling.scale),
        value_range: args.value_range.map(ValueRange::from).unwrap_or(tiling.value_range),
    };
    Ok(UpscaleSettings::new(merged.geometry()?, merged.value_range))
}

fn resolve_backend(cli: Option<&str>, config: &AppConfig) -> InferenceBackend {
    cli.map(InferenceBackend::from_str_lossy)
        .unwrap_or(config.inference.backend)
}

/// `<dir>/<stem><suffix>.png` next to `input`.
fn default_output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}{suffix}.png"))
}

fn load_rgb(path: &Path) -> Result<ImageBuffer> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to decode image: {}", path.display()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    ImageBuffer::new(decoded.into_raw(), width, height, 3)
}

/// Decode a mask as luma, bilinearly resized to `width`x`height` when needed.
fn load_mask(path: &Path, width: u32, height: u32) -> Result<ImageBuffer> {
    let mut gray = image::open(path)
        .with_context(|| format!("failed to decode mask: {}", path.display()))?
        .to_luma8();
    if gray.dimensions() != (width, height) {
        info!(
            from_width = gray.width(),
            from_height = gray.height(),
            width,
            height,
            "Resizing mask to image size"
        );
        gray = image::imageops::resize(&gray, width, height, image::imageops::FilterType::Triangle);
    }
    ImageBuffer::new(gray.into_raw(), width, height, 1)
}

fn save_rgba(image: ImageBuffer, path: &Path) -> Result<()> {
    let (width, height) = (image.width(), image.height());
    let rgba = image::RgbaImage::from_raw(width, height, image.into_raw())
        .context("output buffer does not match its dimensions")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }
    rgba.save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write image: {}", path.display()))
}

fn run_upscale(args: UpscaleArgs, config: &AppConfig, data_dir: &Path) -> Result<()> {
    let settings = resolve_settings(&config.tiling, &args)?;
    let geometry = settings.geometry;
    let source = load_rgb(&args.input)?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, &format!("_x{}", geometry.scale())));

    let (mut engine, backend) = match args.engine {
        EngineKind::Nearest => (
            Box::new(NearestUpscaler::new(geometry.scale())) as Box<dyn UpscaleEngine>,
            None,
        ),
        EngineKind::Onnx => {
            let backend = resolve_backend(args.backend.as_deref(), config);
            let model = args
                .model
                .clone()
                .unwrap_or_else(|| config.upscale_model_path(data_dir));
            let mut onnx =
                OnnxUpscaler::new(model, backend).with_trt_cache_dir(config.trt_cache_dir(data_dir));
            onnx.load()?;
            (Box::new(onnx) as Box<dyn UpscaleEngine>, Some(backend))
        }
    };

    let tiles = TileGrid::plan(source.width() as usize, source.height() as usize, geometry)?
        .total_tiles();
    let started = Instant::now();
    let result = super_resolve(engine.as_mut(), &source, &settings, |progress| {
        eprint!("\r{}    ", render_progress(progress, started.elapsed().as_secs_f64()));
    });
    eprintln!();
    let upscaled = result?;
    let elapsed_secs = started.elapsed().as_secs_f64();

    let summary = RunSummary {
        input: args.input.clone(),
        output: output_path.clone(),
        engine: args.engine,
        backend,
        input_width: source.width(),
        input_height: source.height(),
        output_width: upscaled.width(),
        output_height: upscaled.height(),
        tile_size: geometry.tile_size(),
        tile_padding: geometry.tile_padding(),
        scale: geometry.scale(),
        value_range: settings.range,
        tiles,
        elapsed_secs,
    };

    save_rgba(upscaled, &output_path)?;
    info!(
        output = %output_path.display(),
        tiles,
        elapsed = %format_duration(elapsed_secs),
        "Upscale finished"
    );

    if let Some(path) = &args.summary_json {
        write_summary(&summary, path)?;
    }
    Ok(())
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let encoded = serde_json::to_string_pretty(summary).context("failed to encode run summary")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write run summary: {}", path.display()))
}

fn run_inpaint(args: InpaintArgs, config: &AppConfig, data_dir: &Path) -> Result<()> {
    let image = load_rgb(&args.image)?;
    let mask = load_mask(&args.mask, image.width(), image.height())?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.image, "_inpainted"));

    let backend = resolve_backend(args.backend.as_deref(), config);
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.inpaint_model_path(data_dir));
    let mut engine = OnnxInpainter::new(model, backend);
    engine.load()?;

    let started = Instant::now();
    let repaired = tilescale_core::inpaint::inpaint(&mut engine, &image, &mask)?;
    save_rgba(repaired, &output_path)?;
    info!(
        output = %output_path.display(),
        elapsed = %format_duration(started.elapsed().as_secs_f64()),
        "Inpaint finished"
    );
    Ok(())
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

const PROGRESS_BAR_WIDTH: usize = 30;

fn render_progress(progress: &TileProgress, total_elapsed: f64) -> String {
    let fraction = if progress.total > 0 {
        (progress.completed as f64 / progress.total as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let empty = PROGRESS_BAR_WIDTH.saturating_sub(filled);
    let bar: String = "█".repeat(filled) + &"░".repeat(empty);

    let eta = if progress.is_done() {
        String::new()
    } else {
        format!(" | ETA: {}", format_duration(progress.remaining.as_secs_f64()))
    };

    format!(
        "[{}] {:3}% | Tile {}/{} | {} ms/tile | Elapsed: {}{}",
        bar,
        progress.percent,
        progress.completed,
        progress.total,
        progress.tile_elapsed.as_millis(),
        format_duration(total_elapsed),
        eta,
    )
}
