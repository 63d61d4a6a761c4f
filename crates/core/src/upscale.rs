//! Tiled super-resolution over an injected [`UpscaleEngine`].

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ndarray::{Array4, ArrayView4};
use tracing::{debug, info};

use crate::engine::{UpscaleEngine, ENGINE_NOT_INITIALIZED};
use crate::layout::{image_to_planar, planar_to_image, ValueRange};
use crate::tiling::{extract_tile, stitch_tile, TileGeometry, TileGrid};
use crate::types::ImageBuffer;

/// Progress report emitted after each stitched tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileProgress {
    pub completed: usize,
    pub total: usize,
    /// `round(100 * completed / total)`
    pub percent: u8,
    pub tile_elapsed: Duration,
    /// Estimate from the last tile's duration.
    pub remaining: Duration,
}

impl TileProgress {
    fn new(completed: usize, total: usize, tile_elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (completed as f64 * 100.0 / total as f64).round() as u8
        };
        let left = total.saturating_sub(completed) as u32;
        Self {
            completed,
            total,
            percent,
            tile_elapsed,
            remaining: tile_elapsed * left,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpscaleSettings {
    pub geometry: TileGeometry,
    pub range: ValueRange,
}

impl UpscaleSettings {
    pub fn new(geometry: TileGeometry, range: ValueRange) -> Self {
        Self { geometry, range }
    }
}

/// Upscale a planar `[1, C, H, W]` tensor tile by tile.
///
/// Tiles run sequentially in column-major order. The first engine error
/// aborts the run and the partially written output is dropped.
pub fn upscale_planar<E, F>(
    engine: &mut E,
    source: ArrayView4<'_, f32>,
    geometry: &TileGeometry,
    mut on_progress: F,
) -> Result<Array4<f32>>
where
    E: UpscaleEngine + ?Sized,
    F: FnMut(&TileProgress),
{
    if !engine.is_ready() {
        bail!(ENGINE_NOT_INITIALIZED);
    }

    let (batch, channels, height, width) = source.dim();
    if batch != 1 {
        bail!("expected batch size 1, got {batch}");
    }
    let grid = TileGrid::plan(width, height, *geometry)?;
    let total = grid.total_tiles();

    debug!(
        width,
        height,
        tiles_x = grid.tiles_x(),
        tiles_y = grid.tiles_y(),
        stride = geometry.stride(),
        "Tile grid planned"
    );

    let mut output = Array4::<f32>::zeros((1, channels, grid.output_height(), grid.output_width()));

    for (index, cell) in grid.cells().enumerate() {
        let completed = index + 1;
        let started = Instant::now();
        let label = || format!("tile {completed}/{total} (col {}, row {})", cell.col, cell.row);

        let tile = extract_tile(source, &cell, geometry).with_context(label)?;
        let upscaled = engine.upscale_tile(tile).with_context(label)?;
        stitch_tile(&mut output, upscaled.view(), &cell, geometry).with_context(label)?;

        let progress = TileProgress::new(completed, total, started.elapsed());
        debug!(
            tile = completed,
            total,
            col = cell.col,
            row = cell.row,
            elapsed_ms = progress.tile_elapsed.as_millis() as u64,
            "Tile processed"
        );
        on_progress(&progress);
    }

    Ok(output)
}

/// Upscale an interleaved RGB image; returns RGBA at `scale` times the size.
pub fn super_resolve<E, F>(
    engine: &mut E,
    image: &ImageBuffer,
    settings: &UpscaleSettings,
    on_progress: F,
) -> Result<ImageBuffer>
where
    E: UpscaleEngine + ?Sized,
    F: FnMut(&TileProgress),
{
    if !engine.is_ready() {
        bail!(ENGINE_NOT_INITIALIZED);
    }
    if image.is_empty() {
        bail!(
            "cannot upscale an empty image ({}x{})",
            image.width(),
            image.height()
        );
    }
    if image.channels() != 3 {
        bail!("expected an RGB image, got {} channels", image.channels());
    }

    let geometry = settings.geometry;
    info!(
        width = image.width(),
        height = image.height(),
        tile_size = geometry.tile_size(),
        tile_padding = geometry.tile_padding(),
        scale = geometry.scale(),
        range = %settings.range,
        "Starting super-resolution"
    );

    let started = Instant::now();
    let source = image_to_planar(image, settings.range)?;
    let output = upscale_planar(engine, source.view(), &geometry, on_progress)?;
    let result = planar_to_image(output.view(), settings.range)?;

    info!(
        width = result.width(),
        height = result.height(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Super-resolution complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NearestUpscaler;

    fn rgb(width: u32, height: u32) -> ImageBuffer {
        let data = (0..width * height * 3)
            .map(|i| ((i * 31 + i / 7) % 256) as u8)
            .collect();
        ImageBuffer::new(data, width, height, 3).unwrap()
    }

    struct FailingEngine {
        fail_on: usize,
        calls: usize,
    }

    impl UpscaleEngine for FailingEngine {
        fn upscale_tile(&mut self, tile: Array4<f32>) -> Result<Array4<f32>> {
            self.calls += 1;
            if self.calls == self.fail_on {
                bail!("device lost");
            }
            let (n, c, h, w) = tile.dim();
            Ok(Array4::zeros((n, c, h * 4, w * 4)))
        }
    }

    #[test]
    fn test_progress_percent_rounds() {
        let p = TileProgress::new(1, 3, Duration::from_millis(10));
        assert_eq!(p.percent, 33);
        assert_eq!(p.remaining, Duration::from_millis(20));
        assert!(!p.is_done());

        let p = TileProgress::new(2, 3, Duration::from_millis(10));
        assert_eq!(p.percent, 67);

        let p = TileProgress::new(3, 3, Duration::from_millis(10));
        assert_eq!(p.percent, 100);
        assert_eq!(p.remaining, Duration::ZERO);
        assert!(p.is_done());
    }

    #[test]
    fn test_small_image_single_tile() {
        let mut engine = NearestUpscaler::new(4);
        let out = super_resolve(&mut engine, &rgb(10, 10), &UpscaleSettings::default(), |_| {})
            .unwrap();

        assert_eq!(engine.calls(), 1);
        assert_eq!((out.width(), out.height(), out.channels()), (40, 40, 4));
    }

    #[test]
    fn test_progress_reports_every_tile() {
        let mut engine = NearestUpscaler::new(4);
        let mut seen = Vec::new();
        super_resolve(&mut engine, &rgb(128, 128), &UpscaleSettings::default(), |p| {
            seen.push(*p)
        })
        .unwrap();

        assert_eq!(engine.calls(), 9);
        assert_eq!(seen.len(), 9);
        assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(seen.last().map(|p| p.percent), Some(100));
        assert!(seen.iter().all(|p| p.total == 9));
    }

    #[test]
    fn test_engine_failure_aborts_run() {
        let mut engine = FailingEngine { fail_on: 2, calls: 0 };
        let mut reports = 0;
        let err = super_resolve(&mut engine, &rgb(128, 128), &UpscaleSettings::default(), |_| {
            reports += 1
        })
        .unwrap_err();

        assert_eq!(engine.calls, 2);
        assert_eq!(reports, 1);
        let chain = format!("{err:#}");
        assert!(chain.contains("tile 2/9 (col 0, row 1)"), "{chain}");
        assert!(chain.contains("device lost"), "{chain}");
    }

    #[test]
    fn test_not_ready_engine_fails_before_any_tile() {
        let mut engine = NearestUpscaler::new(0);
        let err = super_resolve(&mut engine, &rgb(8, 8), &UpscaleSettings::default(), |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn test_zero_dimension_image_fails_before_any_tile() {
        let mut engine = NearestUpscaler::new(4);
        let mut reports = 0;
        for (width, height) in [(0, 5), (5, 0), (0, 0)] {
            let image = ImageBuffer::new(Vec::new(), width, height, 3).unwrap();
            let err = super_resolve(&mut engine, &image, &UpscaleSettings::default(), |_| {
                reports += 1
            })
            .unwrap_err();
            assert!(err.to_string().contains("empty image"), "{err}");
        }
        assert_eq!(engine.calls(), 0);
        assert_eq!(reports, 0);
    }

    #[test]
    fn test_rejects_non_rgb_input() {
        let image = ImageBuffer::new(vec![0; 4 * 4 * 4], 4, 4, 4).unwrap();
        let mut engine = NearestUpscaler::new(4);
        assert!(super_resolve(&mut engine, &image, &UpscaleSettings::default(), |_| {}).is_err());
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_wrong_engine_scale_is_reported() {
        let mut engine = NearestUpscaler::new(2);
        let err = super_resolve(&mut engine, &rgb(10, 10), &UpscaleSettings::default(), |_| {})
            .unwrap_err();
        assert!(format!("{err:#}").contains("engine output shape mismatch"));
    }
}
