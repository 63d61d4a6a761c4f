use anyhow::{bail, Result};

pub const DEFAULT_TILE_SIZE: usize = 64;
pub const DEFAULT_TILE_PADDING: usize = 6;
pub const DEFAULT_SCALE: usize = 4;

/// Fixed tiling parameters.
///
/// `tile_size` is the square side fed to the engine, `tile_padding` the
/// context margin on each side, and `scale` the engine's integer upscale
/// factor. The core region each tile owns is `stride = tile_size - 2 * tile_padding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    tile_size: usize,
    tile_padding: usize,
    scale: usize,
}

impl TileGeometry {
    pub fn new(tile_size: usize, tile_padding: usize, scale: usize) -> Result<Self> {
        if tile_size == 0 {
            bail!("tile_size must be greater than zero");
        }
        match tile_padding.checked_mul(2) {
            Some(margin) if margin < tile_size => {}
            _ => bail!(
                "tile_padding ({tile_padding}) must be less than half of tile_size ({tile_size})"
            ),
        }
        if scale == 0 {
            bail!("scale must be at least 1");
        }
        if tile_size.checked_mul(scale).is_none() {
            bail!("tile_size ({tile_size}) times scale ({scale}) overflows");
        }
        Ok(Self {
            tile_size,
            tile_padding,
            scale,
        })
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn tile_padding(&self) -> usize {
        self.tile_padding
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn stride(&self) -> usize {
        self.tile_size - 2 * self.tile_padding
    }

    /// Side of the engine's output tile.
    pub fn output_tile_size(&self) -> usize {
        self.tile_size * self.scale
    }

    /// Padding margin as it appears in the engine's output tile.
    pub fn output_padding(&self) -> usize {
        self.tile_padding * self.scale
    }
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            tile_padding: DEFAULT_TILE_PADDING,
            scale: DEFAULT_SCALE,
        }
    }
}

/// Axis-aligned pixel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// One grid cell: the core window it reads in input space and the window it
/// writes in the scaled output space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCell {
    pub col: usize,
    pub row: usize,
    pub source: PixelRect,
    pub dest: PixelRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    geometry: TileGeometry,
    tiles_x: usize,
    tiles_y: usize,
}

impl TileGrid {
    pub fn plan(width: usize, height: usize, geometry: TileGeometry) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("image dimensions must be non-zero, got {width}x{height}");
        }
        let scale = geometry.scale();
        let output_area = width
            .checked_mul(scale)
            .zip(height.checked_mul(scale))
            .and_then(|(w, h)| w.checked_mul(h));
        if output_area.is_none() {
            bail!("output size of {width}x{height} at scale {scale} overflows");
        }

        let stride = geometry.stride();
        Ok(Self {
            width,
            height,
            geometry,
            tiles_x: width.div_ceil(stride),
            tiles_y: height.div_ceil(stride),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    pub fn total_tiles(&self) -> usize {
        self.tiles_x * self.tiles_y
    }

    pub fn output_width(&self) -> usize {
        self.width * self.geometry.scale()
    }

    pub fn output_height(&self) -> usize {
        self.height * self.geometry.scale()
    }

    pub fn cell(&self, col: usize, row: usize) -> TileCell {
        let stride = self.geometry.stride();
        let scale = self.geometry.scale();

        let x = col * stride;
        let y = row * stride;
        let source = PixelRect {
            x,
            y,
            width: stride.min(self.width - x),
            height: stride.min(self.height - y),
        };
        let dest = PixelRect {
            x: source.x * scale,
            y: source.y * scale,
            width: source.width * scale,
            height: source.height * scale,
        };

        TileCell {
            col,
            row,
            source,
            dest,
        }
    }

    /// Cells in column-major order: all rows of column 0, then column 1, ...
    pub fn cells(&self) -> impl Iterator<Item = TileCell> + '_ {
        (0..self.tiles_x).flat_map(move |col| (0..self.tiles_y).map(move |row| self.cell(col, row)))
    }
}
