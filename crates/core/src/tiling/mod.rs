//! Overlapping-tile decomposition of planar tensors.
//!
//! [`grid`] plans the cells, [`extract`] reads one padded tile with edge
//! replication, [`stitch`] writes an upscaled tile's core back into the
//! full-resolution tensor.

pub mod extract;
pub mod grid;
pub mod stitch;

pub use extract::extract_tile;
pub use grid::{
    PixelRect, TileCell, TileGeometry, TileGrid, DEFAULT_SCALE, DEFAULT_TILE_PADDING,
    DEFAULT_TILE_SIZE,
};
pub use stitch::stitch_tile;
