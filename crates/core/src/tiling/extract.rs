use anyhow::{bail, Result};
use ndarray::{Array4, ArrayView4};

use super::grid::{TileCell, TileGeometry};

/// Clamp a possibly out-of-bounds coordinate into `[0, len - 1]`.
fn clamp_index(coord: isize, len: usize) -> usize {
    coord.clamp(0, len as isize - 1) as usize
}

/// Source coordinates feeding tile positions `0..tile_size` along one axis,
/// starting `tile_padding` pixels before `origin`.
fn clamped_axis(origin: usize, geometry: &TileGeometry, len: usize) -> Vec<usize> {
    let start = origin as isize - geometry.tile_padding() as isize;
    (0..geometry.tile_size())
        .map(|offset| clamp_index(start + offset as isize, len))
        .collect()
}

/// Materialize the padded `[1, C, tile_size, tile_size]` input for `cell`.
///
/// Positions that fall outside the image repeat the nearest edge pixel, so
/// every tile has the engine's fixed shape wherever it sits in the grid.
pub fn extract_tile<T: Copy + Default>(
    source: ArrayView4<'_, T>,
    cell: &TileCell,
    geometry: &TileGeometry,
) -> Result<Array4<T>> {
    let (batch, channels, height, width) = source.dim();
    if batch != 1 {
        bail!("extract_tile: expected batch size 1, got {batch}");
    }
    if width == 0 || height == 0 {
        bail!("extract_tile: source tensor is empty ({width}x{height})");
    }

    let size = geometry.tile_size();
    let xs = clamped_axis(cell.source.x, geometry, width);
    let ys = clamped_axis(cell.source.y, geometry, height);

    let mut tile = Array4::<T>::from_elem((1, channels, size, size), T::default());
    for c in 0..channels {
        for (ty, &sy) in ys.iter().enumerate() {
            for (tx, &sx) in xs.iter().enumerate() {
                tile[[0, c, ty, tx]] = source[[0, c, sy, sx]];
            }
        }
    }

    Ok(tile)
}
