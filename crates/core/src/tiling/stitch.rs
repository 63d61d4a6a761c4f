use anyhow::{bail, Result};
use ndarray::{s, Array4, ArrayView4};

use super::grid::{TileCell, TileGeometry};

/// Copy the core of one engine output tile into the full-resolution tensor.
///
/// The engine upsamples the padding margin along with the core, so the
/// first `tile_padding * scale` rows and columns are cropped away before the
/// `cell.dest`-sized region is written at `cell.dest`'s offset. Destination
/// windows of distinct cells never overlap.
pub fn stitch_tile<T: Copy>(
    output: &mut Array4<T>,
    tile_output: ArrayView4<'_, T>,
    cell: &TileCell,
    geometry: &TileGeometry,
) -> Result<()> {
    let (_, channels, out_h, out_w) = output.dim();
    let out_tile = geometry.output_tile_size();
    let expected = [1, channels, out_tile, out_tile];
    if tile_output.shape() != expected {
        bail!(
            "engine output shape mismatch: expected {:?}, got {:?}",
            expected,
            tile_output.shape()
        );
    }

    let dest = cell.dest;
    if dest.x + dest.width > out_w || dest.y + dest.height > out_h {
        bail!(
            "tile ({}, {}) destination {:?} exceeds output {}x{}",
            cell.col,
            cell.row,
            dest,
            out_w,
            out_h
        );
    }

    let crop = geometry.output_padding();
    output
        .slice_mut(s![
            ..,
            ..,
            dest.y..dest.y + dest.height,
            dest.x..dest.x + dest.width
        ])
        .assign(&tile_output.slice(s![
            ..,
            ..,
            crop..crop + dest.height,
            crop..crop + dest.width
        ]));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::grid::TileGrid;

    #[test]
    fn test_stitch_crops_padding_and_writes_dest_window() {
        let geometry = TileGeometry::default();
        let grid = TileGrid::plan(128, 128, geometry).unwrap();
        let cell = grid.cell(2, 1);
        let mut output = Array4::<f32>::zeros((1, 3, grid.output_height(), grid.output_width()));

        // encode the tile-local position so the crop offset is observable
        let tile_output = Array4::from_shape_fn((1, 3, 256, 256), |(_, c, y, x)| {
            (c * 1_000_000 + y * 1000 + x) as f32 + 1.0
        });
        stitch_tile(&mut output, tile_output.view(), &cell, &geometry).unwrap();

        assert_eq!(cell.dest.x, 416);
        assert_eq!(cell.dest.y, 208);
        assert_eq!(cell.dest.width, 96);
        assert_eq!(cell.dest.height, 208);

        assert_eq!(output[[0, 0, 208, 416]], tile_output[[0, 0, 24, 24]]);
        assert_eq!(output[[0, 2, 208 + 207, 416 + 95]], tile_output[[0, 2, 24 + 207, 24 + 95]]);

        let written = output.iter().filter(|&&v| v != 0.0).count();
        assert_eq!(written, 3 * 96 * 208);
    }

    #[test]
    fn test_stitch_leaves_other_regions_untouched() {
        let geometry = TileGeometry::new(8, 2, 2).unwrap();
        let grid = TileGrid::plan(8, 8, geometry).unwrap();
        let mut output = Array4::<u8>::zeros((1, 1, 16, 16));
        let tile_output = Array4::<u8>::from_elem((1, 1, 16, 16), 9);

        let cell = grid.cell(0, 1);
        stitch_tile(&mut output, tile_output.view(), &cell, &geometry).unwrap();

        for y in 0..16 {
            for x in 0..16 {
                let inside = (8..16).contains(&y) && (0..8).contains(&x);
                assert_eq!(output[[0, 0, y, x]] == 9, inside, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn test_stitch_rejects_wrong_tile_shape() {
        let geometry = TileGeometry::default();
        let grid = TileGrid::plan(10, 10, geometry).unwrap();
        let mut output = Array4::<f32>::zeros((1, 3, 40, 40));
        let tile_output = Array4::<f32>::zeros((1, 3, 128, 128));

        let err = stitch_tile(&mut output, tile_output.view(), &grid.cell(0, 0), &geometry)
            .unwrap_err();
        assert!(err.to_string().contains("engine output shape mismatch"));
    }

    #[test]
    fn test_stitch_rejects_channel_mismatch() {
        let geometry = TileGeometry::default();
        let grid = TileGrid::plan(10, 10, geometry).unwrap();
        let mut output = Array4::<f32>::zeros((1, 3, 40, 40));
        let tile_output = Array4::<f32>::zeros((1, 1, 256, 256));

        assert!(stitch_tile(&mut output, tile_output.view(), &grid.cell(0, 0), &geometry).is_err());
    }
}
