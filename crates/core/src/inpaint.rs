use std::time::Instant;

use anyhow::{bail, Result};
use tracing::info;

use crate::engine::{InpaintEngine, ENGINE_NOT_INITIALIZED};
use crate::layout::{binarize_mask, interleaved_to_planar_u8, planar_u8_to_interleaved, OPAQUE_ALPHA};
use crate::types::ImageBuffer;

/// Repair the regions of `image` selected by `mask` in a single engine call.
///
/// `image` must be RGB and `mask` single-channel at exactly the same size;
/// resizing is the caller's job. Mask pixels other than 255 are repaired.
/// Returns an opaque RGBA image of the input size.
pub fn inpaint<E>(engine: &mut E, image: &ImageBuffer, mask: &ImageBuffer) -> Result<ImageBuffer>
where
    E: InpaintEngine + ?Sized,
{
    if !engine.is_ready() {
        bail!(ENGINE_NOT_INITIALIZED);
    }
    if image.is_empty() {
        bail!(
            "cannot inpaint an empty image ({}x{})",
            image.width(),
            image.height()
        );
    }
    if image.channels() != 3 {
        bail!("expected an RGB image, got {} channels", image.channels());
    }
    if mask.channels() != 1 {
        bail!("expected a single-channel mask, got {} channels", mask.channels());
    }
    if (mask.width(), mask.height()) != (image.width(), image.height()) {
        bail!(
            "mask is {}x{} but image is {}x{}; resize the mask to the image size first",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        );
    }

    let width = image.width() as usize;
    let height = image.height() as usize;
    info!(width, height, "Starting inpainting");

    let started = Instant::now();
    let image_tensor = interleaved_to_planar_u8(image.as_raw(), width, height, 3)?;
    let mask_tensor = binarize_mask(mask.as_raw(), width, height)?;

    let output = engine.inpaint(image_tensor, mask_tensor)?;
    let expected = [1, 3, height, width];
    if output.shape() != expected {
        bail!(
            "engine output shape mismatch: expected {:?}, got {:?}",
            expected,
            output.shape()
        );
    }

    let data = planar_u8_to_interleaved(output.view(), Some(OPAQUE_ALPHA))?;
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Inpainting complete"
    );
    ImageBuffer::new(data, image.width(), image.height(), 4)
}
