//! Interleaved ↔ planar (NCHW) conversion with value-range handling.
//!
//! Planar tensors are always `[1, C, H, W]`; pixel `(x, y)` of channel `c`
//! lives at flat offset `c * H * W + y * W + x`.

use anyhow::{bail, Context, Result};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::types::ImageBuffer;

/// Alpha byte appended to every output pixel.
pub const OPAQUE_ALPHA: u8 = 255;

/// Mask pixels with this value are kept; everything else is marked for repair.
const MASK_KEEP_VALUE: u8 = 255;
const MASK_REPAIR: u8 = 255;
const MASK_PRESERVE: u8 = 0;

/// Numeric range of float samples inside a planar tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueRange {
    /// Normalized `[0, 1]` floats (bytes divided by 255).
    #[default]
    Unit,
    /// Raw `[0, 255]` floats.
    Byte,
}

impl ValueRange {
    pub fn ceiling(self) -> f32 {
        match self {
            Self::Unit => 1.0,
            Self::Byte => 255.0,
        }
    }

    fn encode(self, sample: u8) -> f32 {
        match self {
            Self::Unit => sample as f32 / 255.0,
            Self::Byte => sample as f32,
        }
    }

    fn decode(self, value: f32) -> u8 {
        let clamped = clamp_sample(value, self);
        let bytes = match self {
            Self::Unit => clamped * 255.0,
            Self::Byte => clamped,
        };
        bytes.round() as u8
    }
}

impl std::fmt::Display for ValueRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Byte => write!(f, "byte"),
        }
    }
}

/// Clamp a float sample into `[0, range.ceiling()]`.
pub fn clamp_sample(value: f32, range: ValueRange) -> f32 {
    value.clamp(0.0, range.ceiling())
}

fn check_interleaved_len(len: usize, width: usize, height: usize, channels: usize) -> Result<()> {
    if channels == 0 {
        bail!("channel count must be at least 1");
    }
    let expected = width * height * channels;
    if len != expected {
        bail!(
            "Data length mismatch: expected {} ({}x{}x{}), got {}",
            expected,
            width,
            height,
            channels,
            len
        );
    }
    Ok(())
}

fn deinterleave<T: Clone + Default>(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    convert: impl Fn(u8) -> T,
) -> Result<Array4<T>> {
    check_interleaved_len(data.len(), width, height, channels)?;

    let hw = width * height;
    let mut planar = Array4::<T>::from_elem((1, channels, height, width), T::default());
    let slice = planar
        .as_slice_mut()
        .context("planar tensor must be C-contiguous")?;

    for (pixel, samples) in data.chunks_exact(channels).enumerate() {
        for (c, &sample) in samples.iter().enumerate() {
            slice[c * hw + pixel] = convert(sample);
        }
    }

    Ok(planar)
}

fn interleave<T: Copy>(
    planar: ArrayView4<'_, T>,
    alpha: Option<u8>,
    convert: impl Fn(T) -> u8,
) -> Result<Vec<u8>> {
    let (batch, channels, height, width) = planar.dim();
    if batch != 1 {
        bail!("expected a single-image tensor, got batch size {batch}");
    }

    let contiguous = planar.as_standard_layout();
    let slice = contiguous
        .as_slice()
        .context("standard-layout tensor must be contiguous")?;
    let hw = height * width;
    let out_channels = channels + usize::from(alpha.is_some());

    let mut out = Vec::with_capacity(hw * out_channels);
    for pixel in 0..hw {
        for c in 0..channels {
            out.push(convert(slice[c * hw + pixel]));
        }
        if let Some(a) = alpha {
            out.push(a);
        }
    }
    Ok(out)
}

/// Interleaved bytes → planar float tensor `[1, C, H, W]` in `range`.
pub fn interleaved_to_planar(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    range: ValueRange,
) -> Result<Array4<f32>> {
    deinterleave(data, width, height, channels, |v| range.encode(v))
}

/// Interleaved bytes → planar 8-bit tensor `[1, C, H, W]`, values untouched.
pub fn interleaved_to_planar_u8(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<Array4<u8>> {
    deinterleave(data, width, height, channels, |v| v)
}

/// Planar float tensor → interleaved bytes.
///
/// Every value is clamped into `range` before denormalization, so overshoot
/// from the network saturates instead of wrapping. With `alpha = Some(a)` a
/// constant alpha byte follows each pixel's channels.
pub fn planar_to_interleaved(
    planar: ArrayView4<'_, f32>,
    range: ValueRange,
    alpha: Option<u8>,
) -> Result<Vec<u8>> {
    interleave(planar, alpha, |v| range.decode(v))
}

/// Planar 8-bit tensor → interleaved bytes, optionally with a constant alpha.
pub fn planar_u8_to_interleaved(planar: ArrayView4<'_, u8>, alpha: Option<u8>) -> Result<Vec<u8>> {
    interleave(planar, alpha, |v| v)
}

/// Binarize a single-channel mask into `[1, 1, H, W]`: pixels other than 255
/// become 255 (repair), pixels equal to 255 become 0 (preserve).
pub fn binarize_mask(gray: &[u8], width: usize, height: usize) -> Result<Array4<u8>> {
    check_interleaved_len(gray.len(), width, height, 1)?;

    let binary: Vec<u8> = gray
        .iter()
        .map(|&v| {
            if v != MASK_KEEP_VALUE {
                MASK_REPAIR
            } else {
                MASK_PRESERVE
            }
        })
        .collect();

    Array4::from_shape_vec((1, 1, height, width), binary).context("failed to shape mask tensor")
}

/// Convenience wrapper: decoded image → planar float tensor.
pub fn image_to_planar(image: &ImageBuffer, range: ValueRange) -> Result<Array4<f32>> {
    interleaved_to_planar(
        image.as_raw(),
        image.width() as usize,
        image.height() as usize,
        image.channels() as usize,
        range,
    )
}

/// Convenience wrapper: planar float tensor → opaque RGBA-style image.
pub fn planar_to_image(planar: ArrayView4<'_, f32>, range: ValueRange) -> Result<ImageBuffer> {
    let (_, channels, height, width) = planar.dim();
    let data = planar_to_interleaved(planar, range, Some(OPAQUE_ALPHA))?;
    ImageBuffer::new(data, width as u32, height as u32, (channels + 1) as u8)
}

#[cfg(test)]
mod tests {
    use ndarray::ShapeBuilder;

    use super::*;

    fn gradient(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 37) % 256) as u8).collect()
    }

    #[test]
    fn test_to_planar_follows_chw_offsets() {
        // 2x2 RGB: (r,g,b) per pixel = (10*p, 10*p+1, 10*p+2)
        let data = vec![0, 1, 2, 10, 11, 12, 20, 21, 22, 30, 31, 32];
        let planar = interleaved_to_planar(&data, 2, 2, 3, ValueRange::Byte).unwrap();
        assert_eq!(planar.shape(), &[1, 3, 2, 2]);

        let flat = planar.as_slice().unwrap();
        let (w, h) = (2, 2);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let p = y * w + x;
                    assert_eq!(flat[c * w * h + y * w + x], (10 * p + c) as f32);
                }
            }
        }
    }

    #[test]
    fn test_to_planar_unit_normalizes() {
        let data = vec![255, 0, 51];
        let planar = interleaved_to_planar(&data, 1, 1, 3, ValueRange::Unit).unwrap();
        assert!((planar[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(planar[[0, 1, 0, 0]], 0.0);
        assert!((planar[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_to_planar_rejects_length_mismatch() {
        let err = interleaved_to_planar(&[0u8; 11], 2, 2, 3, ValueRange::Unit).unwrap_err();
        assert!(err.to_string().contains("expected 12 (2x2x3), got 11"));
    }

    #[test]
    fn test_byte_roundtrip_is_exact() {
        let data = gradient(5 * 3 * 3);
        let planar = interleaved_to_planar(&data, 5, 3, 3, ValueRange::Byte).unwrap();
        let restored = planar_to_interleaved(planar.view(), ValueRange::Byte, None).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_u8_roundtrip_is_exact() {
        let data = gradient(4 * 6 * 3);
        let planar = interleaved_to_planar_u8(&data, 4, 6, 3).unwrap();
        let restored = planar_u8_to_interleaved(planar.view(), None).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_unit_roundtrip_within_one() {
        let data: Vec<u8> = (0..=255).cycle().take(16 * 16 * 3).collect();
        let planar = interleaved_to_planar(&data, 16, 16, 3, ValueRange::Unit).unwrap();
        let restored = planar_to_interleaved(planar.view(), ValueRange::Unit, None).unwrap();
        for (i, (&orig, &rt)) in data.iter().zip(restored.iter()).enumerate() {
            let diff = (orig as i16 - rt as i16).unsigned_abs();
            assert!(diff <= 1, "Sample {i}: original={orig}, roundtripped={rt}");
        }
    }

    #[test]
    fn test_to_interleaved_appends_alpha() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let planar = interleaved_to_planar(&data, 2, 1, 3, ValueRange::Byte).unwrap();
        let rgba = planar_to_interleaved(planar.view(), ValueRange::Byte, Some(OPAQUE_ALPHA))
            .unwrap();
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_clamp_is_idempotent_in_range() {
        for v in [0.0f32, 0.25, 0.5, 1.0] {
            assert_eq!(clamp_sample(v, ValueRange::Unit), v);
        }
        for v in [0.0f32, 17.0, 254.5, 255.0] {
            assert_eq!(clamp_sample(v, ValueRange::Byte), v);
        }
    }

    #[test]
    fn test_clamp_pulls_to_nearest_bound() {
        assert_eq!(clamp_sample(-0.3, ValueRange::Unit), 0.0);
        assert_eq!(clamp_sample(1.7, ValueRange::Unit), 1.0);
        assert_eq!(clamp_sample(-12.0, ValueRange::Byte), 0.0);
        assert_eq!(clamp_sample(300.0, ValueRange::Byte), 255.0);
    }

    #[test]
    fn test_denormalize_saturates_out_of_range() {
        let mut planar = Array4::<f32>::zeros((1, 3, 1, 1));
        planar[[0, 0, 0, 0]] = 1.8;
        planar[[0, 1, 0, 0]] = -0.4;
        planar[[0, 2, 0, 0]] = 0.5;

        let rgb = planar_to_interleaved(planar.view(), ValueRange::Unit, None).unwrap();
        assert_eq!(rgb, vec![255, 0, 128]);
    }

    #[test]
    fn test_byte_range_clamps_without_scaling() {
        let mut planar = Array4::<f32>::zeros((1, 3, 1, 1));
        planar[[0, 0, 0, 0]] = 300.0;
        planar[[0, 1, 0, 0]] = -10.0;
        planar[[0, 2, 0, 0]] = 128.4;

        let rgb = planar_to_interleaved(planar.view(), ValueRange::Byte, None).unwrap();
        assert_eq!(rgb, vec![255, 0, 128]);
    }

    #[test]
    fn test_to_interleaved_handles_non_standard_layout() {
        let data = gradient(3 * 2 * 3);
        let planar = interleaved_to_planar(&data, 3, 2, 3, ValueRange::Byte).unwrap();
        let mut fortran = Array4::<f32>::zeros((1, 3, 2, 3).f());
        fortran.assign(&planar);

        let restored = planar_to_interleaved(fortran.view(), ValueRange::Byte, None).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_binarize_mask() {
        let gray = vec![255, 0, 128, 254];
        let mask = binarize_mask(&gray, 2, 2).unwrap();
        assert_eq!(mask.shape(), &[1, 1, 2, 2]);
        assert_eq!(mask.as_slice().unwrap(), &[0, 255, 255, 255]);
    }

    #[test]
    fn test_binarize_mask_rejects_wrong_size() {
        assert!(binarize_mask(&[0u8; 5], 2, 2).is_err());
    }

    #[test]
    fn test_planar_to_image_is_rgba() {
        let planar = Array4::<f32>::from_elem((1, 3, 2, 4), 0.5);
        let image = planar_to_image(planar.view(), ValueRange::Unit).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 2);
        assert_eq!(image.channels(), 4);
        assert_eq!(image.pixel(3, 1), Some(&[128u8, 128, 128, 255][..]));
    }
}
