use anyhow::{bail, Result};

/// Decoded image with interleaved 8-bit samples (pixel-major, channel-minor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl ImageBuffer {
    /// Wrap raw interleaved bytes. Fails unless `data.len() == width * height * channels`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        if channels == 0 {
            bail!("ImageBuffer: channel count must be at least 1");
        }

        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            bail!(
                "ImageBuffer: data length mismatch: expected {} ({}x{}x{}), got {}",
                expected,
                width,
                height,
                channels,
                data.len()
            );
        }

        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Samples of the pixel at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        Some(&self.data[start..start + c])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_length() {
        assert!(ImageBuffer::new(vec![0; 12], 2, 2, 3).is_ok());

        let err = ImageBuffer::new(vec![0; 11], 2, 2, 3).unwrap_err();
        assert!(err.to_string().contains("expected 12 (2x2x3), got 11"));
    }

    #[test]
    fn test_new_rejects_zero_channels() {
        assert!(ImageBuffer::new(Vec::new(), 2, 2, 0).is_err());
    }

    #[test]
    fn test_zero_sized_image_is_empty() {
        let img = ImageBuffer::new(Vec::new(), 0, 5, 3).unwrap();
        assert!(img.is_empty());
    }

    #[test]
    fn test_pixel_lookup() {
        let data: Vec<u8> = (0..12).collect();
        let img = ImageBuffer::new(data, 2, 2, 3).unwrap();
        assert_eq!(img.pixel(0, 0), Some(&[0u8, 1, 2][..]));
        assert_eq!(img.pixel(1, 1), Some(&[9u8, 10, 11][..]));
        assert_eq!(img.pixel(2, 0), None);
    }
}
