//! Frame headers and owned images.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use imgref::ImgRef;

use crate::options::Compression;
use crate::pixel::{Palette, PixelFormat};
use crate::CodecError;

/// Vertical storage order of rows in the encoded stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    TopDown,
    /// Last logical row stored first. Sessions remap this; callers always
    /// see top-down rows.
    BottomUp,
}

/// Physical resolution in pixels per meter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub x_ppm: u32,
    pub y_ppm: u32,
}

/// How the frame is stored in the stream, independent of the output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceImage {
    /// `None` when the stored layout has no in-memory equivalent.
    pub pixel_format: Option<PixelFormat>,
    pub compression: Compression,
    pub orientation: Orientation,
    pub interlaced: bool,
}

/// One metadata entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

/// Description of one frame as delivered to (or accepted from) the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Bytes per row, padded to [`ROW_ALIGNMENT`](crate::ROW_ALIGNMENT).
    pub stride: usize,
    /// Sub-scans per frame; 1 for non-interlaced images.
    pub passes: u32,
    pub palette: Option<Palette>,
    /// Ordered key/value metadata.
    pub meta: Vec<MetaEntry>,
    pub iccp: Option<Vec<u8>>,
    /// Animation delay, when the format carries one.
    pub delay_ms: Option<u32>,
    pub source: SourceImage,
    pub resolution: Option<Resolution>,
}

impl FrameHeader {
    /// Header for a single-pass frame with computed stride.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidInput(alloc::format!(
                "zero image dimension {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_format,
            stride: pixel_format.stride(width)?,
            passes: 1,
            palette: None,
            meta: Vec::new(),
            iccp: None,
            delay_ms: None,
            source: SourceImage {
                pixel_format: Some(pixel_format),
                ..SourceImage::default()
            },
            resolution: None,
        })
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    pub fn with_iccp(mut self, profile: Vec<u8>) -> Self {
        self.iccp = Some(profile);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.push(MetaEntry {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Look up the first metadata value for `key`.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    /// Unpadded bytes of one row.
    pub fn bytes_in_row(&self) -> Result<usize, CodecError> {
        self.pixel_format.bytes_in_row(self.width)
    }

    /// `stride * height`, checked.
    pub fn buffer_len(&self) -> Result<usize, CodecError> {
        self.stride
            .checked_mul(self.height as usize)
            .ok_or(CodecError::MemoryAllocation)
    }
}

/// A whole decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub header: FrameHeader,
    /// Exactly `stride * height` bytes, rows top to bottom.
    pub pixels: Vec<u8>,
}

impl Image {
    /// Zero-filled image for `header`.
    pub fn new(header: FrameHeader) -> Result<Self, CodecError> {
        if header.width == 0 || header.height == 0 {
            return Err(CodecError::InvalidInput("zero image dimension".into()));
        }
        let len = header.buffer_len()?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| CodecError::MemoryAllocation)?;
        pixels.resize(len, 0);
        Ok(Self { header, pixels })
    }

    /// Wrap an existing buffer. The length must match the header exactly.
    pub fn from_pixels(header: FrameHeader, pixels: Vec<u8>) -> Result<Self, CodecError> {
        if header.width == 0 || header.height == 0 {
            return Err(CodecError::InvalidInput("zero image dimension".into()));
        }
        if header.stride < header.bytes_in_row()? {
            return Err(CodecError::InvalidInput("stride shorter than row".into()));
        }
        let expected = header.buffer_len()?;
        if pixels.len() != expected {
            return Err(CodecError::InvalidInput(alloc::format!(
                "pixel buffer is {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self { header, pixels })
    }

    /// Pack tightly-packed rows into an aligned image.
    pub fn from_packed_rows(header: FrameHeader, packed: &[u8]) -> Result<Self, CodecError> {
        let row_len = header.bytes_in_row()?;
        let expected = row_len
            .checked_mul(header.height as usize)
            .ok_or(CodecError::MemoryAllocation)?;
        if packed.len() != expected {
            return Err(CodecError::InvalidInput(alloc::format!(
                "packed buffer is {} bytes, expected {expected}",
                packed.len()
            )));
        }
        let mut image = Self::new(header)?;
        let stride = image.header.stride;
        for (dst, src) in image
            .pixels
            .chunks_exact_mut(stride)
            .zip(packed.chunks_exact(row_len))
        {
            dst[..row_len].copy_from_slice(src);
        }
        Ok(image)
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Byte view: width is the unpadded row length, stride the padded one.
    pub fn as_img(&self) -> ImgRef<'_, u8> {
        let row_len = self.header.pixel_format.bytes_in_row(self.header.width).unwrap_or(0);
        imgref::Img::new_stride(
            &self.pixels[..],
            row_len,
            self.header.height as usize,
            self.header.stride,
        )
    }

    /// Unpadded bytes of row `y`, if in range.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.header.height {
            return None;
        }
        let row_len = self.header.bytes_in_row().ok()?;
        let start = y as usize * self.header.stride;
        self.pixels.get(start..start + row_len)
    }

    /// Copy rows into a tightly-packed buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let img = self.as_img();
        let mut packed = vec![0u8; img.width() * img.height()];
        for (dst, src) in packed.chunks_exact_mut(img.width().max(1)).zip(img.rows()) {
            dst.copy_from_slice(src);
        }
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_stride_times_height() {
        let header = FrameHeader::new(3, 5, PixelFormat::Bpp24Rgb).unwrap();
        assert_eq!(header.stride, 12);
        let image = Image::new(header).unwrap();
        assert_eq!(image.pixels.len(), 60);
        assert_eq!(image.row(4).unwrap().len(), 9);
        assert!(image.row(5).is_none());
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(matches!(
            FrameHeader::new(0, 4, PixelFormat::Bpp8Grayscale),
            Err(CodecError::InvalidInput(_))
        ));
    }

    #[test]
    fn packed_rows_round_trip() {
        let header = FrameHeader::new(2, 2, PixelFormat::Bpp24Bgr).unwrap();
        let packed: Vec<u8> = (0..12).collect();
        let image = Image::from_packed_rows(header, &packed).unwrap();
        assert_eq!(image.pixels.len(), 16);
        assert_eq!(&image.pixels[6..8], &[0, 0]);
        assert_eq!(image.to_packed(), packed);
    }

    #[test]
    fn wrong_buffer_length() {
        let header = FrameHeader::new(2, 2, PixelFormat::Bpp8Grayscale).unwrap();
        assert!(Image::from_pixels(header, vec![0; 7]).is_err());
    }

    #[test]
    fn metadata_keeps_order() {
        let header = FrameHeader::new(1, 1, PixelFormat::Bpp8Grayscale)
            .unwrap()
            .with_meta("Title", "a")
            .with_meta("Author", "b")
            .with_meta("Title", "c");
        assert_eq!(header.meta_value("Title"), Some("a"));
        assert_eq!(header.meta[2].value, "c");
    }
}
