//! Pixel formats, row geometry, and palettes.
//!
//! Typed colors come from the `rgb` crate. Samples wider than 8 bits are
//! stored in native byte order.

use alloc::vec::Vec;

pub use rgb::{RGB8, RGB16, RGBA8, RGBA16};
use rgb::ComponentBytes;

use crate::CodecError;

/// Row alignment, in bytes, of every in-memory image buffer.
pub const ROW_ALIGNMENT: usize = 4;

/// In-memory sample layouts.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bpp1Indexed,
    Bpp2Indexed,
    Bpp4Indexed,
    Bpp8Indexed,
    Bpp8Grayscale,
    Bpp16Grayscale,
    /// 8-bit gray followed by 8-bit alpha.
    Bpp16GrayscaleAlpha,
    /// 16-bit gray followed by 16-bit alpha.
    Bpp32GrayscaleAlpha,
    /// `u16` word: 1 unused bit, then 5 bits each of red, green, blue.
    Bpp16Rgb555,
    /// `u16` word: 5 bits red, 6 bits green, 5 bits blue.
    Bpp16Rgb565,
    Bpp24Rgb,
    Bpp24Bgr,
    Bpp32Rgba,
    Bpp32Bgra,
    Bpp48Rgb,
    Bpp64Rgba,
}

impl PixelFormat {
    /// Bits occupied by one pixel.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bpp1Indexed => 1,
            PixelFormat::Bpp2Indexed => 2,
            PixelFormat::Bpp4Indexed => 4,
            PixelFormat::Bpp8Indexed | PixelFormat::Bpp8Grayscale => 8,
            PixelFormat::Bpp16Grayscale
            | PixelFormat::Bpp16GrayscaleAlpha
            | PixelFormat::Bpp16Rgb555
            | PixelFormat::Bpp16Rgb565 => 16,
            PixelFormat::Bpp24Rgb | PixelFormat::Bpp24Bgr => 24,
            PixelFormat::Bpp32GrayscaleAlpha | PixelFormat::Bpp32Rgba | PixelFormat::Bpp32Bgra => 32,
            PixelFormat::Bpp48Rgb => 48,
            PixelFormat::Bpp64Rgba => 64,
        }
    }

    /// Whether pixels are palette indices.
    pub fn is_indexed(self) -> bool {
        matches!(
            self,
            PixelFormat::Bpp1Indexed
                | PixelFormat::Bpp2Indexed
                | PixelFormat::Bpp4Indexed
                | PixelFormat::Bpp8Indexed
        )
    }

    /// Whether the layout carries an alpha channel.
    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Bpp16GrayscaleAlpha
                | PixelFormat::Bpp32GrayscaleAlpha
                | PixelFormat::Bpp32Rgba
                | PixelFormat::Bpp32Bgra
                | PixelFormat::Bpp64Rgba
        )
    }

    /// Whether channels are 16 bits wide.
    pub fn is_16_bit_channels(self) -> bool {
        matches!(
            self,
            PixelFormat::Bpp16Grayscale
                | PixelFormat::Bpp32GrayscaleAlpha
                | PixelFormat::Bpp48Rgb
                | PixelFormat::Bpp64Rgba
        )
    }

    /// Unpadded bytes needed for `width` pixels.
    pub fn bytes_in_row(self, width: u32) -> Result<usize, CodecError> {
        let bits = (width as u64)
            .checked_mul(self.bits_per_pixel() as u64)
            .ok_or(CodecError::MemoryAllocation)?;
        usize::try_from(bits.div_ceil(8)).map_err(|_| CodecError::MemoryAllocation)
    }

    /// Bytes per row including padding to [`ROW_ALIGNMENT`].
    pub fn stride(self, width: u32) -> Result<usize, CodecError> {
        let bytes = self.bytes_in_row(width)?;
        bytes
            .checked_next_multiple_of(ROW_ALIGNMENT)
            .ok_or(CodecError::MemoryAllocation)
    }

    /// Indexed format for a bit depth, if one exists.
    pub fn indexed_for_bits(bits: u16) -> Option<Self> {
        match bits {
            1 => Some(PixelFormat::Bpp1Indexed),
            2 => Some(PixelFormat::Bpp2Indexed),
            4 => Some(PixelFormat::Bpp4Indexed),
            8 => Some(PixelFormat::Bpp8Indexed),
            _ => None,
        }
    }
}

/// Output pixel format requested by a caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestedFormat {
    /// Keep the backend's native layout.
    #[default]
    Source,
    /// Convert to this layout.
    Exact(PixelFormat),
}

impl From<PixelFormat> for RequestedFormat {
    fn from(format: PixelFormat) -> Self {
        RequestedFormat::Exact(format)
    }
}

/// Color table for indexed images.
///
/// The entry format and count are fixed once a frame header is produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Palette {
    Rgb8(Vec<RGB8>),
    Rgba8(Vec<RGBA8>),
}

impl Palette {
    /// Pixel format of one entry.
    pub fn format(&self) -> PixelFormat {
        match self {
            Palette::Rgb8(_) => PixelFormat::Bpp24Rgb,
            Palette::Rgba8(_) => PixelFormat::Bpp32Rgba,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Palette::Rgb8(entries) => entries.len(),
            Palette::Rgba8(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve an index to a full color. Out-of-range indices are an error.
    pub fn color(&self, index: usize) -> Result<RGBA8, CodecError> {
        let entry = match self {
            Palette::Rgb8(entries) => entries.get(index).map(|c| RGBA8::new(c.r, c.g, c.b, 255)),
            Palette::Rgba8(entries) => entries.get(index).copied(),
        };
        entry.ok_or(CodecError::PaletteIndexOutOfRange {
            index,
            count: self.len(),
        })
    }

    /// Raw entry table.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Palette::Rgb8(entries) => entries.as_bytes(),
            Palette::Rgba8(entries) => entries.as_bytes(),
        }
    }
}

/// Read the `index`-th sub-byte sample of a packed row, most significant
/// bits first.
pub(crate) fn packed_index(row: &[u8], bits: u32, index: usize) -> u8 {
    let per_byte = (8 / bits) as usize;
    let byte = row[index / per_byte];
    let shift = 8 - bits as usize * (index % per_byte + 1);
    (byte >> shift) & ((1u16 << bits) - 1) as u8
}

/// Store the `index`-th sub-byte sample of a packed row, most significant
/// bits first.
pub(crate) fn set_packed_index(row: &mut [u8], bits: u32, index: usize, value: u8) {
    let per_byte = (8 / bits) as usize;
    let shift = 8 - bits as usize * (index % per_byte + 1);
    let mask = (((1u16 << bits) - 1) as u8) << shift;
    let byte = &mut row[index / per_byte];
    *byte = (*byte & !mask) | ((value << shift) & mask);
}
