//! BMP writer.
//!
//! Uncompressed frames are streamed top-down (negative height) as rows
//! arrive. RLE8 frames must be stored bottom-up, so their rows are encoded
//! in memory and written out by `finish`.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use std::io::Write;

use super::header::{
    BmpCompression, COLOR_SPACE_SRGB, ChannelMasks, ColorSpaceV4, FILE_HEADER_SIZE, FileHeader,
    INTENT_IMAGES, InfoHeader, InfoV3, PROFILE_EMBEDDED, ProfileV5, V3_HEADER_SIZE, V5_HEADER_SIZE,
    bits_to_bytes, dib_row_pad,
};
use super::rle;
use crate::codec::FrameEncoder;
use crate::image::FrameHeader;
use crate::io::WriteIo;
use crate::options::{Compression, IoOptions, WriteOptions};
use crate::pixel::{PixelFormat, RGBA8};
use crate::CodecError;

pub(crate) const INPUT_FORMATS: [PixelFormat; 7] = [
    PixelFormat::Bpp1Indexed,
    PixelFormat::Bpp4Indexed,
    PixelFormat::Bpp8Indexed,
    PixelFormat::Bpp24Bgr,
    PixelFormat::Bpp24Rgb,
    PixelFormat::Bpp32Bgra,
    PixelFormat::Bpp32Rgba,
];

/// Tuning key selecting the info header: `"v3"` or `"v5"`.
pub(crate) const HEADER_TUNING: &str = "bmp-header";

/// 72 DPI.
const DEFAULT_PPM: i32 = 2835;

pub(crate) struct BmpEncoder {
    base: u64,
    compression: Compression,
    want_iccp: bool,
    /// Forced header version; `None` picks V5 only to carry a profile.
    force_v5: Option<bool>,
    frame: Option<PendingFrame>,
}

struct PendingFrame {
    format: PixelFormat,
    width: u32,
    height: u32,
    bit_count: u16,
    palette: Vec<RGBA8>,
    profile: Option<Vec<u8>>,
    v5: bool,
    resolution: (i32, i32),
    /// Stored row including pad bytes.
    row: Vec<u8>,
    /// RLE8 rows, top row first.
    rle_rows: Option<Vec<Vec<u8>>>,
}

fn too_large() -> CodecError {
    CodecError::LimitExceeded("BMP sizes are limited to 32 bits")
}

impl BmpEncoder {
    pub fn new(base: u64, options: &WriteOptions) -> Self {
        let force_v5 = match options.tuning.get(HEADER_TUNING).and_then(|v| v.as_str()) {
            Some("v3") => Some(false),
            Some("v5") => Some(true),
            Some(other) => {
                log::warn!("bmp: ignoring {HEADER_TUNING}={other}, expected v3 or v5");
                None
            }
            None => None,
        };
        Self {
            base,
            compression: options.compression,
            want_iccp: options.io_options.contains(IoOptions::ICCP),
            force_v5,
            frame: None,
        }
    }
}

impl PendingFrame {
    fn compression(&self) -> BmpCompression {
        if self.rle_rows.is_some() {
            BmpCompression::Rle8
        } else {
            BmpCompression::Rgb
        }
    }

    /// File header, info header and palette for `image_size` bytes of
    /// pixel data.
    fn prefix(&self, image_size: u64) -> Result<Vec<u8>, CodecError> {
        let info_size = if self.v5 { V5_HEADER_SIZE } else { V3_HEADER_SIZE };
        let pixel_offset =
            u64::from(FILE_HEADER_SIZE) + u64::from(info_size) + self.palette.len() as u64 * 4;
        let profile_size = self.profile.as_ref().map_or(0, |p| p.len() as u64);
        let file_size = u32::try_from(pixel_offset + image_size + profile_size).map_err(|_| too_large())?;

        let compression = self.compression();
        let height = i32::try_from(self.height).map_err(|_| too_large())?;
        let info = InfoV3 {
            width: i32::try_from(self.width).map_err(|_| too_large())?,
            // RLE must be stored bottom-up
            height: if compression == BmpCompression::Rgb { -height } else { height },
            planes: 1,
            bit_count: self.bit_count,
            compression: compression.code(),
            image_size: u32::try_from(image_size).map_err(|_| too_large())?,
            x_ppm: self.resolution.0,
            y_ppm: self.resolution.1,
            colors_used: self.palette.len() as u32,
            colors_important: 0,
        };
        let header = if self.v5 {
            let color_space = ColorSpaceV4 {
                masks: if self.bit_count == 32 {
                    ChannelMasks::BGRA32
                } else {
                    ChannelMasks::default()
                },
                cs_type: if self.profile.is_some() {
                    PROFILE_EMBEDDED
                } else {
                    COLOR_SPACE_SRGB
                },
                ..ColorSpaceV4::default()
            };
            let profile = ProfileV5 {
                intent: INTENT_IMAGES,
                // relative to the info header
                profile_data: if self.profile.is_some() {
                    (pixel_offset + image_size - u64::from(FILE_HEADER_SIZE)) as u32
                } else {
                    0
                },
                profile_size: profile_size as u32,
                reserved: 0,
            };
            InfoHeader::V5(info, color_space, profile)
        } else {
            InfoHeader::V3(info)
        };

        let mut out = Vec::with_capacity(pixel_offset as usize);
        FileHeader {
            file_size,
            pixel_offset: pixel_offset as u32,
        }
        .write(&mut out)?;
        header.write(&mut out)?;
        for c in &self.palette {
            out.extend([c.b, c.g, c.r, 0]);
        }
        Ok(out)
    }

    /// Copy `row` into the stored layout, swapping RGB(A) to BGR(A).
    fn store_row(&mut self, row: &[u8]) {
        match self.format {
            PixelFormat::Bpp24Rgb => {
                for (src, dst) in row.chunks_exact(3).zip(self.row.chunks_exact_mut(3)) {
                    dst.copy_from_slice(&[src[2], src[1], src[0]]);
                }
            }
            PixelFormat::Bpp32Rgba => {
                for (src, dst) in row.chunks_exact(4).zip(self.row.chunks_exact_mut(4)) {
                    dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
                }
            }
            _ => self.row[..row.len()].copy_from_slice(row),
        }
    }
}

impl FrameEncoder for BmpEncoder {
    fn begin_frame(&mut self, io: &mut dyn WriteIo, header: &FrameHeader) -> Result<u32, CodecError> {
        if self.frame.is_some() {
            return Err(CodecError::UnsupportedOperation {
                codec: super::NAME.into(),
                detail: "multiple frames",
            });
        }
        let format = header.pixel_format;
        let bit_count = match format {
            PixelFormat::Bpp1Indexed => 1,
            PixelFormat::Bpp4Indexed => 4,
            PixelFormat::Bpp8Indexed => 8,
            PixelFormat::Bpp24Bgr | PixelFormat::Bpp24Rgb => 24,
            PixelFormat::Bpp32Bgra | PixelFormat::Bpp32Rgba => 32,
            other => return Err(CodecError::UnsupportedPixelFormat(other)),
        };
        let rle = match self.compression {
            Compression::None => false,
            Compression::Rle if format == PixelFormat::Bpp8Indexed => true,
            Compression::Rle => {
                return Err(CodecError::UnsupportedCompression(format!(
                    "BMP RLE needs 8-bit indexed input, got {format:?}"
                )));
            }
            other => {
                return Err(CodecError::UnsupportedCompression(format!("{other:?} for BMP")));
            }
        };

        let mut palette = Vec::new();
        if let Some(table) = header.palette.as_ref().filter(|_| format.is_indexed()) {
            let capacity = 1usize << bit_count;
            if table.len() > capacity {
                return Err(CodecError::InvalidInput(format!(
                    "{} palette entries, {bit_count}-bit BMP holds {capacity}",
                    table.len()
                )));
            }
            for index in 0..table.len() {
                palette.push(table.color(index)?);
            }
        }

        let mut profile = header.iccp.clone().filter(|_| self.want_iccp);
        let v5 = self.force_v5.unwrap_or(profile.is_some());
        if !v5 && profile.take().is_some() {
            log::warn!("bmp: V3 header cannot carry an ICC profile, dropping it");
        }

        let width = header.width;
        let frame = PendingFrame {
            format,
            width,
            height: header.height,
            bit_count,
            palette,
            profile,
            v5,
            resolution: header.resolution.map_or((DEFAULT_PPM, DEFAULT_PPM), |r| {
                (
                    i32::try_from(r.x_ppm).unwrap_or(i32::MAX),
                    i32::try_from(r.y_ppm).unwrap_or(i32::MAX),
                )
            }),
            row: vec![0; bits_to_bytes(width, bit_count) + dib_row_pad(width, bit_count)],
            rle_rows: rle.then(Vec::new),
        };
        log::debug!(
            "bmp: writing {}x{} at {bit_count} bpp, {:?}, V{} header",
            width,
            header.height,
            frame.compression(),
            if v5 { 5 } else { 3 }
        );

        if !rle {
            let image_size = (frame.row.len() as u64) * u64::from(frame.height);
            io.write_all(&frame.prefix(image_size)?)?;
        }
        self.frame = Some(frame);
        Ok(1)
    }

    fn write_row(&mut self, io: &mut dyn WriteIo, row: &[u8]) -> Result<(), CodecError> {
        let frame = self.frame.as_mut().ok_or(CodecError::InvalidState {
            operation: "write_row",
            state: "no-frame",
        })?;
        frame.store_row(row);
        match frame.rle_rows.as_mut() {
            Some(rows) => {
                let mut encoded = Vec::new();
                rle::encode_row8(&frame.row[..frame.width as usize], &mut encoded);
                rows.push(encoded);
            }
            None => io.write_all(&frame.row)?,
        }
        Ok(())
    }

    fn finish(&mut self, io: &mut dyn WriteIo) -> Result<(), CodecError> {
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };
        if let Some(rows) = frame.rle_rows.as_ref() {
            // rows plus the end-of-bitmap marker
            let image_size = rows.iter().map(|r| r.len() as u64).sum::<u64>() + 2;
            io.write_all(&frame.prefix(image_size)?)?;
            for row in rows.iter().rev() {
                io.write_all(row)?;
            }
            io.write_all(&[0, 1])?;
        }
        if let Some(profile) = frame.profile.as_ref() {
            io.write_all(profile)?;
        }
        log::debug!("bmp: finished file at offset {}", self.base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{describe, load};
    use super::*;
    use alloc::sync::Arc;
    use std::io::Cursor;

    use crate::image::{Image, Orientation};
    use crate::options::ReadOptions;
    use crate::pixel::{Palette, RGB8};
    use crate::session::{DecodeSession, EncodeSession};

    fn encode(image: &Image, options: WriteOptions) -> Result<Vec<u8>, CodecError> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut session = EncodeSession::start(Arc::new(describe()), load()?, &mut out, options)?;
            session.write_image(image)?;
            session.finish()?;
        }
        Ok(out.into_inner())
    }

    fn decode(data: Vec<u8>, options: ReadOptions) -> Image {
        let mut session =
            DecodeSession::start(Arc::new(describe()), load().unwrap(), Cursor::new(data), options)
                .unwrap();
        session.next_image().unwrap()
    }

    #[test]
    fn rgb_round_trip() {
        let header = FrameHeader::new(3, 2, PixelFormat::Bpp24Rgb).unwrap();
        let packed: Vec<u8> = (0..18).collect();
        let image = Image::from_packed_rows(header, &packed).unwrap();
        let data = encode(&image, WriteOptions::default()).unwrap();
        // 54 header bytes, two rows of 9 bytes padded to 12
        assert_eq!(data.len(), 54 + 24);
        assert_eq!(u32::from_le_bytes(data[2..6].try_into().unwrap()), 78);

        let decoded = decode(data, ReadOptions::default().with_output(PixelFormat::Bpp24Rgb));
        assert_eq!(decoded.header.source.orientation, Orientation::TopDown);
        assert_eq!(decoded.to_packed(), packed);
    }

    #[test]
    fn rle8_round_trip() {
        let palette = Palette::Rgb8((0..4).map(|i| RGB8::new(i * 60, 0, 0)).collect());
        let header = FrameHeader::new(6, 3, PixelFormat::Bpp8Indexed)
            .unwrap()
            .with_palette(palette.clone());
        let packed = [0, 0, 0, 1, 2, 3, 3, 3, 3, 3, 3, 3, 1, 2, 1, 2, 1, 0];
        let image = Image::from_packed_rows(header, &packed).unwrap();
        let data = encode(&image, WriteOptions::default().with_compression(Compression::Rle)).unwrap();

        let decoded = decode(data, ReadOptions::default());
        assert_eq!(decoded.header.source.compression, Compression::Rle);
        assert_eq!(decoded.header.source.orientation, Orientation::BottomUp);
        assert_eq!(decoded.header.palette, Some(palette));
        assert_eq!(decoded.to_packed(), packed);
    }

    #[test]
    fn rle_needs_indexed_input() {
        let header = FrameHeader::new(1, 1, PixelFormat::Bpp24Bgr).unwrap();
        let image = Image::new(header).unwrap();
        let err = encode(&image, WriteOptions::default().with_compression(Compression::Rle)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedCompression(_)));
    }

    #[test]
    fn v5_carries_icc_profile() {
        let profile = b"not really an icc profile".to_vec();
        let header = FrameHeader::new(2, 2, PixelFormat::Bpp32Bgra)
            .unwrap()
            .with_iccp(profile.clone());
        let image = Image::new(header).unwrap();
        let options = WriteOptions::default().with_io_options(IoOptions::ICCP);
        let data = encode(&image, options).unwrap();
        assert_eq!(u32::from_le_bytes(data[14..18].try_into().unwrap()), V5_HEADER_SIZE);

        let decoded = decode(data, ReadOptions::default().with_io_options(IoOptions::ICCP));
        assert_eq!(decoded.header.iccp, Some(profile));
    }

    #[test]
    fn forced_v3_drops_profile() {
        let header = FrameHeader::new(1, 1, PixelFormat::Bpp24Bgr)
            .unwrap()
            .with_iccp(vec![1, 2, 3]);
        let image = Image::new(header).unwrap();
        let options = WriteOptions::default()
            .with_io_options(IoOptions::ICCP)
            .with_tuning(HEADER_TUNING, "v3");
        let data = encode(&image, options).unwrap();
        assert_eq!(data.len(), 54 + 4);
    }
}
