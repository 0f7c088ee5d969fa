//! BMP backend.
//!
//! Reads Windows 1.x/2.x device-dependent bitmaps and DIB files with core,
//! V3, V4 and V5 info headers: 1/2/4/8-bit indexed, 16-bit 555, 24 and
//! 32-bit, BITFIELDS, RLE4 and RLE8. Embedded V5 ICC profiles are extracted
//! on request. Writes uncompressed or RLE8 DIB files, see [`encode`].
//!
//! In source-format mode RLE rows expand to packed palette indices and
//! BITFIELDS rows to BGR(A).

mod encode;
mod header;
mod rle;

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use std::io::{Read, Seek, SeekFrom};

use byteorder::ReadBytesExt;

use self::header::{BmpCompression, BmpHeader, ChannelMasks, Geometry, bits_to_bytes, read_header};
use crate::codec::{BackendFactory, CodecBackend, FrameDecoder, FrameEncoder};
use crate::convert::{CONVERSION_TARGETS, ConversionOptions, convert_row};
use crate::descriptor::{CodecDescriptor, Signature};
use crate::image::{FrameHeader, SourceImage};
use crate::io::{ReadIo, WriteIo};
use crate::options::{
    CodecFeatures, Compression, IoOptions, ReadFeatures, ReadOptions, WriteFeatures, WriteOptions,
};
use crate::pixel::{Palette, PixelFormat, RGB8, RequestedFormat};
use crate::{CodecError, Limits};

pub(crate) const NAME: &str = "bmp";

pub(crate) const FACTORY: BackendFactory = BackendFactory {
    name: NAME,
    describe,
    load,
};

pub(crate) fn describe() -> CodecDescriptor {
    CodecDescriptor {
        name: NAME.into(),
        version: 1,
        description: "Windows bitmap".into(),
        signatures: vec![
            Signature::exact(b"BM"),
            // DDB magic followed by bitmap type 0
            Signature::exact(&[0x02, 0x00, 0x00, 0x00]),
        ],
        extensions: vec!["bmp".into(), "dib".into()],
        mime_types: vec!["image/bmp".into(), "image/x-bmp".into()],
        read_features: ReadFeatures {
            features: CodecFeatures::STATIC | CodecFeatures::ICCP,
            output_formats: CONVERSION_TARGETS.to_vec(),
            preferred_output: RequestedFormat::Exact(PixelFormat::Bpp32Rgba),
            tuning: Vec::new(),
        },
        write_features: WriteFeatures {
            features: CodecFeatures::STATIC | CodecFeatures::ICCP,
            input_formats: encode::INPUT_FORMATS.to_vec(),
            compressions: vec![Compression::None, Compression::Rle],
            default_compression: Compression::None,
            compression_level: None,
            tuning: vec![encode::HEADER_TUNING],
        },
    }
}

fn load() -> Result<Arc<dyn CodecBackend>, CodecError> {
    Ok(Arc::new(BmpBackend))
}

struct BmpBackend;

impl CodecBackend for BmpBackend {
    fn start_decode(
        &self,
        io: &mut dyn ReadIo,
        options: &ReadOptions,
    ) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(BmpDecoder {
            base: io.stream_position()?,
            output: options.output,
            conversion: options.conversion,
            limits: options.limits,
            want_iccp: options.io_options.contains(IoOptions::ICCP),
            frame: None,
            frames_read: 0,
        }))
    }

    fn start_encode(
        &self,
        io: &mut dyn WriteIo,
        options: &WriteOptions,
    ) -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(encode::BmpEncoder::new(io.stream_position()?, options)))
    }
}

struct BmpDecoder {
    /// Stream offset of the magic number; file offsets are relative to it.
    base: u64,
    output: RequestedFormat,
    conversion: ConversionOptions,
    limits: Limits,
    want_iccp: bool,
    frame: Option<Frame>,
    frames_read: u32,
}

/// Per-frame row state.
struct Frame {
    geometry: Geometry,
    /// Layout rows are unpacked to before conversion.
    native: PixelFormat,
    palette: Option<Palette>,
    /// `None` delivers the native layout.
    target: Option<PixelFormat>,
    raw: Vec<u8>,
    native_row: Vec<u8>,
}

impl BmpDecoder {
    fn read_palette(
        &self,
        io: &mut dyn ReadIo,
        header: &BmpHeader,
        geometry: &Geometry,
    ) -> Result<Palette, CodecError> {
        let BmpHeader::Dib { file, .. } = header else {
            return Ok(system_palette(geometry.bit_count));
        };

        let position = io.stream_position()?;
        let data_start = self.base + u64::from(file.pixel_offset);
        let available = data_start.saturating_sub(position) / geometry.palette_entry_size;
        let mut count = available.min(1 << geometry.bit_count);
        if geometry.colors_used > 0 {
            count = count.min(u64::from(geometry.colors_used));
        }
        if count == 0 {
            log::error!("BMP: indexed image without a palette");
            return Err(CodecError::MissingPalette);
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let b = io.read_u8()?;
            let g = io.read_u8()?;
            let r = io.read_u8()?;
            if geometry.palette_entry_size == 4 {
                let _reserved = io.read_u8()?;
            }
            entries.push(RGB8::new(r, g, b));
        }
        Ok(Palette::Rgb8(entries))
    }

    fn read_profile(&self, io: &mut dyn ReadIo, offset: u64, size: u32) -> Result<Vec<u8>, CodecError> {
        self.limits.check_memory(u64::from(size))?;
        let mut profile = Vec::new();
        profile
            .try_reserve_exact(size as usize)
            .map_err(|_| CodecError::MemoryAllocation)?;
        profile.resize(size as usize, 0);
        io.seek(SeekFrom::Start(self.base + offset))?;
        io.read_exact(&mut profile)?;
        Ok(profile)
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CodecError::MemoryAllocation)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Layout rows unpack to, and the stored layout reported in the header.
fn native_format(geometry: &Geometry) -> Result<(PixelFormat, Option<PixelFormat>), CodecError> {
    let bits = geometry.bit_count;
    if geometry.compression == BmpCompression::BitFields {
        let masks = geometry.masks.unwrap_or_default();
        let native = if masks.alpha != 0 {
            PixelFormat::Bpp32Bgra
        } else {
            PixelFormat::Bpp24Bgr
        };
        return Ok((native, masks.source_format(bits)));
    }
    let native = match bits {
        16 => PixelFormat::Bpp16Rgb555,
        24 => PixelFormat::Bpp24Bgr,
        32 => PixelFormat::Bpp32Bgra,
        bits => PixelFormat::indexed_for_bits(bits).ok_or(CodecError::UnsupportedBitDepth(bits))?,
    };
    Ok((native, Some(native)))
}

/// Fixed palettes of device-dependent bitmaps: black and white, the 16 VGA
/// colors, or a 3-3-2 color cube.
fn system_palette(bit_count: u16) -> Palette {
    const VGA: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (128, 0, 0),
        (0, 128, 0),
        (128, 128, 0),
        (0, 0, 128),
        (128, 0, 128),
        (0, 128, 128),
        (192, 192, 192),
        (128, 128, 128),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (0, 0, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];
    let entries = match bit_count {
        1 => vec![RGB8::new(0, 0, 0), RGB8::new(255, 255, 255)],
        4 => VGA.iter().map(|&(r, g, b)| RGB8::new(r, g, b)).collect(),
        _ => (0..=255u8)
            .map(|i| {
                RGB8::new(
                    ((u16::from(i >> 5) * 255) / 7) as u8,
                    ((u16::from((i >> 2) & 7) * 255) / 7) as u8,
                    ((u16::from(i & 3) * 255) / 3) as u8,
                )
            })
            .collect(),
    };
    Palette::Rgb8(entries)
}

/// Scale the masked channel of `value` to 8 bits. `None` for an empty mask.
fn unpack_channel(value: u32, mask: u32) -> Option<u8> {
    if mask == 0 {
        return None;
    }
    let shift = mask.trailing_zeros();
    let bits = (mask >> shift).count_ones();
    let v = (value & mask) >> shift;
    Some(if bits >= 8 {
        (v >> (bits - 8)) as u8
    } else {
        let max = (1u32 << bits) - 1;
        ((v * 255 + max / 2) / max) as u8
    })
}

fn unpack_bitfields(raw: &[u8], bit_count: u16, masks: &ChannelMasks, native: PixelFormat, out: &mut [u8]) {
    let step = usize::from(bit_count / 8);
    let channels = if native == PixelFormat::Bpp32Bgra { 4 } else { 3 };
    for (pixel, dst) in raw.chunks_exact(step).zip(out.chunks_exact_mut(channels)) {
        let value = if step == 2 {
            u32::from(u16::from_le_bytes([pixel[0], pixel[1]]))
        } else {
            u32::from_le_bytes([pixel[0], pixel[1], pixel[2], pixel[3]])
        };
        dst[0] = unpack_channel(value, masks.blue).unwrap_or(0);
        dst[1] = unpack_channel(value, masks.green).unwrap_or(0);
        dst[2] = unpack_channel(value, masks.red).unwrap_or(0);
        if channels == 4 {
            dst[3] = unpack_channel(value, masks.alpha).unwrap_or(255);
        }
    }
}

impl Frame {
    /// Read the next stored row into `native_row`.
    fn fill_native(&mut self, io: &mut dyn ReadIo) -> Result<(), CodecError> {
        let geometry = &self.geometry;
        if geometry.compression.is_rle() {
            self.native_row.fill(0);
            let bits = u32::from(geometry.bit_count);
            return rle::decode_row(io, bits, geometry.width as usize, &mut self.native_row);
        }

        io.read_exact(&mut self.raw)?;
        if geometry.row_pad > 0 {
            io.seek(SeekFrom::Current(geometry.row_pad as i64))?;
        }
        match (geometry.compression, geometry.bit_count) {
            (BmpCompression::BitFields, bits) => {
                let masks = geometry.masks.unwrap_or_default();
                unpack_bitfields(&self.raw, bits, &masks, self.native, &mut self.native_row);
            }
            (_, 16) => {
                // little-endian on disk, native order in memory
                for (src, dst) in self.raw.chunks_exact(2).zip(self.native_row.chunks_exact_mut(2)) {
                    dst.copy_from_slice(&u16::from_le_bytes([src[0], src[1]]).to_ne_bytes());
                }
            }
            _ => self.native_row.copy_from_slice(&self.raw),
        }
        Ok(())
    }
}

impl FrameDecoder for BmpDecoder {
    fn next_frame(&mut self, io: &mut dyn ReadIo) -> Result<FrameHeader, CodecError> {
        if self.frames_read > 0 {
            return Err(CodecError::NoMoreFrames);
        }
        io.seek(SeekFrom::Start(self.base))?;
        let header = read_header(io)?;
        let geometry = header.geometry(io)?;
        log::debug!(
            "BMP: version {} header, {}x{} at {} bpp, {:?}",
            header.version(),
            geometry.width,
            geometry.height,
            geometry.bit_count,
            geometry.compression
        );
        self.limits
            .check_dimensions(u64::from(geometry.width), u64::from(geometry.height))?;

        let (native, source_format) = native_format(&geometry)?;
        let palette = if native.is_indexed() {
            Some(self.read_palette(io, &header, &geometry)?)
        } else {
            None
        };

        let iccp = match geometry.profile {
            Some((offset, size)) if self.want_iccp => Some(self.read_profile(io, offset, size)?),
            _ => None,
        };

        if let BmpHeader::Dib { file, info } = &header {
            let header_end = u64::from(header::FILE_HEADER_SIZE) + u64::from(info.size());
            if u64::from(file.pixel_offset) < header_end {
                log::error!("BMP: pixel data offset {} inside the header", file.pixel_offset);
                return Err(CodecError::BrokenImage(format!(
                    "pixel data offset {} inside the header",
                    file.pixel_offset
                )));
            }
            io.seek(SeekFrom::Start(self.base + u64::from(file.pixel_offset)))?;
        }

        let target = match self.output {
            RequestedFormat::Source => None,
            RequestedFormat::Exact(format) => Some(format),
        };
        let mut frame_header = FrameHeader::new(geometry.width, geometry.height, target.unwrap_or(native))?;
        frame_header.source = SourceImage {
            pixel_format: source_format,
            compression: geometry.compression.as_compression(),
            orientation: geometry.orientation,
            interlaced: false,
        };
        frame_header.resolution = geometry.resolution;
        frame_header.iccp = iccp;
        if target.is_none() {
            frame_header.palette = palette.clone();
        }

        let raw_len = if geometry.compression.is_rle() {
            0
        } else {
            bits_to_bytes(geometry.width, geometry.bit_count)
        };
        self.frame = Some(Frame {
            geometry,
            native,
            palette,
            target,
            raw: zeroed(raw_len)?,
            native_row: zeroed(native.bytes_in_row(geometry.width)?)?,
        });
        self.frames_read += 1;
        Ok(frame_header)
    }

    fn read_row(&mut self, io: &mut dyn ReadIo, row: &mut [u8]) -> Result<(), CodecError> {
        let frame = self.frame.as_mut().ok_or(CodecError::InvalidState {
            operation: "read_row",
            state: "no-frame",
        })?;
        frame.fill_native(io)?;
        match frame.target {
            None => {
                let len = frame.native_row.len();
                row[..len].copy_from_slice(&frame.native_row);
                Ok(())
            }
            Some(target) => convert_row(
                &frame.native_row,
                frame.native,
                frame.palette.as_ref(),
                row,
                target,
                frame.geometry.width,
                &self.conversion,
            ),
        }
    }

    fn frame_count(&self) -> Option<u32> {
        Some(1)
    }

    fn finish(&mut self, _io: &mut dyn ReadIo) -> Result<(), CodecError> {
        self.frame = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::image::Orientation;
    use crate::session::DecodeSession;

    /// 2x2 24-bit bottom-up V3 file: top row red, blue; bottom row green, white.
    fn bgr_2x2() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(b"BM");
        data.extend(70u32.to_le_bytes());
        data.extend([0; 4]);
        data.extend(54u32.to_le_bytes());
        data.extend(40u32.to_le_bytes());
        data.extend(2i32.to_le_bytes());
        data.extend(2i32.to_le_bytes());
        data.extend(1u16.to_le_bytes());
        data.extend(24u16.to_le_bytes());
        data.extend([0; 24]);
        // stored bottom row first, each padded to 8 bytes
        data.extend([0, 255, 0, 255, 255, 255, 0, 0]);
        data.extend([0, 0, 255, 255, 0, 0, 0, 0]);
        data
    }

    fn session(data: Vec<u8>, options: ReadOptions) -> DecodeSession<'static> {
        DecodeSession::start(Arc::new(describe()), load().unwrap(), Cursor::new(data), options).unwrap()
    }

    #[test]
    fn decodes_bottom_up_rgb() {
        let mut s = session(bgr_2x2(), ReadOptions::default().with_output(PixelFormat::Bpp24Rgb));
        let image = s.next_image().unwrap();
        assert_eq!(image.header.source.orientation, Orientation::BottomUp);
        assert_eq!(image.row(0).unwrap()[..6], [255, 0, 0, 0, 0, 255]);
        assert_eq!(image.row(1).unwrap()[..6], [0, 255, 0, 255, 255, 255]);
        assert!(s.next_frame().unwrap_err().is_no_more_frames());
    }

    #[test]
    fn source_output_keeps_bgr() {
        let mut s = session(bgr_2x2(), ReadOptions::default());
        let image = s.next_image().unwrap();
        assert_eq!(image.header.pixel_format, PixelFormat::Bpp24Bgr);
        assert_eq!(image.row(0).unwrap()[..6], [0, 0, 255, 255, 0, 0]);
        assert_eq!(image.header.stride, 8);
    }

    #[test]
    fn bitfields_565() {
        let masks = ChannelMasks::RGB565;
        let mut raw = [0u8; 4];
        unpack_bitfields(&[0x00, 0xF8], 16, &masks, PixelFormat::Bpp24Bgr, &mut raw[..3]);
        assert_eq!(raw[..3], [0, 0, 255]);
        assert_eq!(unpack_channel(0x07E0, masks.green), Some(255));
        assert_eq!(unpack_channel(0, masks.alpha), None);
    }

    #[test]
    fn ddb_uses_system_palette() {
        // 1-bit 8x1 DDB, byte_width 2 so one pad byte per row
        let mut data = vec![0x02, 0x00, 0, 0, 8, 0, 1, 0, 2, 0, 1, 1, 0, 0, 0, 0];
        data.extend([0b1000_0001, 0xEE]);
        let mut s = session(data, ReadOptions::default().with_output(PixelFormat::Bpp24Rgb));
        let image = s.next_image().unwrap();
        let row = image.row(0).unwrap();
        assert_eq!(row[..3], [255, 255, 255]);
        assert_eq!(row[3..6], [0, 0, 0]);
        assert_eq!(row[21..24], [255, 255, 255]);
    }

    #[test]
    fn missing_palette() {
        let mut data = bgr_2x2();
        data[28] = 8;
        let mut s = session(data, ReadOptions::default());
        assert!(matches!(s.next_frame(), Err(CodecError::MissingPalette)));
    }
}
