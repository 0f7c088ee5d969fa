//! BMP headers: the legacy DDB bitmap, the DIB file header, and the four
//! DIB info header versions.
//!
//! All fields are little-endian.

use alloc::format;
use alloc::string::String;
use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::image::{Orientation, Resolution};
use crate::io::ReadIo;
use crate::options::Compression;
use crate::pixel::PixelFormat;
use crate::CodecError;

pub(crate) const DDB_MAGIC: u16 = 0x0002;
/// "BM".
pub(crate) const DIB_MAGIC: u16 = 0x4D42;

pub(crate) const FILE_HEADER_SIZE: u32 = 14;
pub(crate) const CORE_HEADER_SIZE: u32 = 12;
pub(crate) const V3_HEADER_SIZE: u32 = 40;
pub(crate) const V4_HEADER_SIZE: u32 = 108;
pub(crate) const V5_HEADER_SIZE: u32 = 124;

/// `LCS_PROFILE_EMBEDDED`.
pub(crate) const PROFILE_EMBEDDED: u32 = u32::from_be_bytes(*b"MBED");
/// `LCS_sRGB`.
pub(crate) const COLOR_SPACE_SRGB: u32 = u32::from_be_bytes(*b"sRGB");
/// `LCS_GM_IMAGES`.
pub(crate) const INTENT_IMAGES: u32 = 4;

/// Compression codes this decoder understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BmpCompression {
    Rgb,
    Rle8,
    Rle4,
    BitFields,
}

impl BmpCompression {
    pub fn from_code(code: u32) -> Result<Self, CodecError> {
        match code {
            0 => Ok(BmpCompression::Rgb),
            1 => Ok(BmpCompression::Rle8),
            2 => Ok(BmpCompression::Rle4),
            3 => Ok(BmpCompression::BitFields),
            other => {
                log::error!("BMP: unsupported compression {other}");
                Err(CodecError::UnsupportedCompression(format!(
                    "BMP compression type {other}"
                )))
            }
        }
    }

    pub fn code(self) -> u32 {
        match self {
            BmpCompression::Rgb => 0,
            BmpCompression::Rle8 => 1,
            BmpCompression::Rle4 => 2,
            BmpCompression::BitFields => 3,
        }
    }

    pub fn is_rle(self) -> bool {
        matches!(self, BmpCompression::Rle8 | BmpCompression::Rle4)
    }

    pub fn as_compression(self) -> Compression {
        match self {
            BmpCompression::Rgb => Compression::None,
            BmpCompression::Rle8 | BmpCompression::Rle4 => Compression::Rle,
            BmpCompression::BitFields => Compression::BitFields,
        }
    }
}

/// Channel masks of a BITFIELDS image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub alpha: u32,
}

impl ChannelMasks {
    pub const RGB555: Self = Self::rgb(0x7C00, 0x03E0, 0x001F);
    pub const RGB565: Self = Self::rgb(0xF800, 0x07E0, 0x001F);
    pub const BGRA32: Self = Self {
        red: 0x00FF_0000,
        green: 0x0000_FF00,
        blue: 0x0000_00FF,
        alpha: 0xFF00_0000,
    };

    const fn rgb(red: u32, green: u32, blue: u32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 0,
        }
    }

    fn read(io: &mut dyn ReadIo, with_alpha: bool) -> Result<Self, CodecError> {
        Ok(Self {
            red: io.read_u32::<LittleEndian>()?,
            green: io.read_u32::<LittleEndian>()?,
            blue: io.read_u32::<LittleEndian>()?,
            alpha: if with_alpha {
                io.read_u32::<LittleEndian>()?
            } else {
                0
            },
        })
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.red)?;
        out.write_u32::<LittleEndian>(self.green)?;
        out.write_u32::<LittleEndian>(self.blue)?;
        out.write_u32::<LittleEndian>(self.alpha)
    }

    /// In-memory layout with the same packing, if there is one.
    pub fn source_format(&self, bit_count: u16) -> Option<PixelFormat> {
        match bit_count {
            16 if *self == Self::RGB555 => Some(PixelFormat::Bpp16Rgb555),
            16 if *self == Self::RGB565 => Some(PixelFormat::Bpp16Rgb565),
            32 if self.red == Self::BGRA32.red
                && self.green == Self::BGRA32.green
                && self.blue == Self::BGRA32.blue =>
            {
                Some(PixelFormat::Bpp32Bgra)
            }
            _ => None,
        }
    }
}

/// Windows 1.x/2.x device-dependent bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DdbBitmap {
    pub kind: u16,
    pub width: u16,
    pub height: u16,
    pub byte_width: u16,
    pub planes: u8,
    pub bit_count: u8,
    pub pixels: u32,
}

impl DdbBitmap {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        Ok(Self {
            kind: io.read_u16::<LittleEndian>()?,
            width: io.read_u16::<LittleEndian>()?,
            height: io.read_u16::<LittleEndian>()?,
            byte_width: io.read_u16::<LittleEndian>()?,
            planes: io.read_u8()?,
            bit_count: io.read_u8()?,
            pixels: io.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub file_size: u32,
    pub pixel_offset: u32,
}

impl FileHeader {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        let file_size = io.read_u32::<LittleEndian>()?;
        let _reserved = io.read_u32::<LittleEndian>()?;
        let pixel_offset = io.read_u32::<LittleEndian>()?;
        Ok(Self {
            file_size,
            pixel_offset,
        })
    }

    pub fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_u16::<LittleEndian>(DIB_MAGIC)?;
        out.write_u32::<LittleEndian>(self.file_size)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(self.pixel_offset)
    }
}

/// `BITMAPCOREHEADER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CoreHeader {
    pub width: u16,
    pub height: u16,
    pub planes: u16,
    pub bit_count: u16,
}

/// `BITMAPINFOHEADER`, also the leading part of V4 and V5.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct InfoV3 {
    /// Negative height means rows are stored top-down.
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_ppm: i32,
    pub y_ppm: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl InfoV3 {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        Ok(Self {
            width: io.read_i32::<LittleEndian>()?,
            height: io.read_i32::<LittleEndian>()?,
            planes: io.read_u16::<LittleEndian>()?,
            bit_count: io.read_u16::<LittleEndian>()?,
            compression: io.read_u32::<LittleEndian>()?,
            image_size: io.read_u32::<LittleEndian>()?,
            x_ppm: io.read_i32::<LittleEndian>()?,
            y_ppm: io.read_i32::<LittleEndian>()?,
            colors_used: io.read_u32::<LittleEndian>()?,
            colors_important: io.read_u32::<LittleEndian>()?,
        })
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.width)?;
        out.write_i32::<LittleEndian>(self.height)?;
        out.write_u16::<LittleEndian>(self.planes)?;
        out.write_u16::<LittleEndian>(self.bit_count)?;
        out.write_u32::<LittleEndian>(self.compression)?;
        out.write_u32::<LittleEndian>(self.image_size)?;
        out.write_i32::<LittleEndian>(self.x_ppm)?;
        out.write_i32::<LittleEndian>(self.y_ppm)?;
        out.write_u32::<LittleEndian>(self.colors_used)?;
        out.write_u32::<LittleEndian>(self.colors_important)
    }
}

/// Color space block added by `BITMAPV4HEADER`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ColorSpaceV4 {
    pub masks: ChannelMasks,
    pub cs_type: u32,
    pub endpoints: [u32; 9],
    pub gamma: [u32; 3],
}

impl ColorSpaceV4 {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        let masks = ChannelMasks::read(io, true)?;
        let cs_type = io.read_u32::<LittleEndian>()?;
        let mut endpoints = [0u32; 9];
        io.read_u32_into::<LittleEndian>(&mut endpoints)?;
        let mut gamma = [0u32; 3];
        io.read_u32_into::<LittleEndian>(&mut gamma)?;
        Ok(Self {
            masks,
            cs_type,
            endpoints,
            gamma,
        })
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        self.masks.write(out)?;
        out.write_u32::<LittleEndian>(self.cs_type)?;
        for value in self.endpoints.iter().chain(&self.gamma) {
            out.write_u32::<LittleEndian>(*value)?;
        }
        Ok(())
    }
}

/// Profile block added by `BITMAPV5HEADER`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ProfileV5 {
    pub intent: u32,
    /// Offset of the ICC profile from the start of the info header.
    pub profile_data: u32,
    pub profile_size: u32,
    pub reserved: u32,
}

impl ProfileV5 {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        Ok(Self {
            intent: io.read_u32::<LittleEndian>()?,
            profile_data: io.read_u32::<LittleEndian>()?,
            profile_size: io.read_u32::<LittleEndian>()?,
            reserved: io.read_u32::<LittleEndian>()?,
        })
    }

    fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.intent)?;
        out.write_u32::<LittleEndian>(self.profile_data)?;
        out.write_u32::<LittleEndian>(self.profile_size)?;
        out.write_u32::<LittleEndian>(self.reserved)
    }
}

/// DIB info header, by version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InfoHeader {
    Core(CoreHeader),
    V3(InfoV3),
    V4(InfoV3, ColorSpaceV4),
    V5(InfoV3, ColorSpaceV4, ProfileV5),
}

impl InfoHeader {
    fn read(io: &mut dyn ReadIo) -> Result<Self, CodecError> {
        let size = io.read_u32::<LittleEndian>()?;
        match size {
            CORE_HEADER_SIZE => Ok(InfoHeader::Core(CoreHeader {
                width: io.read_u16::<LittleEndian>()?,
                height: io.read_u16::<LittleEndian>()?,
                planes: io.read_u16::<LittleEndian>()?,
                bit_count: io.read_u16::<LittleEndian>()?,
            })),
            V3_HEADER_SIZE => Ok(InfoHeader::V3(InfoV3::read(io)?)),
            V4_HEADER_SIZE => Ok(InfoHeader::V4(InfoV3::read(io)?, ColorSpaceV4::read(io)?)),
            V5_HEADER_SIZE => Ok(InfoHeader::V5(
                InfoV3::read(io)?,
                ColorSpaceV4::read(io)?,
                ProfileV5::read(io)?,
            )),
            other => {
                log::error!("BMP: unsupported info header size {other}");
                Err(CodecError::UnsupportedFormat(format!(
                    "BMP info header of {other} bytes"
                )))
            }
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            InfoHeader::Core(_) => CORE_HEADER_SIZE,
            InfoHeader::V3(_) => V3_HEADER_SIZE,
            InfoHeader::V4(..) => V4_HEADER_SIZE,
            InfoHeader::V5(..) => V5_HEADER_SIZE,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            InfoHeader::Core(_) => 2,
            InfoHeader::V3(_) => 3,
            InfoHeader::V4(..) => 4,
            InfoHeader::V5(..) => 5,
        }
    }

    /// Write the size field and the header. Core headers are never written.
    pub fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.size())?;
        match self {
            InfoHeader::Core(core) => {
                out.write_u16::<LittleEndian>(core.width)?;
                out.write_u16::<LittleEndian>(core.height)?;
                out.write_u16::<LittleEndian>(core.planes)?;
                out.write_u16::<LittleEndian>(core.bit_count)
            }
            InfoHeader::V3(info) => info.write(out),
            InfoHeader::V4(info, cs) => {
                info.write(out)?;
                cs.write(out)
            }
            InfoHeader::V5(info, cs, profile) => {
                info.write(out)?;
                cs.write(out)?;
                profile.write(out)
            }
        }
    }
}

/// Everything in front of the palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BmpHeader {
    Ddb(DdbBitmap),
    Dib { file: FileHeader, info: InfoHeader },
}

/// Read the magic number and the headers that follow it.
pub(crate) fn read_header(io: &mut dyn ReadIo) -> Result<BmpHeader, CodecError> {
    let magic = io.read_u16::<LittleEndian>()?;
    match magic {
        DDB_MAGIC => Ok(BmpHeader::Ddb(DdbBitmap::read(io)?)),
        DIB_MAGIC => {
            let file = FileHeader::read(io)?;
            let info = InfoHeader::read(io)?;
            Ok(BmpHeader::Dib { file, info })
        }
        other => {
            log::error!("BMP: invalid magic number 0x{other:04x}");
            Err(CodecError::UnsupportedFormat(format!(
                "0x{other:04x} is not a BMP magic number"
            )))
        }
    }
}

/// Validated geometry derived from a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub bit_count: u16,
    pub compression: BmpCompression,
    /// Bytes per palette entry: 3 for DDB and core headers, 4 otherwise.
    pub palette_entry_size: u64,
    /// Declared palette size; 0 means the full table for the bit depth.
    pub colors_used: u32,
    pub masks: Option<ChannelMasks>,
    pub resolution: Option<Resolution>,
    /// Bytes skipped after each uncompressed row.
    pub row_pad: usize,
    /// Absolute offset and size of an embedded ICC profile, relative to the
    /// start of the file.
    pub profile: Option<(u64, u32)>,
}

fn broken(message: String) -> CodecError {
    log::error!("BMP: {message}");
    CodecError::BrokenImage(message)
}

impl BmpHeader {
    pub fn version(&self) -> u32 {
        match self {
            BmpHeader::Ddb(_) => 1,
            BmpHeader::Dib { info, .. } => info.version(),
        }
    }

    /// Validate the header and derive the frame geometry. `io` must be
    /// positioned right after the info header; BITFIELDS masks of a V3
    /// header are read from there.
    pub fn geometry(&self, io: &mut dyn ReadIo) -> Result<Geometry, CodecError> {
        match self {
            BmpHeader::Ddb(ddb) => ddb_geometry(ddb),
            BmpHeader::Dib { info, .. } => dib_geometry(info, io),
        }
    }
}

fn ddb_geometry(ddb: &DdbBitmap) -> Result<Geometry, CodecError> {
    if ddb.kind != 0 {
        return Err(broken(format!("DDB bitmap type {} is not 0", ddb.kind)));
    }
    if ddb.planes != 1 {
        return Err(broken(format!("DDB has {} planes, expected 1", ddb.planes)));
    }
    if ddb.pixels != 0 {
        return Err(broken(format!("DDB pixel pointer {} is not 0", ddb.pixels)));
    }
    if !matches!(ddb.bit_count, 1 | 4 | 8) {
        return Err(broken(format!("DDB bit depth {} is not 1, 4 or 8", ddb.bit_count)));
    }
    if ddb.width == 0 || ddb.height == 0 {
        return Err(broken(format!("zero image dimension {}x{}", ddb.width, ddb.height)));
    }
    let width = u32::from(ddb.width);
    let bytes_in_row = bits_to_bytes(width, u16::from(ddb.bit_count));
    let byte_width = usize::from(ddb.byte_width);
    if byte_width < bytes_in_row {
        return Err(broken(format!(
            "DDB row width {byte_width} is shorter than {bytes_in_row} bytes of pixels"
        )));
    }
    Ok(Geometry {
        width,
        height: u32::from(ddb.height),
        orientation: Orientation::TopDown,
        bit_count: u16::from(ddb.bit_count),
        compression: BmpCompression::Rgb,
        palette_entry_size: 3,
        colors_used: 0,
        masks: None,
        resolution: None,
        row_pad: byte_width - bytes_in_row,
        profile: None,
    })
}

fn dib_geometry(header: &InfoHeader, io: &mut dyn ReadIo) -> Result<Geometry, CodecError> {
    let info = match header {
        InfoHeader::Core(core) => return core_geometry(core),
        InfoHeader::V3(info) | InfoHeader::V4(info, _) | InfoHeader::V5(info, _, _) => info,
    };

    check_planes(info.planes)?;
    check_bit_count(info.bit_count, &[1, 2, 4, 8, 16, 24, 32])?;
    if info.width <= 0 || info.height == 0 {
        return Err(broken(format!("invalid image dimension {}x{}", info.width, info.height)));
    }
    let compression = match info.compression {
        // BITFIELDS is only defined for 16 and 32 bits
        3 if !matches!(info.bit_count, 16 | 32) => {
            return Err(broken(format!(
                "BITFIELDS compression with {} bits per pixel",
                info.bit_count
            )));
        }
        code => BmpCompression::from_code(code)?,
    };
    match compression {
        BmpCompression::Rle4 if info.bit_count != 4 => {
            return Err(broken(format!("RLE4 compression with {} bits per pixel", info.bit_count)));
        }
        BmpCompression::Rle8 if info.bit_count != 8 => {
            return Err(broken(format!("RLE8 compression with {} bits per pixel", info.bit_count)));
        }
        _ => {}
    }

    let masks = match (compression, header) {
        (BmpCompression::BitFields, InfoHeader::V3(_)) => Some(ChannelMasks::read(io, false)?),
        (BmpCompression::BitFields, InfoHeader::V4(_, cs) | InfoHeader::V5(_, cs, _)) => {
            Some(cs.masks)
        }
        _ => None,
    };

    let profile = match header {
        InfoHeader::V5(_, cs, profile)
            if cs.cs_type == PROFILE_EMBEDDED && profile.profile_size > 0 =>
        {
            Some((
                u64::from(FILE_HEADER_SIZE) + u64::from(profile.profile_data),
                profile.profile_size,
            ))
        }
        _ => None,
    };

    let width = info.width.unsigned_abs();
    Ok(Geometry {
        width,
        height: info.height.unsigned_abs(),
        orientation: if info.height > 0 {
            Orientation::BottomUp
        } else {
            Orientation::TopDown
        },
        bit_count: info.bit_count,
        compression,
        palette_entry_size: 4,
        colors_used: info.colors_used,
        masks,
        resolution: Some(Resolution {
            x_ppm: info.x_ppm.max(0).unsigned_abs(),
            y_ppm: info.y_ppm.max(0).unsigned_abs(),
        }),
        row_pad: if compression.is_rle() {
            0
        } else {
            dib_row_pad(width, info.bit_count)
        },
        profile,
    })
}

fn core_geometry(core: &CoreHeader) -> Result<Geometry, CodecError> {
    check_planes(core.planes)?;
    check_bit_count(core.bit_count, &[1, 4, 8, 24])?;
    if core.width == 0 || core.height == 0 {
        return Err(broken(format!("zero image dimension {}x{}", core.width, core.height)));
    }
    let width = u32::from(core.width);
    Ok(Geometry {
        width,
        height: u32::from(core.height),
        orientation: Orientation::BottomUp,
        bit_count: core.bit_count,
        compression: BmpCompression::Rgb,
        palette_entry_size: 3,
        colors_used: 0,
        masks: None,
        resolution: None,
        row_pad: dib_row_pad(width, core.bit_count),
        profile: None,
    })
}

fn check_planes(planes: u16) -> Result<(), CodecError> {
    if planes != 1 {
        return Err(broken(format!("{planes} color planes, expected 1")));
    }
    Ok(())
}

fn check_bit_count(bit_count: u16, allowed: &[u16]) -> Result<(), CodecError> {
    if !allowed.contains(&bit_count) {
        log::error!("BMP: unsupported bit depth {bit_count}");
        return Err(CodecError::UnsupportedBitDepth(bit_count));
    }
    Ok(())
}

pub(crate) fn bits_to_bytes(width: u32, bit_count: u16) -> usize {
    ((width as u64 * u64::from(bit_count)).div_ceil(8)) as usize
}

/// Padding that brings a DIB row to a multiple of four bytes.
pub(crate) fn dib_row_pad(width: u32, bit_count: u16) -> usize {
    let bytes = bits_to_bytes(width, bit_count);
    bytes.next_multiple_of(4) - bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn v3_file(bit_count: u16, compression: u32, height: i32) -> Vec<u8> {
        let mut out = Vec::new();
        FileHeader {
            file_size: 0,
            pixel_offset: 54,
        }
        .write(&mut out)
        .unwrap();
        InfoHeader::V3(InfoV3 {
            width: 3,
            height,
            planes: 1,
            bit_count,
            compression,
            ..InfoV3::default()
        })
        .write(&mut out)
        .unwrap();
        out
    }

    fn geometry_of(data: Vec<u8>) -> Result<Geometry, CodecError> {
        let mut io = Cursor::new(data);
        let header = read_header(&mut io)?;
        header.geometry(&mut io)
    }

    #[test]
    fn v3_header_reads_back() {
        let mut io = Cursor::new(v3_file(24, 0, 2));
        let header = read_header(&mut io).unwrap();
        assert_eq!(header.version(), 3);
        let geometry = header.geometry(&mut io).unwrap();
        assert_eq!((geometry.width, geometry.height), (3, 2));
        assert_eq!(geometry.orientation, Orientation::BottomUp);
        assert_eq!(geometry.row_pad, 3);
        assert_eq!(io.position(), 54);
    }

    #[test]
    fn negative_height_is_top_down() {
        let geometry = geometry_of(v3_file(8, 0, -2)).unwrap();
        assert_eq!(geometry.orientation, Orientation::TopDown);
        assert_eq!(geometry.height, 2);
    }

    #[test]
    fn bitfields_needs_16_or_32_bits() {
        let err = geometry_of(v3_file(8, 3, 1)).unwrap_err();
        assert!(matches!(err, CodecError::BrokenImage(_)));
    }

    #[test]
    fn rle_depth_mismatch_is_broken() {
        assert!(matches!(
            geometry_of(v3_file(8, 2, 1)),
            Err(CodecError::BrokenImage(_))
        ));
        assert!(matches!(
            geometry_of(v3_file(4, 1, 1)),
            Err(CodecError::BrokenImage(_))
        ));
    }

    #[test]
    fn jpeg_compression_unsupported() {
        assert!(matches!(
            geometry_of(v3_file(24, 4, 1)),
            Err(CodecError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn unknown_header_size() {
        let mut data = v3_file(24, 0, 1);
        data[14] = 64;
        assert!(matches!(
            read_header(&mut Cursor::new(data)),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn ddb_validation() {
        let ddb = |planes: u8, bits: u8| {
            let mut data = vec![0x02, 0x00, 0, 0, 4, 0, 2, 0, 2, 0];
            data.extend([planes, bits, 0, 0, 0, 0]);
            data
        };
        let geometry = geometry_of(ddb(1, 4)).unwrap();
        assert_eq!(geometry.orientation, Orientation::TopDown);
        assert_eq!(geometry.row_pad, 0);
        assert!(matches!(geometry_of(ddb(2, 4)), Err(CodecError::BrokenImage(_))));
        assert!(matches!(geometry_of(ddb(1, 24)), Err(CodecError::BrokenImage(_))));
    }

    #[test]
    fn v5_profile_offset() {
        let mut out = Vec::new();
        FileHeader {
            file_size: 0,
            pixel_offset: 138,
        }
        .write(&mut out)
        .unwrap();
        InfoHeader::V5(
            InfoV3 {
                width: 1,
                height: 1,
                planes: 1,
                bit_count: 24,
                ..InfoV3::default()
            },
            ColorSpaceV4 {
                cs_type: PROFILE_EMBEDDED,
                ..ColorSpaceV4::default()
            },
            ProfileV5 {
                profile_data: 128,
                profile_size: 10,
                ..ProfileV5::default()
            },
        )
        .write(&mut out)
        .unwrap();
        assert_eq!(out.len(), 138);
        let geometry = geometry_of(out).unwrap();
        assert_eq!(geometry.profile, Some((142, 10)));
    }
}
