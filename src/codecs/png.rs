//! PNG backend using the png crate.
//!
//! The png reader owns its input while the session stream is only lent per
//! call, so the reader is given a [`Feed`] queue. The chunks ahead of the
//! first `IDAT` are queued up front; after that the stream is moved across a
//! block at a time whenever the reader runs dry. Non-interlaced images are
//! streamed row by row; interlaced images are decoded whole and delivered as
//! a single pass. Encoding collects one frame and writes it when its last
//! row arrives.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use std::io::{ErrorKind, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::codec::{BackendFactory, CodecBackend, FrameDecoder, FrameEncoder};
use crate::convert::{CONVERSION_TARGETS, ConversionOptions, convert_row};
use crate::descriptor::{CodecDescriptor, Signature};
use crate::image::{FrameHeader, MetaEntry, Orientation, Resolution, SourceImage};
use crate::io::{ReadIo, WriteIo, read_up_to};
use crate::options::{
    CodecFeatures, Compression, CompressionLevel, IoOptions, ReadFeatures, ReadOptions,
    WriteFeatures, WriteOptions,
};
use crate::pixel::{PixelFormat, RequestedFormat};
use crate::{CodecError, Limits};

pub(crate) const NAME: &str = "png";

/// Decode tuning: strip 16-bit samples to 8 bits.
const STRIP_16_TUNING: &str = "png-strip-16";
/// Encode tuning: `none`, `sub`, `up`, `avg`, `paeth` or `adaptive`.
const FILTER_TUNING: &str = "png-filter";

/// Bytes moved from the session stream each time the reader runs dry.
const FEED_BLOCK: usize = 8 * 1024;

const INPUT_FORMATS: [PixelFormat; 8] = [
    PixelFormat::Bpp8Grayscale,
    PixelFormat::Bpp16Grayscale,
    PixelFormat::Bpp16GrayscaleAlpha,
    PixelFormat::Bpp32GrayscaleAlpha,
    PixelFormat::Bpp24Rgb,
    PixelFormat::Bpp48Rgb,
    PixelFormat::Bpp32Rgba,
    PixelFormat::Bpp64Rgba,
];

pub(crate) const FACTORY: BackendFactory = BackendFactory {
    name: NAME,
    describe,
    load,
};

pub(crate) fn describe() -> CodecDescriptor {
    CodecDescriptor {
        name: NAME.into(),
        version: 1,
        description: "Portable Network Graphics".into(),
        signatures: vec![Signature::exact(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])],
        extensions: vec!["png".into()],
        mime_types: vec!["image/png".into()],
        read_features: ReadFeatures {
            features: CodecFeatures::STATIC
                | CodecFeatures::INTERLACED
                | CodecFeatures::META_INFO
                | CodecFeatures::ICCP,
            output_formats: CONVERSION_TARGETS.to_vec(),
            preferred_output: RequestedFormat::Exact(PixelFormat::Bpp32Rgba),
            tuning: vec![STRIP_16_TUNING],
        },
        write_features: WriteFeatures {
            features: CodecFeatures::STATIC | CodecFeatures::META_INFO,
            input_formats: INPUT_FORMATS.to_vec(),
            compressions: vec![Compression::Deflate],
            default_compression: Compression::Deflate,
            compression_level: Some(CompressionLevel {
                min: 1.0,
                max: 9.0,
                default: 6.0,
                step: 1.0,
            }),
            tuning: vec![FILTER_TUNING],
        },
    }
}

fn load() -> Result<Arc<dyn CodecBackend>, CodecError> {
    Ok(Arc::new(PngBackend))
}

fn decoding_error(e: png::DecodingError) -> CodecError {
    match e {
        png::DecodingError::IoError(io) => CodecError::Io(io),
        other => CodecError::from_backend(NAME, other),
    }
}

fn encoding_error(e: png::EncodingError) -> CodecError {
    match e {
        png::EncodingError::IoError(io) => CodecError::Io(io),
        other => CodecError::from_backend(NAME, other),
    }
}

/// Input queue shared between the png reader and the decoder.
#[derive(Clone, Default)]
struct Feed(Arc<Mutex<VecDeque<u8>>>);

impl Feed {
    fn queue(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move up to one block from `io`. `false` once the stream is exhausted.
    fn refill(&self, io: &mut dyn ReadIo) -> Result<bool, CodecError> {
        let mut block = [0u8; FEED_BLOCK];
        let n = read_up_to(io, &mut block)?;
        self.queue().extend(&block[..n]);
        Ok(n > 0)
    }

    fn copy_exact(&self, io: &mut dyn ReadIo, mut len: u64) -> Result<(), CodecError> {
        let mut block = [0u8; FEED_BLOCK];
        while len > 0 {
            let n = usize::try_from(len).map_or(FEED_BLOCK, |len| len.min(FEED_BLOCK));
            io.read_exact(&mut block[..n])?;
            self.queue().extend(&block[..n]);
            len -= n as u64;
        }
        Ok(())
    }
}

impl Read for Feed {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.queue().read(buf)
    }
}

/// Queue the signature and every chunk ahead of the first `IDAT`, plus that
/// chunk's length and type. This is exactly what `read_info` consumes.
fn queue_prelude(io: &mut dyn ReadIo, feed: &Feed, limits: &Limits) -> Result<(), CodecError> {
    feed.copy_exact(io, 8)?;
    let mut queued = 8u64;
    loop {
        let mut head = [0u8; 8];
        io.read_exact(&mut head)?;
        feed.queue().extend(head);
        if &head[4..] == b"IDAT" {
            return Ok(());
        }

        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        if len > i32::MAX as u32 {
            log::error!("png: chunk length {len} out of range");
            return Err(CodecError::BrokenImage(format!("png chunk length {len} out of range")));
        }
        // body and CRC
        let body = u64::from(len) + 4;
        queued += 8 + body;
        limits.check_memory(queued)?;
        feed.copy_exact(io, body)?;
        if &head[4..] == b"IEND" {
            return Ok(());
        }
    }
}

/// Whether a png error only means the reader needs more input.
fn starved(e: &png::DecodingError) -> bool {
    matches!(e, png::DecodingError::IoError(io) if io.kind() == ErrorKind::UnexpectedEof)
}

struct PngBackend;

impl CodecBackend for PngBackend {
    fn start_decode(
        &self,
        _io: &mut dyn ReadIo,
        options: &ReadOptions,
    ) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(PngDecoder {
            output: options.output,
            conversion: options.conversion,
            limits: options.limits,
            io_options: options.io_options,
            strip_16: options
                .tuning
                .get(STRIP_16_TUNING)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            frame: None,
            done: false,
        }))
    }

    fn start_encode(
        &self,
        _io: &mut dyn WriteIo,
        options: &WriteOptions,
    ) -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(PngEncoder::new(options)?))
    }
}

struct PngDecoder {
    output: RequestedFormat,
    conversion: ConversionOptions,
    limits: Limits,
    io_options: IoOptions,
    strip_16: bool,
    frame: Option<DecodeFrame>,
    done: bool,
}

struct DecodeFrame {
    reader: png::Reader<Feed>,
    feed: Feed,
    width: u32,
    height: u32,
    native: PixelFormat,
    target: Option<PixelFormat>,
    interlaced: bool,
    /// Whole deinterlaced image and the next row to hand out.
    buffered: Option<(Vec<u8>, usize)>,
    native_row: Vec<u8>,
}

/// In-memory layout of decoded png rows after `EXPAND`.
fn output_format(color: png::ColorType, depth: png::BitDepth) -> Result<PixelFormat, CodecError> {
    let sixteen = depth == png::BitDepth::Sixteen;
    match (color, sixteen) {
        (png::ColorType::Grayscale, false) => Ok(PixelFormat::Bpp8Grayscale),
        (png::ColorType::Grayscale, true) => Ok(PixelFormat::Bpp16Grayscale),
        (png::ColorType::GrayscaleAlpha, false) => Ok(PixelFormat::Bpp16GrayscaleAlpha),
        (png::ColorType::GrayscaleAlpha, true) => Ok(PixelFormat::Bpp32GrayscaleAlpha),
        (png::ColorType::Rgb, false) => Ok(PixelFormat::Bpp24Rgb),
        (png::ColorType::Rgb, true) => Ok(PixelFormat::Bpp48Rgb),
        (png::ColorType::Rgba, false) => Ok(PixelFormat::Bpp32Rgba),
        (png::ColorType::Rgba, true) => Ok(PixelFormat::Bpp64Rgba),
        (png::ColorType::Indexed, _) => Err(CodecError::UnsupportedFormat(
            "indexed png rows were not expanded".into(),
        )),
    }
}

/// Stored layout, when it has an in-memory equivalent.
fn stored_format(color: png::ColorType, depth: png::BitDepth) -> Option<PixelFormat> {
    match (color, depth) {
        (png::ColorType::Indexed, depth) => PixelFormat::indexed_for_bits(depth as u16),
        (_, png::BitDepth::Eight | png::BitDepth::Sixteen) => output_format(color, depth).ok(),
        _ => None,
    }
}

fn text_entries(info: &png::Info<'_>) -> Vec<MetaEntry> {
    let mut meta = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        meta.push(MetaEntry {
            key: chunk.keyword.clone(),
            value: chunk.text.clone(),
        });
    }
    for chunk in &info.compressed_latin1_text {
        match chunk.get_text() {
            Ok(text) => meta.push(MetaEntry {
                key: chunk.keyword.clone(),
                value: text,
            }),
            Err(e) => log::warn!("png: skipping zTXt '{}': {e}", chunk.keyword),
        }
    }
    for chunk in &info.utf8_text {
        match chunk.get_text() {
            Ok(text) => meta.push(MetaEntry {
                key: chunk.keyword.clone(),
                value: text,
            }),
            Err(e) => log::warn!("png: skipping iTXt '{}': {e}", chunk.keyword),
        }
    }
    meta
}

/// Big-endian 16-bit samples to native order; 8-bit rows are copied.
fn to_native(src: &[u8], sixteen: bool, dst: &mut [u8]) {
    if sixteen {
        for (s, d) in src.chunks_exact(2).zip(dst.chunks_exact_mut(2)) {
            d.copy_from_slice(&u16::from_be_bytes([s[0], s[1]]).to_ne_bytes());
        }
    } else {
        dst.copy_from_slice(&src[..dst.len()]);
    }
}

impl FrameDecoder for PngDecoder {
    fn next_frame(&mut self, io: &mut dyn ReadIo) -> Result<FrameHeader, CodecError> {
        if self.done {
            return Err(CodecError::NoMoreFrames);
        }
        let feed = Feed::default();
        queue_prelude(io, &feed, &self.limits)?;

        let mut decoder = png::Decoder::new(feed.clone());
        let mut transformations = png::Transformations::EXPAND;
        if self.strip_16 {
            transformations |= png::Transformations::STRIP_16;
        }
        decoder.set_transformations(transformations);
        if let Some(bytes) = self.limits.max_memory_bytes {
            let mut png_limits = png::Limits::default();
            png_limits.bytes = usize::try_from(bytes).unwrap_or(usize::MAX);
            decoder.set_limits(png_limits);
        }
        let reader = decoder.read_info().map_err(decoding_error)?;

        let info = reader.info();
        let (width, height, interlaced) = (info.width, info.height, info.interlaced);
        self.limits
            .check_dimensions(u64::from(width), u64::from(height))?;
        let (color, depth) = reader.output_color_type();
        let native = output_format(color, depth)?;
        log::debug!(
            "png: {width}x{height} {:?}/{:?} decoding to {native:?}{}",
            info.color_type,
            info.bit_depth,
            if interlaced { ", interlaced" } else { "" }
        );

        let target = match self.output {
            RequestedFormat::Source => None,
            RequestedFormat::Exact(format) => Some(format),
        };
        let mut header = FrameHeader::new(width, height, target.unwrap_or(native))?;
        header.source = SourceImage {
            pixel_format: stored_format(info.color_type, info.bit_depth),
            compression: Compression::Deflate,
            orientation: Orientation::TopDown,
            interlaced,
        };
        if self.io_options.contains(IoOptions::ICCP) {
            header.iccp = info.icc_profile.as_ref().map(|p| p.to_vec());
        }
        if self.io_options.contains(IoOptions::META_INFO) {
            header.meta = text_entries(info);
        }
        header.resolution = info
            .pixel_dims
            .as_ref()
            .filter(|d| d.unit == png::Unit::Meter)
            .map(|d| Resolution {
                x_ppm: d.xppu,
                y_ppm: d.yppu,
            });

        self.frame = Some(DecodeFrame {
            reader,
            feed,
            width,
            height,
            native,
            target,
            interlaced,
            buffered: None,
            native_row: vec![0; native.bytes_in_row(width)?],
        });
        self.done = true;
        Ok(header)
    }

    fn read_row(&mut self, io: &mut dyn ReadIo, row: &mut [u8]) -> Result<(), CodecError> {
        let frame = self.frame.as_mut().ok_or(CodecError::InvalidState {
            operation: "read_row",
            state: "no-frame",
        })?;
        let sixteen = frame.native.is_16_bit_channels();

        if frame.interlaced {
            if frame.buffered.is_none() {
                self.limits
                    .check_memory(frame.reader.output_buffer_size() as u64)?;
                let mut image = vec![0; frame.reader.output_buffer_size()];
                let info = loop {
                    match frame.reader.next_frame(&mut image) {
                        Ok(info) => break info,
                        Err(e) if starved(&e) => {
                            if !frame.feed.refill(io)? {
                                return Err(decoding_error(e));
                            }
                        }
                        Err(e) => return Err(decoding_error(e)),
                    }
                };
                image.truncate(info.line_size * frame.height as usize);
                frame.buffered = Some((image, 0));
            }
            let line_size = frame.native_row.len();
            let Some((image, next)) = frame.buffered.as_mut() else {
                return Err(CodecError::InvalidState {
                    operation: "read_row",
                    state: "no-frame",
                });
            };
            let start = *next * line_size;
            let src = image.get(start..start + line_size).ok_or_else(|| {
                CodecError::BrokenImage(format!("png frame ended before row {next}"))
            })?;
            to_native(src, sixteen, &mut frame.native_row);
            *next += 1;
        } else {
            loop {
                match frame.reader.next_row() {
                    Ok(Some(src)) => {
                        to_native(src.data(), sixteen, &mut frame.native_row);
                        break;
                    }
                    Ok(None) => {
                        return Err(CodecError::BrokenImage("png image data ended early".into()));
                    }
                    Err(e) if starved(&e) => {
                        if !frame.feed.refill(io)? {
                            return Err(decoding_error(e));
                        }
                    }
                    Err(e) => return Err(decoding_error(e)),
                }
            }
        }

        match frame.target {
            None => {
                row[..frame.native_row.len()].copy_from_slice(&frame.native_row);
                Ok(())
            }
            Some(target) => convert_row(
                &frame.native_row,
                frame.native,
                None,
                row,
                target,
                frame.width,
                &self.conversion,
            ),
        }
    }

    fn frame_count(&self) -> Option<u32> {
        // animation frames are not decoded, only the default image
        Some(1)
    }

    fn finish(&mut self, _io: &mut dyn ReadIo) -> Result<(), CodecError> {
        self.frame = None;
        Ok(())
    }
}

struct PngEncoder {
    compression: png::Compression,
    filter: Option<png::FilterType>,
    adaptive: bool,
    want_meta: bool,
    frame: Option<EncodeFrame>,
}

struct EncodeFrame {
    header: FrameHeader,
    data: Vec<u8>,
    rows: u32,
}

impl PngEncoder {
    fn new(options: &WriteOptions) -> Result<Self, CodecError> {
        let compression = match options.compression_level {
            Some(level) if level <= 3.0 => png::Compression::Fast,
            Some(level) if level >= 8.0 => png::Compression::Best,
            _ => png::Compression::Default,
        };
        let (filter, adaptive) = match options.tuning.get(FILTER_TUNING).and_then(|v| v.as_str()) {
            None => (None, false),
            Some("none") => (Some(png::FilterType::NoFilter), false),
            Some("sub") => (Some(png::FilterType::Sub), false),
            Some("up") => (Some(png::FilterType::Up), false),
            Some("avg") => (Some(png::FilterType::Avg), false),
            Some("paeth") => (Some(png::FilterType::Paeth), false),
            Some("adaptive") => (None, true),
            Some(other) => {
                return Err(CodecError::InvalidInput(format!(
                    "unknown {FILTER_TUNING} value '{other}'"
                )));
            }
        };
        Ok(Self {
            compression,
            filter,
            adaptive,
            want_meta: options.io_options.contains(IoOptions::META_INFO),
            frame: None,
        })
    }

    fn write_png(&self, io: &mut dyn WriteIo, frame: &EncodeFrame) -> Result<(), CodecError> {
        let header = &frame.header;
        let (color, depth) = match header.pixel_format {
            PixelFormat::Bpp8Grayscale => (png::ColorType::Grayscale, png::BitDepth::Eight),
            PixelFormat::Bpp16Grayscale => (png::ColorType::Grayscale, png::BitDepth::Sixteen),
            PixelFormat::Bpp16GrayscaleAlpha => (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight),
            PixelFormat::Bpp32GrayscaleAlpha => {
                (png::ColorType::GrayscaleAlpha, png::BitDepth::Sixteen)
            }
            PixelFormat::Bpp24Rgb => (png::ColorType::Rgb, png::BitDepth::Eight),
            PixelFormat::Bpp48Rgb => (png::ColorType::Rgb, png::BitDepth::Sixteen),
            PixelFormat::Bpp32Rgba => (png::ColorType::Rgba, png::BitDepth::Eight),
            PixelFormat::Bpp64Rgba => (png::ColorType::Rgba, png::BitDepth::Sixteen),
            other => return Err(CodecError::UnsupportedPixelFormat(other)),
        };

        let mut encoder = png::Encoder::new(&mut *io, header.width, header.height);
        encoder.set_color(color);
        encoder.set_depth(depth);
        encoder.set_compression(self.compression);
        if let Some(filter) = self.filter {
            encoder.set_filter(filter);
        }
        if self.adaptive {
            encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);
        }
        if self.want_meta {
            for entry in &header.meta {
                encoder
                    .add_text_chunk(entry.key.clone(), entry.value.clone())
                    .map_err(encoding_error)?;
            }
        }

        let mut writer = encoder.write_header().map_err(encoding_error)?;
        writer.write_image_data(&frame.data).map_err(encoding_error)?;
        writer.finish().map_err(encoding_error)
    }
}

impl FrameEncoder for PngEncoder {
    fn begin_frame(&mut self, _io: &mut dyn WriteIo, header: &FrameHeader) -> Result<u32, CodecError> {
        if self.frame.is_some() {
            return Err(CodecError::UnsupportedOperation {
                codec: String::from(NAME),
                detail: "multiple frames",
            });
        }
        let len = header
            .bytes_in_row()?
            .checked_mul(header.height as usize)
            .ok_or(CodecError::MemoryAllocation)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| CodecError::MemoryAllocation)?;
        self.frame = Some(EncodeFrame {
            header: header.clone(),
            data,
            rows: 0,
        });
        Ok(1)
    }

    fn write_row(&mut self, io: &mut dyn WriteIo, row: &[u8]) -> Result<(), CodecError> {
        let Some(frame) = self.frame.as_mut() else {
            return Err(CodecError::InvalidState {
                operation: "write_row",
                state: "no-frame",
            });
        };
        if frame.header.pixel_format.is_16_bit_channels() {
            for sample in row.chunks_exact(2) {
                let value = u16::from_ne_bytes([sample[0], sample[1]]);
                frame.data.extend_from_slice(&value.to_be_bytes());
            }
        } else {
            frame.data.extend_from_slice(row);
        }
        frame.rows += 1;

        if frame.rows == frame.header.height {
            if let Some(frame) = self.frame.as_ref() {
                self.write_png(io, frame)?;
            }
            // keep the header so a second frame is refused
            if let Some(frame) = self.frame.as_mut() {
                frame.data = Vec::new();
            }
        }
        Ok(())
    }

    fn finish(&mut self, _io: &mut dyn WriteIo) -> Result<(), CodecError> {
        Ok(())
    }
}
