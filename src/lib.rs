//! # zenstream
//!
//! Multi-format image codec runtime with a streaming, row-at-a-time API.
//!
//! A [`Registry`] knows which codecs exist (linked in, or discovered from
//! `*.codec.json` descriptor files), matches streams by signature, and hands
//! out [`DecodeSession`]s and [`EncodeSession`]s. Sessions move through an
//! explicit state machine: frame, pass, scanlines, finish.
//!
//! Backends are feature-gated:
//!
//! ```toml
//! [dependencies]
//! zenstream = { version = "0.1", default-features = false, features = ["bmp"] }
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use zenstream::{DecodeRequest, EncodeRequest, PixelFormat};
//!
//! let data: &[u8] = &[]; // your image bytes
//! let image = DecodeRequest::new(data)
//!     .with_output(PixelFormat::Bpp32Rgba)
//!     .decode()?;
//!
//! let png = EncodeRequest::new("png")
//!     .with_compression_level(9.0)
//!     .encode(&image)?;
//! # Ok::<(), zenstream::CodecError>(())
//! ```
//!
//! Row streaming:
//!
//! ```rust,no_run
//! use zenstream::{ReadOptions, Registry};
//!
//! let registry = Registry::with_defaults()?;
//! let mut session = registry.open_path("photo.bmp", ReadOptions::default())?;
//! let header = session.next_frame()?.clone();
//! session.next_pass()?;
//! let mut row = vec![0u8; header.stride];
//! for _ in 0..header.height {
//!     session.read_scanline(&mut row)?;
//! }
//! session.finish()?;
//! # Ok::<(), zenstream::CodecError>(())
//! ```

#![forbid(unsafe_code)]

extern crate alloc;

mod codec;
mod config;
mod convert;
mod descriptor;
mod discovery;
mod error;
mod image;
mod io;
mod limits;
mod options;
mod pixel;
mod probe;
mod session;

pub mod codecs;
pub mod registry;

mod decode;
mod encode;

pub use codec::{BackendFactory, BackendPanic, CodecBackend, FrameDecoder, FrameEncoder};
pub use config::{
    CODECS_PATH_ENV, DEFAULT_CODECS_DIR, DiscoveryMode, InitFlags, RegistryConfig,
    THIRD_PARTY_CODECS_PATH_ENV,
};
pub use convert::{
    CONVERSION_TARGETS, ConversionFlags, ConversionOptions, convert_image, convert_row, is_conversion_target,
};
pub use descriptor::{CodecDescriptor, Signature};
pub use discovery::{DESCRIPTOR_LAYOUT, DESCRIPTOR_SUFFIX};
pub use error::CodecError;
pub use image::{FrameHeader, Image, MetaEntry, Orientation, Resolution, SourceImage};
pub use io::{ReadIo, WriteIo};
pub use limits::Limits;
pub use options::{
    CodecFeatures, Compression, CompressionLevel, IoOptions, ReadFeatures, ReadOptions, Tuning,
    Variant, WriteFeatures, WriteOptions,
};
pub use pixel::{
    Palette, PixelFormat, RGB8, RGB16, RGBA8, RGBA16, ROW_ALIGNMENT, RequestedFormat,
};
pub use probe::{PROBE_PREFIX_LEN, ProbeResult};
pub use registry::Registry;
pub use session::{DecodeSession, EncodeSession, SessionState};

pub use decode::{DecodeRequest, decode_path};
pub use encode::EncodeRequest;
