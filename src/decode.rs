//! One-shot decode API.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::io::Cursor;
use std::path::Path;

use crate::convert::ConversionOptions;
use crate::image::Image;
use crate::options::{IoOptions, ReadOptions};
use crate::pixel::RequestedFormat;
use crate::registry::{self, Registry};
use crate::session::DecodeSession;
use crate::{CodecError, Limits};

/// Decode request builder.
///
/// Detects the codec from the data unless one is named, runs a session to
/// completion, and finishes it.
///
/// # Example
///
/// ```no_run
/// use zenstream::{DecodeRequest, PixelFormat};
///
/// let data: &[u8] = &[]; // your image bytes
/// let image = DecodeRequest::new(data)
///     .with_output(PixelFormat::Bpp24Rgb)
///     .decode()?;
/// println!("{}x{}", image.width(), image.height());
/// # Ok::<(), zenstream::CodecError>(())
/// ```
pub struct DecodeRequest<'a> {
    data: &'a [u8],
    codec: Option<&'a str>,
    options: ReadOptions,
    registry: Option<&'a Registry>,
}

impl<'a> DecodeRequest<'a> {
    /// Decode `data` with default options: source format, no limits.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            codec: None,
            options: ReadOptions::default(),
            registry: None,
        }
    }

    /// Use a codec by name instead of signature detection.
    pub fn with_codec(mut self, name: &'a str) -> Self {
        self.codec = Some(name);
        self
    }

    /// Set the output pixel format.
    pub fn with_output(mut self, output: impl Into<RequestedFormat>) -> Self {
        self.options.output = output.into();
        self
    }

    /// Set resource limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.options.limits = limits;
        self
    }

    /// Set alpha handling for format conversion.
    pub fn with_conversion(mut self, conversion: ConversionOptions) -> Self {
        self.options.conversion = conversion;
        self
    }

    pub fn with_io_options(mut self, io_options: IoOptions) -> Self {
        self.options.io_options = io_options;
        self
    }

    /// Replace every session option at once.
    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    /// Decode through `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: &'a Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Decode the first frame.
    pub fn decode(self) -> Result<Image, CodecError> {
        self.run(|session| session.next_image())
    }

    /// Decode every frame.
    pub fn decode_all(self) -> Result<Vec<Image>, CodecError> {
        self.run(|session| session.read_all())
    }

    fn run<T>(
        self,
        body: impl FnOnce(&mut DecodeSession<'a>) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let global: Arc<Registry>;
        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                global = registry::global()?;
                &*global
            }
        };

        let io = Cursor::new(self.data);
        let mut session = match self.codec {
            Some(name) => {
                let codec = registry.find_by_name(name)?;
                registry.start_decode_with(&codec, io, self.options)?
            }
            None => registry.start_decode(io, self.options)?,
        };
        let result = body(&mut session);
        let finished = session.finish();
        let value = result?;
        finished?;
        Ok(value)
    }
}

/// Read and decode the first frame of a file.
pub fn decode_path(path: impl AsRef<Path>, options: ReadOptions) -> Result<Image, CodecError> {
    let data = std::fs::read(path)?;
    DecodeRequest::new(&data).with_options(options).decode()
}

#[cfg(all(test, feature = "bmp"))]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::pixel::PixelFormat;

    // 2x1 24-bit bottom-up BMP: blue, red
    fn tiny_bmp() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&62u32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&54u32.to_le_bytes());
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&[0; 24]);
        data.extend_from_slice(&[255, 0, 0, 0, 0, 255, 0, 0]);
        data
    }

    #[test]
    fn decodes_with_explicit_registry() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let data = tiny_bmp();
        let image = DecodeRequest::new(&data)
            .with_registry(&registry)
            .with_output(PixelFormat::Bpp24Rgb)
            .decode()
            .unwrap();
        assert_eq!(image.width(), 2);
        assert_eq!(image.row(0).unwrap(), &[0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn named_codec_skips_detection() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let data = tiny_bmp();
        let images = DecodeRequest::new(&data)
            .with_registry(&registry)
            .with_codec("bmp")
            .decode_all()
            .unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn unknown_data_has_no_codec() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let err = DecodeRequest::new(b"definitely not an image")
            .with_registry(&registry)
            .decode()
            .unwrap_err();
        assert!(matches!(err, CodecError::NoMatchingCodec));
    }

    #[test]
    fn limits_reject_wide_images() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let data = tiny_bmp();
        let limits = Limits {
            max_width: Some(1),
            ..Limits::default()
        };
        let err = DecodeRequest::new(&data)
            .with_registry(&registry)
            .with_limits(limits)
            .decode()
            .unwrap_err();
        assert!(matches!(err, CodecError::LimitExceeded(_)));
    }
}
