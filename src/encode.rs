//! One-shot encode API.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use crate::descriptor::CodecDescriptor;
use crate::image::Image;
use crate::io::WriteIo;
use crate::options::{Compression, IoOptions, Tuning, Variant, WriteOptions};
use crate::registry::{self, Registry};
use crate::CodecError;

/// Encode request builder.
///
/// Options start from the codec's declared defaults; anything set on the
/// builder overrides them.
///
/// # Example
///
/// ```no_run
/// use zenstream::{DecodeRequest, EncodeRequest};
///
/// let data: &[u8] = &[]; // your image bytes
/// let image = DecodeRequest::new(data).decode()?;
/// let bmp = EncodeRequest::new("bmp").encode(&image)?;
/// # Ok::<(), zenstream::CodecError>(())
/// ```
pub struct EncodeRequest<'a> {
    codec: &'a str,
    io_options: Option<IoOptions>,
    compression: Option<Compression>,
    compression_level: Option<f64>,
    tuning: Tuning,
    registry: Option<&'a Registry>,
}

impl<'a> EncodeRequest<'a> {
    /// Encode with the codec registered under `codec`.
    pub fn new(codec: &'a str) -> Self {
        Self {
            codec,
            io_options: None,
            compression: None,
            compression_level: None,
            tuning: Tuning::new(),
            registry: None,
        }
    }

    pub fn with_io_options(mut self, io_options: IoOptions) -> Self {
        self.io_options = Some(io_options);
        self
    }

    /// Set the compression scheme.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Set the compression level, within the codec's declared range.
    pub fn with_compression_level(mut self, level: f64) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Set a codec-specific tuning value.
    pub fn with_tuning(mut self, key: &str, value: impl Into<Variant>) -> Self {
        self.tuning.set(key, value);
        self
    }

    /// Encode through `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: &'a Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Encode one image into memory.
    pub fn encode(&self, image: &Image) -> Result<Vec<u8>, CodecError> {
        self.encode_frames(core::slice::from_ref(image))
    }

    /// Encode a sequence of frames into memory.
    pub fn encode_frames(&self, images: &[Image]) -> Result<Vec<u8>, CodecError> {
        let mut out = Cursor::new(Vec::new());
        self.run(&mut out, images)?;
        Ok(out.into_inner())
    }

    /// Encode one image into a new file at `path`.
    pub fn write_path(&self, image: &Image, path: impl AsRef<Path>) -> Result<(), CodecError> {
        let mut file = BufWriter::new(std::fs::File::create(path)?);
        self.run(&mut file, core::slice::from_ref(image))
    }

    fn options(&self, codec: &CodecDescriptor) -> WriteOptions {
        let mut options = WriteOptions::from_features(&codec.write_features);
        if let Some(io_options) = self.io_options {
            options.io_options = io_options;
        }
        if let Some(compression) = self.compression {
            options.compression = compression;
        }
        if let Some(level) = self.compression_level {
            options.compression_level = Some(level);
        }
        for (key, value) in self.tuning.iter() {
            options.tuning.set(key, value.clone());
        }
        options
    }

    fn run(&self, io: &mut dyn WriteIo, images: &[Image]) -> Result<(), CodecError> {
        let global: Arc<Registry>;
        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                global = registry::global()?;
                &*global
            }
        };

        let codec = registry.find_by_name(self.codec)?;
        let options = self.options(&codec);
        let mut session = registry.start_encode(&codec, io, options)?;
        let result = images
            .iter()
            .try_for_each(|image| session.write_image(image));
        let finished = session.finish();
        result?;
        finished
    }
}

#[cfg(all(test, feature = "bmp"))]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::decode::DecodeRequest;
    use crate::image::FrameHeader;
    use crate::pixel::PixelFormat;

    fn gradient() -> Image {
        let header = FrameHeader::new(3, 2, PixelFormat::Bpp24Rgb).unwrap();
        let packed: Vec<u8> = (0..18).map(|i| i * 10).collect();
        Image::from_packed_rows(header, &packed).unwrap()
    }

    #[test]
    fn bmp_round_trip() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let image = gradient();
        let data = EncodeRequest::new("bmp")
            .with_registry(&registry)
            .encode(&image)
            .unwrap();
        assert_eq!(&data[..2], b"BM");

        let decoded = DecodeRequest::new(&data)
            .with_registry(&registry)
            .with_output(PixelFormat::Bpp24Rgb)
            .decode()
            .unwrap();
        assert_eq!(decoded.pixels, image.pixels);
    }

    #[test]
    fn unknown_codec() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let err = EncodeRequest::new("tga")
            .with_registry(&registry)
            .encode(&gradient())
            .unwrap_err();
        assert!(matches!(err, CodecError::CodecNotFound(_)));
    }

    #[test]
    fn rle_needs_indexed_input() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let err = EncodeRequest::new("bmp")
            .with_registry(&registry)
            .with_compression(Compression::Rle)
            .encode(&gradient())
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedCompression(_)));
    }

    #[test]
    fn writes_files() {
        let registry = Registry::new(RegistryConfig::combined()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bmp");
        EncodeRequest::new("bmp")
            .with_registry(&registry)
            .write_path(&gradient(), &path)
            .unwrap();
        let decoded = crate::decode::DecodeRequest::new(&std::fs::read(&path).unwrap())
            .with_registry(&registry)
            .decode()
            .unwrap();
        assert_eq!(decoded.height(), 2);
    }
}
