//! Codec descriptors: identity, signatures, and declared capabilities.
//!
//! A descriptor is built once during discovery and shared behind an `Arc`;
//! nothing mutates it afterwards.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::options::{ReadFeatures, WriteFeatures, WriteOptions};
use crate::CodecError;

/// Leading-byte pattern. `None` positions match any byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(Vec<Option<u8>>);

impl Signature {
    /// Every byte must match.
    pub fn exact(bytes: &[u8]) -> Self {
        Signature(bytes.iter().copied().map(Some).collect())
    }

    /// Parse space-separated hex bytes, `??` for a wildcard: `"42 4D"`.
    pub fn parse(pattern: &str) -> Result<Self, CodecError> {
        let bytes = pattern
            .split_whitespace()
            .map(|token| {
                if token == "??" {
                    Ok(None)
                } else {
                    u8::from_str_radix(token, 16).map(Some).map_err(|_| {
                        CodecError::InvalidInput(format!("bad signature byte '{token}'"))
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if bytes.is_empty() {
            return Err(CodecError::InvalidInput("empty signature".into()));
        }
        Ok(Signature(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `data` starts with this pattern.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.0.len()
            && self
                .0
                .iter()
                .zip(data)
                .all(|(expected, actual)| expected.is_none_or(|b| b == *actual))
    }
}

/// Immutable description of one codec.
#[derive(Clone, Debug, PartialEq)]
pub struct CodecDescriptor {
    pub name: String,
    pub version: u32,
    pub description: String,
    pub signatures: Vec<Signature>,
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
    pub mime_types: Vec<String>,
    pub read_features: ReadFeatures,
    pub write_features: WriteFeatures,
}

impl CodecDescriptor {
    /// Whether `data` starts with any of the signatures.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.signatures.iter().any(|s| s.matches(data))
    }

    /// Case-insensitive extension check; a leading dot is ignored.
    pub fn has_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn has_mime_type(&self, mime_type: &str) -> bool {
        self.mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
    }

    pub fn can_encode(&self) -> bool {
        self.write_features.is_supported()
    }

    /// Longest signature, in bytes.
    pub(crate) fn signature_len(&self) -> usize {
        self.signatures.iter().map(Signature::len).max().unwrap_or(0)
    }

    /// Check encode options against the declared write features.
    pub fn negotiate_write(&self, options: &WriteOptions) -> Result<(), CodecError> {
        let features = &self.write_features;
        if !features.is_supported() {
            return Err(CodecError::UnsupportedOperation {
                codec: self.name.clone(),
                detail: "encoding",
            });
        }
        if !features.compressions.contains(&options.compression) {
            return Err(CodecError::UnsupportedCompression(format!(
                "{:?} is not supported by {}",
                options.compression, self.name
            )));
        }
        if let Some(level) = options.compression_level {
            match features.compression_level {
                Some(range) if range.contains(level) => {}
                Some(range) => {
                    return Err(CodecError::UnsupportedCompression(format!(
                        "level {level} outside {}..={} for {}",
                        range.min, range.max, self.name
                    )));
                }
                None => {
                    return Err(CodecError::UnsupportedCompression(format!(
                        "{} takes no compression level",
                        self.name
                    )));
                }
            }
        }
        options
            .tuning
            .warn_unknown(&self.name, &features.tuning);
        Ok(())
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        let mut s = self.name.to_string();
        if !self.description.is_empty() {
            s.push_str(": ");
            s.push_str(&self.description);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{CodecFeatures, Compression, CompressionLevel};
    use crate::pixel::{PixelFormat, RequestedFormat};

    fn descriptor() -> CodecDescriptor {
        CodecDescriptor {
            name: "test".into(),
            version: 1,
            description: String::new(),
            signatures: alloc::vec![Signature::parse("42 ?? 4D").unwrap()],
            extensions: alloc::vec!["tst".into()],
            mime_types: alloc::vec!["image/x-test".into()],
            read_features: ReadFeatures {
                features: CodecFeatures::STATIC,
                output_formats: Vec::new(),
                preferred_output: RequestedFormat::Source,
                tuning: Vec::new(),
            },
            write_features: WriteFeatures {
                features: CodecFeatures::STATIC,
                input_formats: alloc::vec![PixelFormat::Bpp24Rgb],
                compressions: alloc::vec![Compression::None, Compression::Deflate],
                default_compression: Compression::None,
                compression_level: Some(CompressionLevel {
                    min: 1.0,
                    max: 9.0,
                    default: 6.0,
                    step: 1.0,
                }),
                tuning: Vec::new(),
            },
        }
    }

    #[test]
    fn wildcard_signatures() {
        let d = descriptor();
        assert!(d.matches(&[0x42, 0x00, 0x4D, 0x99]));
        assert!(d.matches(&[0x42, 0xFF, 0x4D]));
        assert!(!d.matches(&[0x42, 0xFF]));
        assert!(!d.matches(&[0x43, 0xFF, 0x4D]));
        assert_eq!(d.signature_len(), 3);
    }

    #[test]
    fn bad_signature_text() {
        assert!(Signature::parse("").is_err());
        assert!(Signature::parse("4G").is_err());
    }

    #[test]
    fn extension_and_mime_lookup() {
        let d = descriptor();
        assert!(d.has_extension(".TST"));
        assert!(d.has_mime_type("IMAGE/X-TEST"));
        assert!(!d.has_extension("png"));
    }

    #[test]
    fn write_negotiation() {
        let d = descriptor();
        let ok = WriteOptions::default().with_compression(Compression::Deflate);
        assert!(d.negotiate_write(&ok.clone().with_compression_level(9.0)).is_ok());
        assert!(matches!(
            d.negotiate_write(&ok.with_compression_level(12.0)),
            Err(CodecError::UnsupportedCompression(_))
        ));
        assert!(matches!(
            d.negotiate_write(&WriteOptions::default().with_compression(Compression::Rle)),
            Err(CodecError::UnsupportedCompression(_))
        ));
    }
}
