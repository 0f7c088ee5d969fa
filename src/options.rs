//! Codec features and session options.
//!
//! Features are what a backend declares once, at descriptor build time.
//! Options are what a caller asks for; a session copies them at start and
//! validates them against the features.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::convert::ConversionOptions;
use crate::pixel::{PixelFormat, RequestedFormat};
use crate::Limits;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self(1 << $bit);)*

            /// Raw bits.
            pub fn bits(self) -> u32 {
                self.0
            }

            /// Whether every flag in `other` is set.
            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

pub(crate) use flag_set;

flag_set! {
    /// Capabilities a backend declares for one direction.
    CodecFeatures {
        /// Single still frame.
        STATIC = 0,
        /// More than one frame per stream.
        MULTI_FRAME = 1,
        /// Progressive or interlaced passes.
        INTERLACED = 2,
        /// Text metadata.
        META_INFO = 3,
        /// ICC profile pass-through.
        ICCP = 4,
    }
}

flag_set! {
    /// Or-ed I/O behavior flags a caller requests.
    IoOptions {
        META_INFO = 0,
        INTERLACED = 1,
        ICCP = 2,
    }
}

impl IoOptions {
    /// Everything the features allow.
    pub fn from_features(features: CodecFeatures) -> Self {
        let mut options = IoOptions::NONE;
        if features.contains(CodecFeatures::META_INFO) {
            options.insert(IoOptions::META_INFO);
        }
        if features.contains(CodecFeatures::INTERLACED) {
            options.insert(IoOptions::INTERLACED);
        }
        if features.contains(CodecFeatures::ICCP) {
            options.insert(IoOptions::ICCP);
        }
        options
    }
}

/// Compression selector.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    None,
    /// Run-length encoding.
    Rle,
    /// Channel bit-field packing.
    BitFields,
    /// Zlib/deflate.
    Deflate,
}

/// Valid range of a numeric compression level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressionLevel {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
}

impl CompressionLevel {
    pub fn contains(&self, level: f64) -> bool {
        level >= self.min && level <= self.max
    }
}

/// Value of a tuning option.
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Variant {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            Variant::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            Variant::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::Str(v.to_string())
    }
}

/// Backend-specific string-keyed options, kept in insertion order.
///
/// Keys are prefixed with the codec name. There is no compatibility
/// guarantee for keys or values across codec versions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuning(Vec<(String, Variant)>);

impl Tuning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value. An existing key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Variant>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Warn about keys the codec does not declare.
    pub(crate) fn warn_unknown(&self, codec: &str, declared: &[&str]) {
        for (key, _) in self.iter() {
            if !declared.contains(&key) {
                log::warn!("{codec}: ignoring unknown tuning option '{key}'");
            }
        }
    }
}

/// Decode-direction features a backend declares.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadFeatures {
    pub features: CodecFeatures,
    /// Output formats the backend can produce besides its native one.
    pub output_formats: Vec<PixelFormat>,
    pub preferred_output: RequestedFormat,
    pub tuning: Vec<&'static str>,
}

impl ReadFeatures {
    /// Whether the requested output is producible.
    pub fn supports_output(&self, requested: RequestedFormat) -> bool {
        match requested {
            RequestedFormat::Source => true,
            RequestedFormat::Exact(format) => self.output_formats.contains(&format),
        }
    }
}

/// Encode-direction features a backend declares.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteFeatures {
    pub features: CodecFeatures,
    /// Pixel formats accepted as frame input.
    pub input_formats: Vec<PixelFormat>,
    pub compressions: Vec<Compression>,
    pub default_compression: Compression,
    /// Level range, when the backend takes a numeric level.
    pub compression_level: Option<CompressionLevel>,
    pub tuning: Vec<&'static str>,
}

impl WriteFeatures {
    /// No encoding support.
    pub fn unsupported() -> Self {
        Self {
            features: CodecFeatures::NONE,
            input_formats: Vec::new(),
            compressions: Vec::new(),
            default_compression: Compression::None,
            compression_level: None,
            tuning: Vec::new(),
        }
    }

    /// Whether the backend can encode at all.
    pub fn is_supported(&self) -> bool {
        !self.input_formats.is_empty()
    }
}

/// Options for one decode session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadOptions {
    pub output: RequestedFormat,
    pub io_options: IoOptions,
    pub conversion: ConversionOptions,
    pub limits: Limits,
    pub tuning: Tuning,
}

impl ReadOptions {
    /// Defaults derived from what the codec declares.
    pub fn from_features(features: &ReadFeatures) -> Self {
        Self {
            output: features.preferred_output,
            io_options: IoOptions::from_features(features.features),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<RequestedFormat>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_io_options(mut self, io_options: IoOptions) -> Self {
        self.io_options = io_options;
        self
    }

    pub fn with_conversion(mut self, conversion: ConversionOptions) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_tuning(mut self, key: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.tuning.set(key, value);
        self
    }
}

/// Options for one encode session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteOptions {
    pub io_options: IoOptions,
    pub compression: Compression,
    /// `None` selects the codec default.
    pub compression_level: Option<f64>,
    pub tuning: Tuning,
}

impl WriteOptions {
    /// Defaults derived from what the codec declares.
    pub fn from_features(features: &WriteFeatures) -> Self {
        Self {
            io_options: IoOptions::from_features(features.features),
            compression: features.default_compression,
            compression_level: features.compression_level.map(|l| l.default),
            tuning: Tuning::new(),
        }
    }

    pub fn with_io_options(mut self, io_options: IoOptions) -> Self {
        self.io_options = io_options;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_compression_level(mut self, level: f64) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn with_tuning(mut self, key: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.tuning.set(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_sets() {
        let mut flags = IoOptions::META_INFO | IoOptions::ICCP;
        assert!(flags.contains(IoOptions::ICCP));
        assert!(!flags.contains(IoOptions::INTERLACED));
        flags.remove(IoOptions::ICCP);
        assert_eq!(flags, IoOptions::META_INFO);
    }

    #[test]
    fn io_options_follow_features() {
        let features = CodecFeatures::STATIC | CodecFeatures::ICCP;
        assert_eq!(IoOptions::from_features(features), IoOptions::ICCP);
    }

    #[test]
    fn tuning_preserves_insertion_order() {
        let mut tuning = Tuning::new().with("b-key", 1i64).with("a-key", true);
        tuning.set("b-key", 2i64);
        let keys: Vec<&str> = tuning.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b-key", "a-key"]);
        assert_eq!(tuning.get("b-key").and_then(Variant::as_int), Some(2));
    }

    #[test]
    fn write_options_take_codec_defaults() {
        let features = WriteFeatures {
            features: CodecFeatures::STATIC,
            input_formats: alloc::vec![PixelFormat::Bpp24Rgb],
            compressions: alloc::vec![Compression::Deflate],
            default_compression: Compression::Deflate,
            compression_level: Some(CompressionLevel {
                min: 1.0,
                max: 9.0,
                default: 6.0,
                step: 1.0,
            }),
            tuning: Vec::new(),
        };
        let options = WriteOptions::from_features(&features);
        assert_eq!(options.compression, Compression::Deflate);
        assert_eq!(options.compression_level, Some(6.0));
    }
}
