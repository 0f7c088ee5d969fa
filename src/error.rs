//! Unified error types for codec operations.

use alloc::boxed::Box;
use alloc::string::String;

use crate::pixel::PixelFormat;

/// Unified error type for registry, session, and backend operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Reading from or writing to the bound stream failed, including
    /// truncated input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Header or structural corruption.
    #[error("broken image: {0}")]
    BrokenImage(String),
    /// The stream is in a layout the backend cannot handle.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Compression type or level not supported.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),
    /// Bit depth not supported by the backend.
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),
    /// Pixel format not supported for this direction.
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedPixelFormat(PixelFormat),
    /// Codec doesn't support the requested operation.
    #[error("codec {codec} does not support: {detail}")]
    UnsupportedOperation {
        codec: String,
        detail: &'static str,
    },
    /// Indexed image without a palette.
    #[error("indexed image has no palette")]
    MissingPalette,
    /// Pixel references a palette entry past the end of the table.
    #[error("palette index {index} out of range (palette has {count} entries)")]
    PaletteIndexOutOfRange { index: usize, count: usize },
    /// All frames were consumed. Normal loop termination, not a fault.
    #[error("no more frames")]
    NoMoreFrames,
    /// Allocation failure or size overflow.
    #[error("memory allocation failed")]
    MemoryAllocation,
    /// API misuse, e.g. a data operation after `finish()`.
    #[error("operation {operation} is invalid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// Failure reported by a wrapped third-party library, or a panic caught
    /// at the backend-call boundary.
    #[error("backend error ({codec}): {source}")]
    Backend {
        codec: String,
        source: Box<dyn core::error::Error + Send + Sync>,
    },
    /// Leading bytes match no known signature.
    #[error("no codec matches the input")]
    NoMatchingCodec,
    /// Lookup by name, extension, or MIME type failed.
    #[error("codec not found: {0}")]
    CodecNotFound(String),
    /// Codec discovery failed.
    #[error("codec discovery failed: {0}")]
    Discovery(String),
    /// Resource limit exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// Input validation failed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CodecError {
    /// Wrap a backend-specific error.
    pub fn from_backend<E>(codec: &str, error: E) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        CodecError::Backend {
            codec: codec.into(),
            source: Box::new(error),
        }
    }

    /// Whether this is the frame-loop termination signal.
    pub fn is_no_more_frames(&self) -> bool {
        matches!(self, CodecError::NoMoreFrames)
    }

    /// Whether the stream ended before the structure it was reading.
    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Inner;

    impl core::fmt::Display for Inner {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str("inner failure")
        }
    }

    impl core::error::Error for Inner {}

    #[test]
    fn backend_error_keeps_source() {
        let err = CodecError::from_backend("png", Inner);
        assert_eq!(err.to_string(), "backend error (png): inner failure");
        assert!(core::error::Error::source(&err).is_some());
    }

    #[test]
    fn truncated_detection() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(CodecError::from(eof).is_truncated());
        assert!(!CodecError::NoMoreFrames.is_truncated());
        assert!(CodecError::NoMoreFrames.is_no_more_frames());
    }
}
