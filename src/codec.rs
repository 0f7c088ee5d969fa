//! Backend contract.
//!
//! Every format backend, whether parsed in-crate or wrapping a third-party
//! library, implements [`CodecBackend`] and hands out per-session
//! [`FrameDecoder`]/[`FrameEncoder`] state. Sessions drive that state and
//! own the state machine; backends only do format I/O.
//!
//! Calls into backends go through [`guarded`], which turns a panic into
//! [`CodecError::Backend`] so it never unwinds through a session.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::descriptor::CodecDescriptor;
use crate::image::FrameHeader;
use crate::io::{ReadIo, WriteIo};
use crate::options::{ReadOptions, WriteOptions};
use crate::CodecError;

/// A loaded backend. One instance is shared by every session using it.
pub trait CodecBackend: Send + Sync {
    /// Bind per-session decode state. Options are already validated against
    /// the descriptor.
    fn start_decode(
        &self,
        io: &mut dyn ReadIo,
        options: &ReadOptions,
    ) -> Result<Box<dyn FrameDecoder>, CodecError>;

    /// Bind per-session encode state.
    fn start_encode(
        &self,
        io: &mut dyn WriteIo,
        options: &WriteOptions,
    ) -> Result<Box<dyn FrameEncoder>, CodecError> {
        let _ = (io, options);
        Err(CodecError::UnsupportedOperation {
            codec: String::from("backend"),
            detail: "encoding",
        })
    }
}

/// Per-session decode state.
///
/// Rows are produced in physical stream order; the session remaps
/// bottom-up frames.
pub trait FrameDecoder: Send {
    /// Header of the next frame, in the negotiated output format.
    /// Returns [`CodecError::NoMoreFrames`] once every frame was read.
    fn next_frame(&mut self, io: &mut dyn ReadIo) -> Result<FrameHeader, CodecError>;

    /// Prepare the next pass of the current frame.
    fn next_pass(&mut self, io: &mut dyn ReadIo) -> Result<(), CodecError> {
        let _ = io;
        Ok(())
    }

    /// Fill `row` (exactly `stride` bytes) with the next physical row.
    fn read_row(&mut self, io: &mut dyn ReadIo, row: &mut [u8]) -> Result<(), CodecError>;

    /// Frame count, if known without reading the frames.
    fn frame_count(&self) -> Option<u32> {
        None
    }

    /// Release buffers. Called once.
    fn finish(&mut self, io: &mut dyn ReadIo) -> Result<(), CodecError> {
        let _ = io;
        Ok(())
    }
}

/// Per-session encode state. Rows arrive top to bottom.
pub trait FrameEncoder: Send {
    /// Start a frame; returns how many passes the caller must write.
    fn begin_frame(&mut self, io: &mut dyn WriteIo, header: &FrameHeader) -> Result<u32, CodecError>;

    fn begin_pass(&mut self, io: &mut dyn WriteIo) -> Result<(), CodecError> {
        let _ = io;
        Ok(())
    }

    /// Accept one row of `bytes_in_row` bytes.
    fn write_row(&mut self, io: &mut dyn WriteIo, row: &[u8]) -> Result<(), CodecError>;

    /// Flush trailing data. Called once, after the last complete frame.
    fn finish(&mut self, io: &mut dyn WriteIo) -> Result<(), CodecError>;
}

/// How the registry builds a backend it has linked in.
#[derive(Clone, Copy)]
pub struct BackendFactory {
    /// Name referenced by descriptor files.
    pub name: &'static str,
    /// Built-in descriptor: capabilities plus default signatures.
    pub describe: fn() -> CodecDescriptor,
    pub load: fn() -> Result<Arc<dyn CodecBackend>, CodecError>,
}

impl core::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A panic caught at the backend boundary.
#[derive(Debug, thiserror::Error)]
#[error("backend panicked: {0}")]
pub struct BackendPanic(pub String);

/// Run one backend call, converting a panic into a returned error.
pub(crate) fn guarded<T>(
    codec: &str,
    call: impl FnOnce() -> Result<T, CodecError>,
) -> Result<T, CodecError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                String::from(*s)
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("non-string panic payload")
            };
            log::error!("{codec}: backend panicked: {message}");
            Err(CodecError::from_backend(codec, BackendPanic(message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_becomes_backend_error() {
        let result: Result<(), CodecError> = guarded("test", || panic!("boom"));
        match result {
            Err(CodecError::Backend { codec, source }) => {
                assert_eq!(codec, "test");
                assert_eq!(source.to_string(), "backend panicked: boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_pass_through() {
        let result: Result<(), CodecError> = guarded("test", || Err(CodecError::NoMoreFrames));
        assert!(matches!(result, Err(CodecError::NoMoreFrames)));
    }
}
