use alloc::boxed::Box;
use alloc::sync::Arc;
use std::io::Write as _;

use super::{Cursor, SessionState};
use crate::codec::{CodecBackend, FrameEncoder, guarded};
use crate::descriptor::CodecDescriptor;
use crate::image::{FrameHeader, Image};
use crate::io::WriteIo;
use crate::options::{CodecFeatures, WriteFeatures, WriteOptions};
use crate::CodecError;

/// One encode operation over one stream.
///
/// Mirrors [`DecodeSession`](crate::DecodeSession): start a frame with its
/// header, start each pass, write rows top to bottom, then `finish()`.
pub struct EncodeSession<'io> {
    codec: Arc<CodecDescriptor>,
    _backend: Arc<dyn CodecBackend>,
    encoder: Option<Box<dyn FrameEncoder>>,
    io: Box<dyn WriteIo + 'io>,
    options: WriteOptions,
    state: SessionState,
    header: Option<FrameHeader>,
    row_len: usize,
    cursor: Cursor,
    frames_written: u32,
}

impl<'io> EncodeSession<'io> {
    /// Bind `backend` to `io` after checking `options` against the codec's
    /// write features.
    pub fn start(
        codec: Arc<CodecDescriptor>,
        backend: Arc<dyn CodecBackend>,
        io: impl WriteIo + 'io,
        options: WriteOptions,
    ) -> Result<Self, CodecError> {
        codec.negotiate_write(&options)?;

        let mut io: Box<dyn WriteIo + 'io> = Box::new(io);
        let encoder = guarded(&codec.name, || backend.start_encode(&mut *io, &options))?;
        log::debug!(
            "{}: encode session started, {:?} level {:?}",
            codec.name,
            options.compression,
            options.compression_level
        );

        Ok(Self {
            codec,
            _backend: backend,
            encoder: Some(encoder),
            io,
            options,
            state: SessionState::Init,
            header: None,
            row_len: 0,
            cursor: Cursor::default(),
            frames_written: 0,
        })
    }

    pub fn codec(&self) -> &Arc<CodecDescriptor> {
        &self.codec
    }

    /// What the codec accepts: input formats, compressions, level range,
    /// tuning keys.
    pub fn features(&self) -> &WriteFeatures {
        &self.codec.write_features
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    fn fail<T>(&mut self, error: CodecError) -> Result<T, CodecError> {
        log::debug!("{}: encode session failed: {error}", self.codec.name);
        self.state = SessionState::Error;
        Err(error)
    }

    fn check_header(&self, header: &FrameHeader) -> Result<(), CodecError> {
        let features = &self.codec.write_features;
        if !features.input_formats.contains(&header.pixel_format) {
            return Err(CodecError::UnsupportedPixelFormat(header.pixel_format));
        }
        if header.width == 0 || header.height == 0 {
            return Err(CodecError::InvalidInput(alloc::format!(
                "zero image dimension {}x{}",
                header.width,
                header.height
            )));
        }
        if header.stride != header.pixel_format.stride(header.width)? {
            return Err(CodecError::InvalidInput(alloc::format!(
                "stride {} does not match {} pixels of {:?}",
                header.stride,
                header.width,
                header.pixel_format
            )));
        }
        if header.pixel_format.is_indexed() && header.palette.as_ref().is_none_or(|p| p.is_empty()) {
            return Err(CodecError::MissingPalette);
        }
        if self.frames_written > 0 && !features.features.contains(CodecFeatures::MULTI_FRAME) {
            return Err(CodecError::UnsupportedOperation {
                codec: self.codec.name.clone(),
                detail: "multiple frames",
            });
        }
        Ok(())
    }

    /// Start a frame described by `header`.
    pub fn next_frame(&mut self, header: FrameHeader) -> Result<(), CodecError> {
        self.state
            .require("next_frame", &[SessionState::Init, SessionState::FrameDone])?;
        // caller mistakes leave the session usable
        self.check_header(&header)?;

        let name = self.codec.name.clone();
        let encoder = bound(&mut self.encoder, "next_frame", self.state)?;
        let io = &mut self.io;
        let passes = match guarded(&name, || encoder.begin_frame(&mut **io, &header)) {
            Ok(passes) => passes,
            Err(e) => return self.fail(e),
        };
        log::debug!(
            "{name}: writing frame {} ({}x{} {:?}, {passes} pass(es))",
            self.frames_written,
            header.width,
            header.height,
            header.pixel_format
        );
        self.row_len = header.bytes_in_row()?;
        self.cursor = Cursor::new(passes, header.height);
        self.header = Some(header);
        self.state = SessionState::FrameReady;
        Ok(())
    }

    /// Start the next pass of the current frame.
    pub fn next_pass(&mut self) -> Result<(), CodecError> {
        self.state.require("next_pass", &[SessionState::FrameReady])?;
        let name = self.codec.name.clone();
        let encoder = bound(&mut self.encoder, "next_pass", self.state)?;
        let io = &mut self.io;
        if let Err(e) = guarded(&name, || encoder.begin_pass(&mut **io)) {
            return self.fail(e);
        }
        self.cursor.start_pass();
        self.state = SessionState::PassReady;
        Ok(())
    }

    /// Write the next row. `row` holds at least the unpadded row bytes;
    /// padding past them is ignored.
    pub fn write_scanline(&mut self, row: &[u8]) -> Result<(), CodecError> {
        self.state.require(
            "write_scanline",
            &[SessionState::PassReady, SessionState::ScanlineStreaming],
        )?;
        if row.len() < self.row_len {
            return Err(CodecError::InvalidInput(alloc::format!(
                "scanline is {} bytes, row needs {}",
                row.len(),
                self.row_len
            )));
        }
        let row = &row[..self.row_len];
        let name = self.codec.name.clone();
        let encoder = bound(&mut self.encoder, "write_scanline", self.state)?;
        let io = &mut self.io;
        if let Err(e) = guarded(&name, || encoder.write_row(&mut **io, row)) {
            return self.fail(e);
        }
        self.state = self.cursor.advance();
        if self.state == SessionState::FrameDone {
            self.frames_written += 1;
        }
        Ok(())
    }

    /// Write a whole image as the next frame.
    pub fn write_image(&mut self, image: &Image) -> Result<(), CodecError> {
        self.next_frame(image.header.clone())?;
        let stride = image.header.stride;
        while self.state == SessionState::FrameReady {
            self.next_pass()?;
            for row in image.pixels.chunks_exact(stride) {
                self.write_scanline(row)?;
            }
        }
        Ok(())
    }

    /// Flush and release backend state. Idempotent.
    ///
    /// After a failure the backend is dropped without flushing. Finishing in
    /// the middle of a frame releases everything and reports
    /// [`CodecError::InvalidState`].
    pub fn finish(&mut self) -> Result<(), CodecError> {
        let state = self.state;
        if state == SessionState::Finished {
            return Ok(());
        }
        let encoder = self.encoder.take();
        self.header = None;
        self.state = SessionState::Finished;

        let result = match (state, encoder) {
            (SessionState::Init | SessionState::FrameDone, Some(mut encoder)) => {
                let io = &mut self.io;
                guarded(&self.codec.name, || encoder.finish(&mut **io))
                    .and_then(|()| self.io.flush().map_err(CodecError::from))
            }
            (SessionState::Error, _) | (_, None) => Ok(()),
            (state, Some(_)) => Err(CodecError::InvalidState {
                operation: "finish",
                state: state.name(),
            }),
        };
        log::debug!("{}: encode session finished", self.codec.name);
        result
    }

    /// Same as [`finish`](Self::finish).
    pub fn stop(&mut self) -> Result<(), CodecError> {
        self.finish()
    }
}

fn bound<'a>(
    encoder: &'a mut Option<Box<dyn FrameEncoder>>,
    operation: &'static str,
    state: SessionState,
) -> Result<&'a mut Box<dyn FrameEncoder>, CodecError> {
    encoder.as_mut().ok_or(CodecError::InvalidState {
        operation,
        state: state.name(),
    })
}

impl Drop for EncodeSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("{}: error while dropping encode session: {e}", self.codec.name);
        }
    }
}

impl core::fmt::Debug for EncodeSession<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("codec", &self.codec.name)
            .field("state", &self.state)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}
