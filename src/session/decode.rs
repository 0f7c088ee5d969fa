use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{Cursor, SessionState};
use crate::codec::{CodecBackend, FrameDecoder, guarded};
use crate::descriptor::CodecDescriptor;
use crate::image::{FrameHeader, Image, Orientation};
use crate::io::ReadIo;
use crate::options::{CodecFeatures, IoOptions, ReadOptions};
use crate::pixel::RequestedFormat;
use crate::CodecError;

/// One decode operation over one stream.
///
/// Rows come out top to bottom whatever the stored order. The session keeps
/// its backend alive, so it stays valid after the registry unloads.
///
/// # Example
///
/// ```no_run
/// use zenstream::{ReadOptions, Registry, RegistryConfig};
///
/// let registry = Registry::new(RegistryConfig::combined())?;
/// let mut session = registry.open_path("image.bmp", ReadOptions::default())?;
/// let stride = session.next_frame()?.stride;
/// session.next_pass()?;
/// let mut row = vec![0u8; stride];
/// session.read_scanline(&mut row)?;
/// session.finish()?;
/// # Ok::<(), zenstream::CodecError>(())
/// ```
pub struct DecodeSession<'io> {
    codec: Arc<CodecDescriptor>,
    _backend: Arc<dyn CodecBackend>,
    decoder: Option<Box<dyn FrameDecoder>>,
    io: Box<dyn ReadIo + 'io>,
    options: ReadOptions,
    state: SessionState,
    header: Option<FrameHeader>,
    cursor: Cursor,
    // whole frame, physical order, for bottom-up sources
    remap: Option<Vec<u8>>,
    exhausted: bool,
    frames_read: u32,
}

impl<'io> DecodeSession<'io> {
    /// Bind `backend` to `io`, negotiating the output format.
    pub fn start(
        codec: Arc<CodecDescriptor>,
        backend: Arc<dyn CodecBackend>,
        io: impl ReadIo + 'io,
        options: ReadOptions,
    ) -> Result<Self, CodecError> {
        let features = &codec.read_features;
        if !features.supports_output(options.output) {
            if let RequestedFormat::Exact(format) = options.output {
                return Err(CodecError::UnsupportedPixelFormat(format));
            }
        }
        if options.io_options.contains(IoOptions::INTERLACED)
            && !features.features.contains(CodecFeatures::INTERLACED)
        {
            log::debug!("{}: interlaced delivery not supported, ignoring", codec.name);
        }
        options.tuning.warn_unknown(&codec.name, &features.tuning);

        let mut io: Box<dyn ReadIo + 'io> = Box::new(io);
        let decoder = guarded(&codec.name, || backend.start_decode(&mut *io, &options))?;
        log::debug!("{}: decode session started, output {:?}", codec.name, options.output);

        Ok(Self {
            codec,
            _backend: backend,
            decoder: Some(decoder),
            io,
            options,
            state: SessionState::Init,
            header: None,
            cursor: Cursor::default(),
            remap: None,
            exhausted: false,
            frames_read: 0,
        })
    }

    pub fn codec(&self) -> &Arc<CodecDescriptor> {
        &self.codec
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Header of the current frame.
    pub fn header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    /// Frame count, when the backend knows it cheaply.
    pub fn frame_count(&self) -> Option<u32> {
        self.decoder.as_ref().and_then(|d| d.frame_count())
    }

    pub fn frames_read(&self) -> u32 {
        self.frames_read
    }

    fn fail<T>(&mut self, error: CodecError) -> Result<T, CodecError> {
        log::debug!("{}: decode session failed: {error}", self.codec.name);
        self.state = SessionState::Error;
        self.remap = None;
        Err(error)
    }

    /// Advance to the next frame and return its header.
    ///
    /// Returns [`CodecError::NoMoreFrames`] once every frame was read; the
    /// session stays usable for `finish()`.
    pub fn next_frame(&mut self) -> Result<&FrameHeader, CodecError> {
        self.state
            .require("next_frame", &[SessionState::Init, SessionState::FrameDone])?;
        if self.exhausted {
            return Err(CodecError::NoMoreFrames);
        }

        let name = self.codec.name.clone();
        let decoder = bound(&mut self.decoder, "next_frame", self.state)?;
        let io = &mut self.io;
        let result = guarded(&name, || decoder.next_frame(&mut **io));
        let header = match result {
            Ok(header) => header,
            Err(CodecError::NoMoreFrames) => {
                self.exhausted = true;
                self.header = None;
                return Err(CodecError::NoMoreFrames);
            }
            Err(e) => return self.fail(e),
        };
        if let Err(e) = self.validate(&header) {
            return self.fail(e);
        }

        log::debug!(
            "{name}: frame {} is {}x{} {:?}, {} pass(es)",
            self.frames_read,
            header.width,
            header.height,
            header.pixel_format,
            header.passes
        );
        self.frames_read += 1;
        self.cursor = Cursor::new(header.passes, header.height);
        self.remap = None;
        self.state = SessionState::FrameReady;
        Ok(self.header.insert(header))
    }

    fn validate(&self, header: &FrameHeader) -> Result<(), CodecError> {
        let limits = &self.options.limits;
        limits.check_dimensions(header.width as u64, header.height as u64)?;
        if header.width == 0 || header.height == 0 {
            return Err(CodecError::BrokenImage(alloc::format!(
                "zero image dimension {}x{}",
                header.width,
                header.height
            )));
        }
        if header.stride != header.pixel_format.stride(header.width)? {
            return Err(CodecError::InvalidInput(alloc::format!(
                "{} reported stride {} for {} pixels of {:?}",
                self.codec.name,
                header.stride,
                header.width,
                header.pixel_format
            )));
        }
        if let RequestedFormat::Exact(format) = self.options.output {
            if header.pixel_format != format {
                return Err(CodecError::UnsupportedPixelFormat(format));
            }
        }
        if header.source.orientation == Orientation::BottomUp {
            limits.check_memory(header.buffer_len()? as u64)?;
        }
        Ok(())
    }

    /// Start the next pass of the current frame.
    pub fn next_pass(&mut self) -> Result<(), CodecError> {
        self.state.require("next_pass", &[SessionState::FrameReady])?;
        if !self.cursor.has_pass() {
            return Err(CodecError::InvalidState {
                operation: "next_pass",
                state: self.state.name(),
            });
        }
        let name = self.codec.name.clone();
        let decoder = bound(&mut self.decoder, "next_pass", self.state)?;
        let io = &mut self.io;
        if let Err(e) = guarded(&name, || decoder.next_pass(&mut **io)) {
            return self.fail(e);
        }
        self.cursor.start_pass();
        self.remap = None;
        self.state = SessionState::PassReady;
        Ok(())
    }

    /// Fill the first `stride` bytes of `buf` with the next logical row.
    pub fn read_scanline(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        self.state.require(
            "read_scanline",
            &[SessionState::PassReady, SessionState::ScanlineStreaming],
        )?;
        let Some(header) = self.header.as_ref() else {
            return self.fail(CodecError::InvalidState {
                operation: "read_scanline",
                state: "no-frame",
            });
        };
        let (stride, height, bottom_up) = (
            header.stride,
            header.height,
            header.source.orientation == Orientation::BottomUp,
        );
        let row_len = header.bytes_in_row()?;
        if buf.len() < stride {
            return Err(CodecError::InvalidInput(alloc::format!(
                "scanline buffer is {} bytes, stride is {stride}",
                buf.len()
            )));
        }
        let row = &mut buf[..stride];

        if bottom_up {
            if self.remap.is_none() {
                match self.read_physical_frame(stride, height) {
                    Ok(frame) => self.remap = Some(frame),
                    Err(e) => return self.fail(e),
                }
            }
            let physical = (height - 1 - self.cursor.row) as usize;
            if let Some(frame) = self.remap.as_ref() {
                row.copy_from_slice(&frame[physical * stride..(physical + 1) * stride]);
            }
        } else {
            let name = self.codec.name.clone();
            let decoder = bound(&mut self.decoder, "read_scanline", self.state)?;
            let io = &mut self.io;
            if let Err(e) = guarded(&name, || decoder.read_row(&mut **io, &mut *row)) {
                return self.fail(e);
            }
        }
        row[row_len..].fill(0);

        self.state = self.cursor.advance();
        if self.state != SessionState::ScanlineStreaming {
            self.remap = None;
        }
        Ok(())
    }

    fn read_physical_frame(&mut self, stride: usize, height: u32) -> Result<Vec<u8>, CodecError> {
        let len = stride
            .checked_mul(height as usize)
            .ok_or(CodecError::MemoryAllocation)?;
        let mut frame = Vec::new();
        frame
            .try_reserve_exact(len)
            .map_err(|_| CodecError::MemoryAllocation)?;
        frame.resize(len, 0);

        let name = self.codec.name.clone();
        let decoder = bound(&mut self.decoder, "read_scanline", self.state)?;
        let io = &mut self.io;
        for row in frame.chunks_exact_mut(stride) {
            guarded(&name, || decoder.read_row(&mut **io, row))?;
        }
        Ok(frame)
    }

    /// Read every pass of the current frame into a new image.
    ///
    /// Must be called right after [`next_frame`](Self::next_frame).
    pub fn read_frame(&mut self) -> Result<Image, CodecError> {
        self.state.require("read_frame", &[SessionState::FrameReady])?;
        let header = match self.header.clone() {
            Some(header) => header,
            None => {
                return Err(CodecError::InvalidState {
                    operation: "read_frame",
                    state: self.state.name(),
                });
            }
        };
        self.options
            .limits
            .check_memory(header.buffer_len()? as u64)?;
        let mut image = Image::new(header)?;
        let stride = image.header.stride;
        while self.state == SessionState::FrameReady {
            self.next_pass()?;
            for row in image.pixels.chunks_exact_mut(stride) {
                self.read_scanline(row)?;
            }
        }
        Ok(image)
    }

    /// Advance to the next frame and read it whole.
    pub fn next_image(&mut self) -> Result<Image, CodecError> {
        self.next_frame()?;
        self.read_frame()
    }

    /// Read every remaining frame.
    pub fn read_all(&mut self) -> Result<Vec<Image>, CodecError> {
        let mut images = Vec::new();
        loop {
            match self.next_image() {
                Ok(image) => images.push(image),
                Err(e) if e.is_no_more_frames() => return Ok(images),
                Err(e) => return Err(e),
            }
        }
    }

    /// Release backend state. Idempotent; later data operations fail with
    /// [`CodecError::InvalidState`].
    pub fn finish(&mut self) -> Result<(), CodecError> {
        if self.state == SessionState::Finished {
            return Ok(());
        }
        let result = match self.decoder.take() {
            Some(mut decoder) => {
                let io = &mut self.io;
                guarded(&self.codec.name, || decoder.finish(&mut **io))
            }
            None => Ok(()),
        };
        self.remap = None;
        self.header = None;
        self.state = SessionState::Finished;
        log::debug!("{}: decode session finished", self.codec.name);
        result
    }

    /// Same as [`finish`](Self::finish).
    pub fn stop(&mut self) -> Result<(), CodecError> {
        self.finish()
    }
}

fn bound<'a>(
    decoder: &'a mut Option<Box<dyn FrameDecoder>>,
    operation: &'static str,
    state: SessionState,
) -> Result<&'a mut Box<dyn FrameDecoder>, CodecError> {
    decoder.as_mut().ok_or(CodecError::InvalidState {
        operation,
        state: state.name(),
    })
}

impl Drop for DecodeSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::debug!("{}: error while dropping decode session: {e}", self.codec.name);
        }
    }
}

impl core::fmt::Debug for DecodeSession<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodeSession")
            .field("codec", &self.codec.name)
            .field("state", &self.state)
            .field("frames_read", &self.frames_read)
            .finish_non_exhaustive()
    }
}
