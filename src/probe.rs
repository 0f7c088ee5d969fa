//! Header probing.
//!
//! Probing matches leading bytes against descriptor signatures, then runs
//! the matched backend just far enough to read the first frame header. The
//! caller's stream position is restored afterwards, on success and failure.

use alloc::sync::Arc;
use std::io::{Seek, SeekFrom};

use crate::descriptor::CodecDescriptor;
use crate::image::{Orientation, SourceImage};
use crate::io::ReadIo;
use crate::pixel::PixelFormat;
use crate::CodecError;

/// Minimum number of leading bytes read for signature matching.
pub const PROBE_PREFIX_LEN: usize = 16;

/// Summary of a probed stream.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ProbeResult {
    /// The matched codec.
    pub codec: Arc<CodecDescriptor>,
    pub width: u32,
    pub height: u32,
    /// Format the first frame decodes to by default.
    pub pixel_format: PixelFormat,
    /// Number of frames, when cheaply knowable.
    pub frame_count: Option<u32>,
    /// How the first frame is stored.
    pub source: SourceImage,
    pub has_iccp: bool,
}

impl ProbeResult {
    pub fn is_bottom_up(&self) -> bool {
        self.source.orientation == Orientation::BottomUp
    }
}

/// Run `probe` with the stream rewound to where it started afterwards.
pub(crate) fn with_rewind<T>(
    io: &mut dyn ReadIo,
    probe: impl FnOnce(&mut dyn ReadIo) -> Result<T, CodecError>,
) -> Result<T, CodecError> {
    let start = io.stream_position()?;
    let result = probe(&mut *io);
    let rewind = io.seek(SeekFrom::Start(start));
    let value = result?;
    rewind?;
    Ok(value)
}
