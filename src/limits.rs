//! Resource limits.
//!
//! Checked when a backend produces a frame header, before any buffer sized
//! from that header is allocated.

use crate::CodecError;

/// Caps on what a hostile header can make a session allocate. `None` means
/// unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    /// Width × height.
    pub max_pixels: Option<u64>,
    /// Largest single buffer: a whole-frame remap, an embedded profile, or
    /// a decoded image.
    pub max_memory_bytes: Option<u64>,
}

fn within(value: u64, max: Option<u64>, what: &'static str) -> Result<(), CodecError> {
    match max {
        Some(max) if value > max => Err(CodecError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Limits {
    /// No restrictions.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_max_dimensions(mut self, width: u64, height: u64) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    pub fn with_max_pixels(mut self, pixels: u64) -> Self {
        self.max_pixels = Some(pixels);
        self
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn check_dimensions(&self, width: u64, height: u64) -> Result<(), CodecError> {
        within(width, self.max_width, "image width")?;
        within(height, self.max_height, "image height")?;
        within(width.saturating_mul(height), self.max_pixels, "pixel count")
    }

    pub fn check_memory(&self, bytes: u64) -> Result<(), CodecError> {
        within(bytes, self.max_memory_bytes, "buffer size")
    }
}
