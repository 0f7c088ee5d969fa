//! Streaming decode/encode sessions.
//!
//! A session binds one backend to one stream for one operation and walks
//! the frame → pass → scanline protocol:
//!
//! ```text
//! Init → FrameReady → PassReady → ScanlineStreaming → FrameDone → Finished
//!           ↑  (more passes)  ←──────────┘    │
//!           └──────────── (more frames) ──────┘
//! ```
//!
//! Any backend failure moves the session to `Error`. From there, as from
//! `Finished`, every data operation fails with
//! [`CodecError::InvalidState`]; `finish()` stays callable and is
//! idempotent.

mod decode;
mod encode;

pub use decode::DecodeSession;
pub use encode::EncodeSession;

use crate::CodecError;

/// Protocol state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Bound, no frame started.
    Init,
    /// Frame header known; a pass must be started.
    FrameReady,
    /// Pass started, no row transferred yet.
    PassReady,
    ScanlineStreaming,
    /// Every row of every pass transferred.
    FrameDone,
    Finished,
    Error,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::FrameReady => "frame-ready",
            SessionState::PassReady => "pass-ready",
            SessionState::ScanlineStreaming => "scanline-streaming",
            SessionState::FrameDone => "frame-done",
            SessionState::Finished => "finished",
            SessionState::Error => "error",
        }
    }

    /// Fail with `InvalidState` unless the state is one of `allowed`.
    pub(crate) fn require(
        self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), CodecError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(CodecError::InvalidState {
                operation,
                state: self.name(),
            })
        }
    }
}

/// Row bookkeeping shared by both directions.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Cursor {
    pub passes: u32,
    pub pass: u32,
    pub row: u32,
    pub height: u32,
}

impl Cursor {
    pub fn new(passes: u32, height: u32) -> Self {
        Self {
            passes: passes.max(1),
            pass: 0,
            row: 0,
            height,
        }
    }

    pub fn has_pass(&self) -> bool {
        self.pass < self.passes
    }

    pub fn start_pass(&mut self) {
        self.pass += 1;
        self.row = 0;
    }

    /// Account for one transferred row and return the next state.
    pub fn advance(&mut self) -> SessionState {
        self.row += 1;
        if self.row < self.height {
            SessionState::ScanlineStreaming
        } else if self.pass < self.passes {
            SessionState::FrameReady
        } else {
            SessionState::FrameDone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_passes() {
        let mut cursor = Cursor::new(2, 2);
        assert!(cursor.has_pass());
        cursor.start_pass();
        assert_eq!(cursor.advance(), SessionState::ScanlineStreaming);
        assert_eq!(cursor.advance(), SessionState::FrameReady);
        cursor.start_pass();
        cursor.advance();
        assert_eq!(cursor.advance(), SessionState::FrameDone);
        assert!(!cursor.has_pass());
    }

    #[test]
    fn state_check() {
        let err = SessionState::Finished
            .require("read_scanline", &[SessionState::PassReady])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "operation read_scanline is invalid in state finished"
        );
    }
}
