//! Stream bounds for sessions.
//!
//! Sessions own a boxed stream, so `&mut File`, `Cursor<Vec<u8>>` and
//! `File` all bind the same way.

use std::io::{Read, Seek, Write};

/// Seekable input stream.
pub trait ReadIo: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadIo for T {}

/// Seekable output stream.
pub trait WriteIo: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteIo for T {}

/// Read until `buf` is full or the stream ends; returns the count read.
pub(crate) fn read_up_to(io: &mut dyn ReadIo, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match io.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
