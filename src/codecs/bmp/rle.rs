//! RLE4/RLE8 row codec.
//!
//! A run is either `count, value` (an encoded run) or an escape: `0, 0` ends
//! the line, `0, 1` ends the bitmap, `0, 2` moves the cursor, and `0, n`
//! with `n >= 3` starts `n` literal pixels padded to a 16-bit boundary.
//!
//! End-of-bitmap is only legal after the last row; met while a row is still
//! being decoded it means the image is broken.

use alloc::format;
use alloc::vec::Vec;
use std::io::{Read, Seek, SeekFrom};

use byteorder::ReadBytesExt;

use crate::io::{ReadIo, read_up_to};
use crate::pixel::set_packed_index;
use crate::CodecError;

fn overflow(x: usize, count: usize, width: usize) -> CodecError {
    log::error!("BMP: RLE run of {count} at column {x} overflows row width {width}");
    CodecError::BrokenImage(format!(
        "RLE run of {count} at column {x} overflows row width {width}"
    ))
}

/// Consume an end-of-line marker if one follows a completely filled row.
fn skip_end_of_line(io: &mut dyn ReadIo) -> Result<(), CodecError> {
    let start = io.stream_position()?;
    let mut marker = [0u8; 2];
    if read_up_to(io, &mut marker)? != 2 || marker != [0, 0] {
        io.seek(SeekFrom::Start(start))?;
    }
    Ok(())
}

/// Decode one row of `width` indices of `bits` (4 or 8) into `row`, packed
/// MSB-first. `row` must be zeroed by the caller; pixels an early end-of-line
/// skips stay index 0.
pub(crate) fn decode_row(
    io: &mut dyn ReadIo,
    bits: u32,
    width: usize,
    row: &mut [u8],
) -> Result<(), CodecError> {
    let mut x = 0usize;
    while x < width {
        let count = usize::from(io.read_u8()?);
        let value = io.read_u8()?;

        if count > 0 {
            if x + count > width {
                return Err(overflow(x, count, width));
            }
            for i in 0..count {
                let index = if bits == 4 {
                    if i % 2 == 0 { value >> 4 } else { value & 0x0F }
                } else {
                    value
                };
                set_packed_index(row, bits, x + i, index);
            }
            x += count;
            continue;
        }

        match value {
            0 => return Ok(()),
            1 => {
                log::error!("BMP: unexpected end-of-bitmap marker at column {x}");
                return Err(CodecError::BrokenImage(format!(
                    "unexpected end-of-bitmap marker at column {x}"
                )));
            }
            2 => {
                log::error!("BMP: RLE delta markers are not supported");
                return Err(CodecError::UnsupportedFormat(
                    "RLE delta markers".into(),
                ));
            }
            literal => {
                let count = usize::from(literal);
                if x + count > width {
                    return Err(overflow(x, count, width));
                }
                let len = (count * bits as usize).div_ceil(8);
                // literal runs are padded to an even byte count
                let mut data = alloc::vec![0u8; len + len % 2];
                io.read_exact(&mut data)?;
                for i in 0..count {
                    let index = if bits == 4 {
                        let byte = data[i / 2];
                        if i % 2 == 0 { byte >> 4 } else { byte & 0x0F }
                    } else {
                        data[i]
                    };
                    set_packed_index(row, bits, x + i, index);
                }
                x += count;
            }
        }
    }
    skip_end_of_line(io)
}

fn run_at(row: &[u8], start: usize) -> usize {
    let value = row[start];
    row[start..]
        .iter()
        .take(255)
        .take_while(|&&v| v == value)
        .count()
}

/// Append one RLE8 row of `indices`, terminated by an end-of-line marker.
pub(crate) fn encode_row8(indices: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < indices.len() {
        let run = run_at(indices, i);
        if run >= 2 {
            out.extend([run as u8, indices[i]]);
            i += run;
            continue;
        }

        let start = i;
        while i < indices.len() && i - start < 255 && run_at(indices, i) < 2 {
            i += 1;
        }
        let literal = &indices[start..i];
        if literal.len() < 3 {
            // escapes 0..=2 are reserved, emit single-pixel runs
            for &v in literal {
                out.extend([1, v]);
            }
        } else {
            out.extend([0, literal.len() as u8]);
            out.extend_from_slice(literal);
            if literal.len() % 2 == 1 {
                out.push(0);
            }
        }
    }
    out.extend([0, 0]);
}
