#![allow(dead_code)]

use zenstream::{Registry, RegistryConfig};

pub fn registry() -> Registry {
    Registry::new(RegistryConfig::combined()).unwrap()
}

pub const BI_RGB: u32 = 0;
pub const BI_RLE8: u32 = 1;
pub const BI_RLE4: u32 = 2;

/// V3 DIB with `palette` given as RGB and `pixels` stored verbatim.
pub fn dib(width: i32, height: i32, bits: u16, compression: u32, palette: &[[u8; 3]], pixels: &[u8]) -> Vec<u8> {
    let offset = 14 + 40 + 4 * palette.len() as u32;
    let size = offset + pixels.len() as u32;
    let mut data = Vec::new();
    data.extend(b"BM");
    data.extend(size.to_le_bytes());
    data.extend([0; 4]);
    data.extend(offset.to_le_bytes());
    data.extend(40u32.to_le_bytes());
    data.extend(width.to_le_bytes());
    data.extend(height.to_le_bytes());
    data.extend(1u16.to_le_bytes());
    data.extend(bits.to_le_bytes());
    data.extend(compression.to_le_bytes());
    data.extend((pixels.len() as u32).to_le_bytes());
    data.extend(2835i32.to_le_bytes());
    data.extend(2835i32.to_le_bytes());
    data.extend((palette.len() as u32).to_le_bytes());
    data.extend(0u32.to_le_bytes());
    for &[r, g, b] in palette {
        data.extend([b, g, r, 0]);
    }
    data.extend(pixels);
    data
}

/// Concatenate stored rows, each padded to four bytes.
pub fn padded(rows: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for row in rows {
        out.extend_from_slice(row);
        out.resize(out.len().next_multiple_of(4), 0);
    }
    out
}
