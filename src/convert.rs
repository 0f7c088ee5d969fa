//! Pixel conversion engine.
//!
//! Stateless per-call transforms from any supported source layout into one of
//! the RGB(A) targets. Each pixel is resolved through the palette (indexed
//! sources), unpacked to 8- or 16-bit channels matching its source depth,
//! passed through the alpha policy, then packed into the target layout.


use crate::image::Image;
use crate::options::flag_set;
use crate::pixel::{PixelFormat, RGB8, RGB16, RGBA8, RGBA16, packed_index};
use crate::{CodecError, Palette};

flag_set! {
    /// Or-ed alpha handling flags.
    ConversionFlags {
        /// Ignore source alpha; output is opaque.
        DROP_ALPHA = 0,
        /// Blend color toward the background using source alpha; output is
        /// opaque. Takes precedence over `DROP_ALPHA`.
        BLEND_ALPHA = 1,
    }
}

/// Conversion flags and background color.
///
/// The background is held at 8-bit and 16-bit channel precision. Setting one
/// recomputes the other by linear scaling between the channel ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversionOptions {
    flags: ConversionFlags,
    background8: RGB8,
    background16: RGB16,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            flags: ConversionFlags::NONE,
            background8: RGB8::new(0, 0, 0),
            background16: RGB16::new(0, 0, 0),
        }
    }
}

impl ConversionOptions {
    pub fn new(flags: ConversionFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    pub fn flags(&self) -> ConversionFlags {
        self.flags
    }

    pub fn background8(&self) -> RGB8 {
        self.background8
    }

    pub fn background16(&self) -> RGB16 {
        self.background16
    }

    pub fn set_flags(&mut self, flags: ConversionFlags) {
        self.flags = flags;
    }

    /// Set the 8-bit background; the 16-bit one follows.
    pub fn set_background8(&mut self, color: RGB8) {
        self.background8 = color;
        self.background16 = RGB16::new(widen(color.r), widen(color.g), widen(color.b));
    }

    /// Set the 16-bit background; the 8-bit one follows.
    pub fn set_background16(&mut self, color: RGB16) {
        self.background16 = color;
        self.background8 = RGB8::new(narrow(color.r), narrow(color.g), narrow(color.b));
    }

    pub fn with_background8(mut self, color: RGB8) -> Self {
        self.set_background8(color);
        self
    }

    pub fn with_background16(mut self, color: RGB16) -> Self {
        self.set_background16(color);
        self
    }
}

fn widen(c: u8) -> u16 {
    c as u16 * 257
}

fn narrow(c: u16) -> u8 {
    ((c as u32 * 255 + 32767) / 65535) as u8
}

/// One pixel at its source precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Color {
    Eight(RGBA8),
    Sixteen(RGBA16),
}

/// Layouts the engine can produce.
pub const CONVERSION_TARGETS: [PixelFormat; 6] = [
    PixelFormat::Bpp24Rgb,
    PixelFormat::Bpp24Bgr,
    PixelFormat::Bpp32Rgba,
    PixelFormat::Bpp32Bgra,
    PixelFormat::Bpp48Rgb,
    PixelFormat::Bpp64Rgba,
];

/// Whether the engine can produce `target`. Every [`PixelFormat`] is
/// accepted as a source.
pub fn is_conversion_target(target: PixelFormat) -> bool {
    CONVERSION_TARGETS.contains(&target)
}

/// Convert `width` pixels of one row.
///
/// `source` must hold at least the unpadded row bytes of `source_format`,
/// `target` at least those of `target_format`.
pub fn convert_row(
    source: &[u8],
    source_format: PixelFormat,
    palette: Option<&Palette>,
    target: &mut [u8],
    target_format: PixelFormat,
    width: u32,
    options: &ConversionOptions,
) -> Result<(), CodecError> {
    if !is_conversion_target(target_format) {
        return Err(CodecError::UnsupportedPixelFormat(target_format));
    }
    let palette = if source_format.is_indexed() {
        match palette {
            Some(p) if !p.is_empty() => Some(p),
            _ => return Err(CodecError::MissingPalette),
        }
    } else {
        None
    };

    let width = width as usize;
    if source.len() < source_format.bytes_in_row(width as u32)?
        || target.len() < target_format.bytes_in_row(width as u32)?
    {
        return Err(CodecError::InvalidInput("row buffer too short".into()));
    }

    for x in 0..width {
        let color = unpack(source, source_format, palette, x)?;
        let color = apply_alpha(color, options);
        pack(color, target, target_format, x);
    }
    Ok(())
}

/// Convert a whole image into a new one with `target_format`.
pub fn convert_image(
    image: &Image,
    target_format: PixelFormat,
    options: &ConversionOptions,
) -> Result<Image, CodecError> {
    let mut header = image.header.clone();
    header.pixel_format = target_format;
    header.stride = target_format.stride(header.width)?;
    header.palette = None;
    let mut output = Image::new(header)?;
    let stride = output.header.stride;

    for (source, target) in image
        .as_img()
        .rows()
        .zip(output.pixels.chunks_exact_mut(stride))
    {
        convert_row(
            source,
            image.header.pixel_format,
            image.header.palette.as_ref(),
            target,
            target_format,
            image.header.width,
            options,
        )?;
    }
    Ok(output)
}

fn ne16(bytes: &[u8], offset: usize) -> u16 {
    bytemuck::pod_read_unaligned(&bytes[offset..offset + 2])
}

fn expand5(v: u16) -> u8 {
    let v = (v & 0x1f) as u8;
    (v << 3) | (v >> 2)
}

fn expand6(v: u16) -> u8 {
    let v = (v & 0x3f) as u8;
    (v << 2) | (v >> 4)
}

fn unpack(
    row: &[u8],
    format: PixelFormat,
    palette: Option<&Palette>,
    x: usize,
) -> Result<Color, CodecError> {
    let color = match format {
        PixelFormat::Bpp1Indexed
        | PixelFormat::Bpp2Indexed
        | PixelFormat::Bpp4Indexed
        | PixelFormat::Bpp8Indexed => {
            let index = packed_index(row, format.bits_per_pixel(), x);
            let palette = palette.ok_or(CodecError::MissingPalette)?;
            Color::Eight(palette.color(index as usize)?)
        }
        PixelFormat::Bpp8Grayscale => {
            let g = row[x];
            Color::Eight(RGBA8::new(g, g, g, 255))
        }
        PixelFormat::Bpp16Grayscale => {
            let g = ne16(row, x * 2);
            Color::Sixteen(RGBA16::new(g, g, g, u16::MAX))
        }
        PixelFormat::Bpp16GrayscaleAlpha => {
            let (g, a) = (row[x * 2], row[x * 2 + 1]);
            Color::Eight(RGBA8::new(g, g, g, a))
        }
        PixelFormat::Bpp32GrayscaleAlpha => {
            let (g, a) = (ne16(row, x * 4), ne16(row, x * 4 + 2));
            Color::Sixteen(RGBA16::new(g, g, g, a))
        }
        PixelFormat::Bpp16Rgb555 => {
            let w = ne16(row, x * 2);
            Color::Eight(RGBA8::new(expand5(w >> 10), expand5(w >> 5), expand5(w), 255))
        }
        PixelFormat::Bpp16Rgb565 => {
            let w = ne16(row, x * 2);
            Color::Eight(RGBA8::new(expand5(w >> 11), expand6(w >> 5), expand5(w), 255))
        }
        PixelFormat::Bpp24Rgb => {
            let p = &row[x * 3..x * 3 + 3];
            Color::Eight(RGBA8::new(p[0], p[1], p[2], 255))
        }
        PixelFormat::Bpp24Bgr => {
            let p = &row[x * 3..x * 3 + 3];
            Color::Eight(RGBA8::new(p[2], p[1], p[0], 255))
        }
        PixelFormat::Bpp32Rgba => {
            let p = &row[x * 4..x * 4 + 4];
            Color::Eight(RGBA8::new(p[0], p[1], p[2], p[3]))
        }
        PixelFormat::Bpp32Bgra => {
            let p = &row[x * 4..x * 4 + 4];
            Color::Eight(RGBA8::new(p[2], p[1], p[0], p[3]))
        }
        PixelFormat::Bpp48Rgb => {
            let o = x * 6;
            Color::Sixteen(RGBA16::new(
                ne16(row, o),
                ne16(row, o + 2),
                ne16(row, o + 4),
                u16::MAX,
            ))
        }
        PixelFormat::Bpp64Rgba => {
            let o = x * 8;
            Color::Sixteen(RGBA16::new(
                ne16(row, o),
                ne16(row, o + 2),
                ne16(row, o + 4),
                ne16(row, o + 6),
            ))
        }
    };
    Ok(color)
}

fn blend8(c: u8, bg: u8, a: u8) -> u8 {
    let (c, bg, a) = (c as u32, bg as u32, a as u32);
    ((c * a + bg * (255 - a) + 127) / 255) as u8
}

fn blend16(c: u16, bg: u16, a: u16) -> u16 {
    let (c, bg, a) = (c as u64, bg as u64, a as u64);
    ((c * a + bg * (65535 - a) + 32767) / 65535) as u16
}

fn apply_alpha(color: Color, options: &ConversionOptions) -> Color {
    let flags = options.flags();
    if flags.contains(ConversionFlags::BLEND_ALPHA) {
        match color {
            Color::Eight(p) => {
                let bg = options.background8();
                Color::Eight(RGBA8::new(
                    blend8(p.r, bg.r, p.a),
                    blend8(p.g, bg.g, p.a),
                    blend8(p.b, bg.b, p.a),
                    255,
                ))
            }
            Color::Sixteen(p) => {
                let bg = options.background16();
                Color::Sixteen(RGBA16::new(
                    blend16(p.r, bg.r, p.a),
                    blend16(p.g, bg.g, p.a),
                    blend16(p.b, bg.b, p.a),
                    u16::MAX,
                ))
            }
        }
    } else if flags.contains(ConversionFlags::DROP_ALPHA) {
        match color {
            Color::Eight(p) => Color::Eight(RGBA8 { a: 255, ..p }),
            Color::Sixteen(p) => Color::Sixteen(RGBA16 { a: u16::MAX, ..p }),
        }
    } else {
        color
    }
}

fn to8(color: Color) -> RGBA8 {
    match color {
        Color::Eight(p) => p,
        Color::Sixteen(p) => RGBA8::new(
            (p.r >> 8) as u8,
            (p.g >> 8) as u8,
            (p.b >> 8) as u8,
            (p.a >> 8) as u8,
        ),
    }
}

fn to16(color: Color) -> RGBA16 {
    match color {
        Color::Sixteen(p) => p,
        Color::Eight(p) => RGBA16::new(widen(p.r), widen(p.g), widen(p.b), widen(p.a)),
    }
}

fn pack(color: Color, row: &mut [u8], format: PixelFormat, x: usize) {
    match format {
        PixelFormat::Bpp24Rgb => {
            let p = to8(color);
            row[x * 3..x * 3 + 3].copy_from_slice(&[p.r, p.g, p.b]);
        }
        PixelFormat::Bpp24Bgr => {
            let p = to8(color);
            row[x * 3..x * 3 + 3].copy_from_slice(&[p.b, p.g, p.r]);
        }
        PixelFormat::Bpp32Rgba => {
            let p = to8(color);
            row[x * 4..x * 4 + 4].copy_from_slice(&[p.r, p.g, p.b, p.a]);
        }
        PixelFormat::Bpp32Bgra => {
            let p = to8(color);
            row[x * 4..x * 4 + 4].copy_from_slice(&[p.b, p.g, p.r, p.a]);
        }
        PixelFormat::Bpp48Rgb => {
            let p = to16(color);
            let o = x * 6;
            for (i, c) in [p.r, p.g, p.b].into_iter().enumerate() {
                row[o + i * 2..o + i * 2 + 2].copy_from_slice(bytemuck::bytes_of(&c));
            }
        }
        PixelFormat::Bpp64Rgba => {
            let p = to16(color);
            let o = x * 8;
            for (i, c) in [p.r, p.g, p.b, p.a].into_iter().enumerate() {
                row[o + i * 2..o + i * 2 + 2].copy_from_slice(bytemuck::bytes_of(&c));
            }
        }
        // guarded by is_conversion_target
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blend_options(bg: RGB8) -> ConversionOptions {
        ConversionOptions::new(ConversionFlags::BLEND_ALPHA).with_background8(bg)
    }

    #[test]
    fn transparent_pixel_becomes_background() {
        let options = blend_options(RGB8::new(255, 0, 0));
        let mut out = [0u8; 3];
        convert_row(
            &[10, 20, 30, 0],
            PixelFormat::Bpp32Rgba,
            None,
            &mut out,
            PixelFormat::Bpp24Rgb,
            1,
            &options,
        )
        .unwrap();
        assert_eq!(out, [255, 0, 0]);
    }

    #[test]
    fn opaque_pixel_is_unchanged() {
        let options = blend_options(RGB8::new(255, 0, 0));
        let mut out = [0u8; 3];
        convert_row(
            &[10, 20, 30, 255],
            PixelFormat::Bpp32Rgba,
            None,
            &mut out,
            PixelFormat::Bpp24Rgb,
            1,
            &options,
        )
        .unwrap();
        assert_eq!(out, [10, 20, 30]);
    }

    #[test]
    fn sixteen_bit_blend_uses_wide_background() {
        let options = blend_options(RGB8::new(255, 0, 0));
        assert_eq!(options.background16(), RGB16::new(65535, 0, 0));

        let mut source = [0u8; 8];
        for (i, c) in [1000u16, 2000, 3000, 0].into_iter().enumerate() {
            source[i * 2..i * 2 + 2].copy_from_slice(&c.to_ne_bytes());
        }
        let mut out = [0u8; 8];
        convert_row(
            &source,
            PixelFormat::Bpp64Rgba,
            None,
            &mut out,
            PixelFormat::Bpp64Rgba,
            1,
            &options,
        )
        .unwrap();
        assert_eq!(ne16(&out, 0), 65535);
        assert_eq!(ne16(&out, 2), 0);
        assert_eq!(ne16(&out, 6), 65535);
    }

    #[test]
    fn background_precisions_stay_consistent() {
        let mut options = ConversionOptions::default();
        options.set_background16(RGB16::new(65535, 32896, 0));
        assert_eq!(options.background8(), RGB8::new(255, 128, 0));
        options.set_background8(RGB8::new(1, 2, 3));
        assert_eq!(options.background16(), RGB16::new(257, 514, 771));
    }

    #[test]
    fn drop_alpha_makes_opaque() {
        let options = ConversionOptions::new(ConversionFlags::DROP_ALPHA);
        let mut out = [0u8; 4];
        convert_row(
            &[1, 2, 3, 4],
            PixelFormat::Bpp32Bgra,
            None,
            &mut out,
            PixelFormat::Bpp32Rgba,
            1,
            &options,
        )
        .unwrap();
        assert_eq!(out, [3, 2, 1, 255]);
    }

    #[test]
    fn indexed_needs_palette() {
        let mut out = [0u8; 4];
        let err = convert_row(
            &[0],
            PixelFormat::Bpp8Indexed,
            Some(&Palette::Rgba8(alloc::vec![])),
            &mut out,
            PixelFormat::Bpp32Rgba,
            1,
            &ConversionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::MissingPalette));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let palette = Palette::Rgb8(alloc::vec![RGB8::new(0, 0, 0), RGB8::new(9, 9, 9)]);
        let mut out = [0u8; 8];
        let err = convert_row(
            &[0b0011_0000],
            PixelFormat::Bpp4Indexed,
            Some(&palette),
            &mut out,
            PixelFormat::Bpp32Rgba,
            2,
            &ConversionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::PaletteIndexOutOfRange { index: 3, count: 2 }
        ));
    }

    #[test]
    fn rgb555_expands_to_full_range() {
        let word: u16 = 0x7fff;
        let mut out = [0u8; 3];
        convert_row(
            &word.to_ne_bytes(),
            PixelFormat::Bpp16Rgb555,
            None,
            &mut out,
            PixelFormat::Bpp24Rgb,
            1,
            &ConversionOptions::default(),
        )
        .unwrap();
        assert_eq!(out, [255, 255, 255]);
    }

    #[test]
    fn targets_are_the_direct_color_layouts() {
        assert!(is_conversion_target(PixelFormat::Bpp32Rgba));
        assert!(is_conversion_target(PixelFormat::Bpp64Rgba));
        assert!(!is_conversion_target(PixelFormat::Bpp8Indexed));
        assert!(!is_conversion_target(PixelFormat::Bpp16Rgb565));
    }

    #[test]
    fn unsupported_target() {
        let mut out = [0u8; 1];
        let err = convert_row(
            &[0, 0, 0],
            PixelFormat::Bpp24Rgb,
            None,
            &mut out,
            PixelFormat::Bpp8Grayscale,
            1,
            &ConversionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnsupportedPixelFormat(PixelFormat::Bpp8Grayscale)
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn blend_stays_between_color_and_background(
                c in any::<u8>(), bg in any::<u8>(), a in any::<u8>()
            ) {
                let out = blend8(c, bg, a);
                prop_assert!(out >= c.min(bg) && out <= c.max(bg));
            }

            #[test]
            fn background_roundtrips_through_16_bits(r in any::<u8>(), g in any::<u8>(), b in any::<u8>()) {
                let options = ConversionOptions::default().with_background8(RGB8::new(r, g, b));
                let back = ConversionOptions::default().with_background16(options.background16());
                prop_assert_eq!(back.background8(), RGB8::new(r, g, b));
            }
        }
    }
}
