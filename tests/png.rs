//! PNG backend through the registry, including cross-format conversion.

#![cfg(all(feature = "png", feature = "bmp"))]

mod common;

use common::{BI_RGB, dib, padded, registry};
use zenstream::{
    CodecError, DecodeRequest, EncodeRequest, FrameHeader, Image, IoOptions, PixelFormat,
};

fn rgba_image() -> Image {
    let header = FrameHeader::new(3, 2, PixelFormat::Bpp32Rgba)
        .unwrap()
        .with_meta("Title", "gradient");
    let packed: Vec<u8> = (0..24u8).map(|i| i * 10).collect();
    Image::from_packed_rows(header, &packed).unwrap()
}

#[test]
fn png_round_trip() {
    let registry = registry();
    let image = rgba_image();
    let data = EncodeRequest::new("png")
        .with_registry(&registry)
        .with_compression_level(9.0)
        .encode(&image)
        .unwrap();
    assert_eq!(registry.probe(&data).unwrap().codec.name, "png");

    let decoded = DecodeRequest::new(&data)
        .with_registry(&registry)
        .with_io_options(IoOptions::META_INFO)
        .decode()
        .unwrap();
    assert_eq!(decoded.header.pixel_format, PixelFormat::Bpp32Rgba);
    assert_eq!(decoded.pixels, image.pixels);
    assert_eq!(decoded.header.meta_value("Title"), Some("gradient"));
}

#[test]
fn bmp_to_png() {
    let registry = registry();
    let stored = padded(&[&[0, 0, 255, 0, 255, 0]]);
    let bmp = dib(2, 1, 24, BI_RGB, &[], &stored);
    let image = DecodeRequest::new(&bmp)
        .with_registry(&registry)
        .with_output(PixelFormat::Bpp24Rgb)
        .decode()
        .unwrap();

    let png = EncodeRequest::new("png")
        .with_registry(&registry)
        .encode(&image)
        .unwrap();
    let back = DecodeRequest::new(&png)
        .with_registry(&registry)
        .decode()
        .unwrap();
    assert_eq!(back.header.pixel_format, PixelFormat::Bpp24Rgb);
    assert_eq!(back.row(0).unwrap(), &[255, 0, 0, 0, 255, 0]);
}

#[test]
fn png_rejects_bgr_input() {
    let registry = registry();
    let header = FrameHeader::new(1, 1, PixelFormat::Bpp24Bgr).unwrap();
    let image = Image::new(header).unwrap();
    let err = EncodeRequest::new("png")
        .with_registry(&registry)
        .encode(&image)
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::UnsupportedPixelFormat(PixelFormat::Bpp24Bgr)
    ));
}
