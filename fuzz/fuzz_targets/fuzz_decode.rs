#![no_main]

use std::sync::LazyLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use zenstream::{
    ConversionFlags, ConversionOptions, DecodeRequest, Limits, PixelFormat, Registry,
    RegistryConfig, RequestedFormat,
};

static REGISTRY: LazyLock<Registry> =
    LazyLock::new(|| Registry::new(RegistryConfig::combined()).expect("combined registry"));

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    output: u8,
    blend: bool,
    data: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let output = match input.output % 4 {
        0 => RequestedFormat::Source,
        1 => PixelFormat::Bpp24Rgb.into(),
        2 => PixelFormat::Bpp32Rgba.into(),
        _ => PixelFormat::Bpp64Rgba.into(),
    };
    let flags = if input.blend {
        ConversionFlags::BLEND_ALPHA
    } else {
        ConversionFlags::NONE
    };
    let limits = Limits {
        max_pixels: Some(4 * 1024 * 1024),
        max_memory_bytes: Some(64 * 1024 * 1024),
        ..Limits::default()
    };
    let _ = DecodeRequest::new(input.data)
        .with_registry(&REGISTRY)
        .with_output(output)
        .with_conversion(ConversionOptions::new(flags))
        .with_limits(limits)
        .decode_all();
});
