//! Registry lookup, discovery, backend loading and isolation.

#![cfg(feature = "bmp")]

mod common;

use std::io::Cursor;
use std::sync::Arc;

use common::{BI_RGB, dib, padded, registry};
use rayon::prelude::*;
use zenstream::{
    BackendFactory, CodecBackend, CodecDescriptor, CodecError, CodecFeatures, DecodeRequest,
    FrameDecoder, FrameHeader, ReadFeatures, ReadIo, ReadOptions, Registry, RegistryConfig,
    RequestedFormat, SessionState, Signature, WriteFeatures,
};

fn sample_bmp() -> Vec<u8> {
    let stored = padded(&[&[1, 2, 3, 4, 5, 6], &[7, 8, 9, 10, 11, 12]]);
    dib(2, 2, 24, BI_RGB, &[], &stored)
}

#[test]
fn lookups() {
    let registry = registry();
    assert_eq!(registry.find_by_extension("BMP").unwrap().name, "bmp");
    assert_eq!(registry.find_by_extension(".dib").unwrap().name, "bmp");
    assert_eq!(registry.find_by_mime_type("image/bmp").unwrap().name, "bmp");
    assert_eq!(registry.find_by_path("a/b/photo.Bmp").unwrap().name, "bmp");
    assert_eq!(registry.find_by_signature(&sample_bmp()).unwrap().name, "bmp");
    assert!(matches!(
        registry.find_by_name("tiff"),
        Err(CodecError::CodecNotFound(_))
    ));
    assert!(matches!(
        registry.find_by_signature(b"GIF89a"),
        Err(CodecError::NoMatchingCodec)
    ));
}

#[test]
fn probe_reports_first_frame() {
    let registry = registry();
    let data = sample_bmp();
    let probe = registry.probe(&data).unwrap();
    assert_eq!(probe.codec.name, "bmp");
    assert_eq!((probe.width, probe.height), (2, 2));
    assert_eq!(probe.frame_count, Some(1));
    assert!(probe.is_bottom_up());
    assert!(!probe.has_iccp);
}

#[test]
fn probe_io_leaves_position() {
    let registry = registry();
    let mut io = Cursor::new(sample_bmp());
    registry.probe_io(&mut io).unwrap();
    assert_eq!(io.position(), 0);
}

#[test]
fn load_and_unload() {
    let registry = registry();
    let codec = registry.find_by_name("bmp").unwrap();
    assert!(!registry.is_loaded("bmp"));

    let mut session = registry
        .start_decode_with(&codec, Cursor::new(sample_bmp()), ReadOptions::default())
        .unwrap();
    assert!(registry.is_loaded("bmp"));

    // open sessions keep their backend alive
    registry.unload_backends();
    assert!(!registry.is_loaded("bmp"));
    session.next_image().unwrap();
    session.finish().unwrap();
}

#[test]
fn descriptor_files_are_discovered() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("10-bitmap.codec.json"),
        r#"{"layout": 1, "name": "bitmap", "backend": "bmp", "extensions": ["bmp"]}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("20-broken.codec.json"), "{ not json").unwrap();
    std::fs::write(
        dir.path().join("30-future.codec.json"),
        r#"{"layout": 9, "name": "future", "backend": "bmp"}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("40-orphan.codec.json"),
        r#"{"layout": 1, "name": "orphan", "backend": "tga"}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

    let config = RegistryConfig::search()
        .with_search_dir(dir.path())
        .with_env_vars("ZENSTREAM_TEST_UNSET_PATH", "ZENSTREAM_TEST_UNSET_EXTRA")
        .with_fallback_dir(dir.path().join("missing"));
    let registry = Registry::new(config).unwrap();

    let names: Vec<String> = registry.codecs().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, ["bitmap"]);
    let image = DecodeRequest::new(&sample_bmp())
        .with_registry(&registry)
        .decode()
        .unwrap();
    assert_eq!(image.width(), 2);
}

#[test]
fn concurrent_sessions_share_one_registry() {
    let registry = registry();
    let data = sample_bmp();
    let results: Vec<_> = (0..32)
        .into_par_iter()
        .map(|i| {
            if i % 4 == 0 {
                registry.unload_backends();
            }
            DecodeRequest::new(&data)
                .with_registry(&registry)
                .with_output(zenstream::PixelFormat::Bpp24Rgb)
                .decode()
        })
        .collect();
    let first = results[0].as_ref().unwrap().pixels.clone();
    for result in results {
        assert_eq!(result.unwrap().pixels, first);
    }
}

struct PanickingBackend;

struct PanickingDecoder;

impl CodecBackend for PanickingBackend {
    fn start_decode(
        &self,
        _io: &mut dyn ReadIo,
        _options: &ReadOptions,
    ) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(PanickingDecoder))
    }
}

impl FrameDecoder for PanickingDecoder {
    fn next_frame(&mut self, _io: &mut dyn ReadIo) -> Result<FrameHeader, CodecError> {
        panic!("library gave up");
    }

    fn read_row(&mut self, _io: &mut dyn ReadIo, _row: &mut [u8]) -> Result<(), CodecError> {
        Ok(())
    }
}

fn panicking_descriptor() -> CodecDescriptor {
    CodecDescriptor {
        name: "panicky".into(),
        version: 1,
        description: "always panics".into(),
        signatures: vec![Signature::parse("50 41 4E ?? 43").unwrap()],
        extensions: vec!["pnc".into()],
        mime_types: Vec::new(),
        read_features: ReadFeatures {
            features: CodecFeatures::STATIC,
            output_formats: Vec::new(),
            preferred_output: RequestedFormat::Source,
            tuning: Vec::new(),
        },
        write_features: WriteFeatures::unsupported(),
    }
}

fn load_panicking() -> Result<Arc<dyn CodecBackend>, CodecError> {
    Ok(Arc::new(PanickingBackend))
}

const PANICKING: BackendFactory = BackendFactory {
    name: "panicky",
    describe: panicking_descriptor,
    load: load_panicking,
};

#[test]
fn backend_panic_becomes_an_error() {
    let registry = Registry::new(RegistryConfig::combined().with_backend(PANICKING)).unwrap();
    let mut session = registry
        .start_decode(Cursor::new(b"PANIC!".to_vec()), ReadOptions::default())
        .unwrap();
    assert_eq!(session.codec().name, "panicky");

    let err = session.next_frame().unwrap_err();
    assert!(matches!(err, CodecError::Backend { .. }), "{err:?}");
    assert_eq!(session.state(), SessionState::Error);
    session.finish().unwrap();

    // the registry is unaffected
    assert!(DecodeRequest::new(&sample_bmp())
        .with_registry(&registry)
        .decode()
        .is_ok());
}

#[test]
fn encode_is_refused_by_decode_only_codecs() {
    let registry = Registry::new(RegistryConfig::combined().with_backend(PANICKING)).unwrap();
    let codec = registry.find_by_extension("pnc").unwrap();
    assert!(!codec.can_encode());
    let err = registry
        .start_encode(&codec, Cursor::new(Vec::new()), Default::default())
        .unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedOperation { .. }));
}
