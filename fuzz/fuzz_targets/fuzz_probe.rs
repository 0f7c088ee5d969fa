#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;
use zenstream::{Registry, RegistryConfig};

static REGISTRY: LazyLock<Registry> =
    LazyLock::new(|| Registry::new(RegistryConfig::combined()).expect("combined registry"));

fuzz_target!(|data: &[u8]| {
    let _ = REGISTRY.probe(data);
});
