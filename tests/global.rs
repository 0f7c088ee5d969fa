//! Process-wide registry lifecycle. Kept in its own test binary so no
//! other test observes the teardown.

use std::sync::Arc;

use zenstream::{InitFlags, registry};

#[test]
fn init_preload_and_finish() {
    let first = registry::init(InitFlags::PRELOAD_CODECS).unwrap();
    #[cfg(feature = "bmp")]
    assert!(first.is_loaded("bmp"));

    let again = registry::global().unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    registry::unload_backends();
    assert!(!first.codecs().iter().any(|c| first.is_loaded(&c.name)));

    registry::finish();
    registry::finish();
    let fresh = registry::global().unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    // handles from before the teardown stay usable
    assert_eq!(first.codecs().len(), fresh.codecs().len());
}
