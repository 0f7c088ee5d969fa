//! Linked-in format backends.
//!
//! Each backend is feature-gated and exposes a [`BackendFactory`] the
//! registry uses in combined mode, or binds to descriptor files in search
//! mode.

use alloc::vec::Vec;

use crate::codec::BackendFactory;

#[cfg(feature = "bmp")]
pub(crate) mod bmp;

#[cfg(feature = "png")]
pub(crate) mod png;

/// Factories for every backend compiled into this build, in registration
/// order.
#[allow(unused_mut)]
pub fn linked() -> Vec<BackendFactory> {
    let mut factories = Vec::new();
    #[cfg(feature = "bmp")]
    factories.push(bmp::FACTORY);
    #[cfg(feature = "png")]
    factories.push(png::FACTORY);
    factories
}
