//! Registry configuration.
//!
//! Controls how the registry finds its backends: a statically combined
//! build uses every linked backend directly, a search build reads
//! `*.codec.json` descriptor files from a directory set.
//!
//! # Example
//!
//! ```no_run
//! use zenstream::{InitFlags, Registry, RegistryConfig};
//!
//! let config = RegistryConfig::search()
//!     .with_search_dir("/opt/codecs")
//!     .with_flags(InitFlags::PRELOAD_CODECS);
//! let registry = Registry::new(config)?;
//! # Ok::<(), zenstream::CodecError>(())
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use std::path::PathBuf;

use crate::codec::BackendFactory;
use crate::options::flag_set;

/// Environment variable holding the primary search path list.
pub const CODECS_PATH_ENV: &str = "ZENSTREAM_CODECS_PATH";

/// Environment variable holding additional directories, all scanned.
pub const THIRD_PARTY_CODECS_PATH_ENV: &str = "ZENSTREAM_THIRD_PARTY_CODECS_PATH";

/// Compiled-in fallback search directory.
pub const DEFAULT_CODECS_DIR: &str = match option_env!("ZENSTREAM_DEFAULT_CODECS_DIR") {
    Some(dir) => dir,
    None => "/usr/local/lib/zenstream/codecs",
};

flag_set! {
    /// Or-ed registry init flags.
    InitFlags {
        /// Load every backend during init instead of on first use.
        PRELOAD_CODECS = 0,
    }
}

/// Where backends come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Every linked backend is registered; no directories are read.
    Combined,
    /// Descriptor files are read from the search directories.
    Search,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        if cfg!(feature = "combined") {
            DiscoveryMode::Combined
        } else {
            DiscoveryMode::Search
        }
    }
}

/// Registry configuration.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RegistryConfig {
    pub mode: DiscoveryMode,
    /// Directories always scanned, before the environment-selected one.
    pub search_dirs: Vec<PathBuf>,
    /// Variable holding the primary path list; the first existing entry wins.
    pub path_env: String,
    /// Variable holding extra directories, all scanned.
    pub third_party_env: String,
    /// Used when no directory from `path_env` exists.
    pub fallback_dir: PathBuf,
    /// Backends registered in addition to the linked ones.
    pub backends: Vec<BackendFactory>,
    pub flags: InitFlags,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            search_dirs: Vec::new(),
            path_env: CODECS_PATH_ENV.into(),
            third_party_env: THIRD_PARTY_CODECS_PATH_ENV.into(),
            fallback_dir: PathBuf::from(DEFAULT_CODECS_DIR),
            backends: Vec::new(),
            flags: InitFlags::NONE,
        }
    }
}

impl RegistryConfig {
    /// Every linked backend, no discovery.
    pub fn combined() -> Self {
        Self {
            mode: DiscoveryMode::Combined,
            ..Self::default()
        }
    }

    /// Directory discovery.
    pub fn search() -> Self {
        Self {
            mode: DiscoveryMode::Search,
            ..Self::default()
        }
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    /// Override the environment variable names.
    pub fn with_env_vars(mut self, path_env: impl Into<String>, third_party_env: impl Into<String>) -> Self {
        self.path_env = path_env.into();
        self.third_party_env = third_party_env.into();
        self
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = dir.into();
        self
    }

    /// Register a backend that is not linked by a crate feature.
    pub fn with_backend(mut self, factory: BackendFactory) -> Self {
        self.backends.push(factory);
        self
    }

    pub fn with_flags(mut self, flags: InitFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.path_env, "ZENSTREAM_CODECS_PATH");
        assert!(config.flags == InitFlags::NONE);
        #[cfg(feature = "combined")]
        assert_eq!(config.mode, DiscoveryMode::Combined);
    }

    #[test]
    fn builder() {
        let config = RegistryConfig::search()
            .with_search_dir("/a")
            .with_search_dir("/b")
            .with_flags(InitFlags::PRELOAD_CODECS);
        assert_eq!(config.mode, DiscoveryMode::Search);
        assert_eq!(config.search_dirs.len(), 2);
        assert!(config.flags.contains(InitFlags::PRELOAD_CODECS));
    }
}
