//! Codec registry: discovery, lookup, backend loading, session creation.
//!
//! One mutex guards the descriptor list and the loaded-backend cache. It is
//! held for discovery, lookup, and loading only, never while a session
//! reads or writes.
//!
//! A process-wide registry is available through [`init`], [`global`] and
//! [`finish`]. Sessions hold their own reference to the backend they use, so
//! tearing the registry down never invalidates a running session.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::codec::{BackendFactory, CodecBackend, guarded};
use crate::config::{DiscoveryMode, InitFlags, RegistryConfig};
use crate::descriptor::CodecDescriptor;
use crate::discovery::{self, Discovered};
use crate::io::{ReadIo, WriteIo, read_up_to};
use crate::options::{ReadOptions, WriteOptions};
use crate::probe::{PROBE_PREFIX_LEN, ProbeResult, with_rewind};
use crate::session::{DecodeSession, EncodeSession};
use crate::CodecError;

struct Entry {
    descriptor: Arc<CodecDescriptor>,
    factory: BackendFactory,
}

struct State {
    entries: Vec<Entry>,
    loaded: HashMap<String, Arc<dyn CodecBackend>>,
}

/// Set of available codecs plus the cache of loaded backends.
pub struct Registry {
    state: Mutex<State>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    /// Build a registry. Codecs that fail to describe or load during
    /// preloading are skipped with a warning.
    pub fn new(config: RegistryConfig) -> Result<Self, CodecError> {
        let mut factories = crate::codecs::linked();
        factories.extend(config.backends.iter().copied());

        let discovered = match config.mode {
            DiscoveryMode::Combined => {
                log::debug!("combined build, skipping codec discovery");
                factories
                    .iter()
                    .map(|f| Discovered {
                        descriptor: (f.describe)(),
                        factory: *f,
                    })
                    .collect()
            }
            DiscoveryMode::Search => {
                let mut found = discovery::discover(&config, &factories)?;
                // programmatically registered backends need no file
                found.extend(config.backends.iter().map(|f| Discovered {
                    descriptor: (f.describe)(),
                    factory: *f,
                }));
                found
            }
        };

        let mut entries: Vec<Entry> = Vec::with_capacity(discovered.len());
        for d in discovered {
            if entries.iter().any(|e| e.descriptor.name == d.descriptor.name) {
                log::warn!("codec '{}' registered twice, keeping the first", d.descriptor.name);
                continue;
            }
            entries.push(Entry {
                descriptor: Arc::new(d.descriptor),
                factory: d.factory,
            });
        }
        log::debug!("registry has {} codec(s)", entries.len());

        let registry = Self {
            state: Mutex::new(State {
                entries,
                loaded: HashMap::new(),
            }),
        };
        if config.flags.contains(InitFlags::PRELOAD_CODECS) {
            registry.preload();
        }
        Ok(registry)
    }

    /// Registry with the default configuration.
    pub fn with_defaults() -> Result<Self, CodecError> {
        Self::new(RegistryConfig::default())
    }

    /// Load every backend now.
    pub fn preload(&self) {
        for codec in self.codecs() {
            if let Err(e) = self.load(&codec) {
                log::warn!("{}: preloading failed: {e}", codec.name);
            }
        }
    }

    /// Descriptors in registration order.
    pub fn codecs(&self) -> Vec<Arc<CodecDescriptor>> {
        lock(&self.state)
            .entries
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    fn find(
        &self,
        predicate: impl Fn(&CodecDescriptor) -> bool,
    ) -> Option<Arc<CodecDescriptor>> {
        lock(&self.state)
            .entries
            .iter()
            .find(|e| predicate(&*e.descriptor))
            .map(|e| e.descriptor.clone())
    }

    pub fn find_by_name(&self, name: &str) -> Result<Arc<CodecDescriptor>, CodecError> {
        self.find(|d| d.name == name)
            .ok_or_else(|| CodecError::CodecNotFound(name.into()))
    }

    pub fn find_by_extension(&self, extension: &str) -> Result<Arc<CodecDescriptor>, CodecError> {
        self.find(|d| d.has_extension(extension))
            .ok_or_else(|| CodecError::CodecNotFound(alloc::format!("extension '{extension}'")))
    }

    /// Look up by the path's extension.
    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Result<Arc<CodecDescriptor>, CodecError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| CodecError::CodecNotFound(alloc::format!("{}", path.display())))?;
        self.find_by_extension(extension)
    }

    pub fn find_by_mime_type(&self, mime_type: &str) -> Result<Arc<CodecDescriptor>, CodecError> {
        self.find(|d| d.has_mime_type(mime_type))
            .ok_or_else(|| CodecError::CodecNotFound(alloc::format!("MIME type '{mime_type}'")))
    }

    /// First codec whose signature matches the leading bytes of `data`.
    pub fn find_by_signature(&self, data: &[u8]) -> Result<Arc<CodecDescriptor>, CodecError> {
        self.find(|d| d.matches(data))
            .ok_or(CodecError::NoMatchingCodec)
    }

    /// Loaded backend for `codec`, loading it on first use.
    pub fn load(&self, codec: &CodecDescriptor) -> Result<Arc<dyn CodecBackend>, CodecError> {
        let mut state = lock(&self.state);
        if let Some(backend) = state.loaded.get(&codec.name) {
            return Ok(backend.clone());
        }
        let factory = state
            .entries
            .iter()
            .find(|e| e.descriptor.name == codec.name)
            .map(|e| e.factory)
            .ok_or_else(|| CodecError::CodecNotFound(codec.name.clone()))?;
        let backend = guarded(&codec.name, factory.load)?;
        log::debug!("{}: backend '{}' loaded", codec.name, factory.name);
        state.loaded.insert(codec.name.clone(), backend.clone());
        Ok(backend)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        lock(&self.state).loaded.contains_key(name)
    }

    /// Drop every cached backend; descriptors stay. Running sessions keep
    /// their backend alive.
    pub fn unload_backends(&self) {
        let mut state = lock(&self.state);
        log::debug!("unloading {} backend(s)", state.loaded.len());
        state.loaded.clear();
    }

    fn prefix_len(&self) -> usize {
        lock(&self.state)
            .entries
            .iter()
            .map(|e| e.descriptor.signature_len())
            .max()
            .unwrap_or(0)
            .max(PROBE_PREFIX_LEN)
    }

    /// Match the stream's leading bytes without moving it.
    pub fn detect(&self, io: &mut dyn ReadIo) -> Result<Arc<CodecDescriptor>, CodecError> {
        let mut prefix = alloc::vec![0u8; self.prefix_len()];
        let len = with_rewind(io, |io| Ok(read_up_to(io, &mut prefix)?))?;
        self.find_by_signature(&prefix[..len])
    }

    /// Probe an in-memory image.
    pub fn probe(&self, data: &[u8]) -> Result<ProbeResult, CodecError> {
        self.probe_io(&mut Cursor::new(data))
    }

    pub fn probe_path(&self, path: impl AsRef<Path>) -> Result<ProbeResult, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        self.probe_io(&mut file)
    }

    /// Probe a stream; its position is restored afterwards.
    pub fn probe_io(&self, io: &mut dyn ReadIo) -> Result<ProbeResult, CodecError> {
        let codec = self.detect(io)?;
        let backend = self.load(&codec)?;
        with_rewind(io, |io| {
            let mut session =
                DecodeSession::start(codec.clone(), backend, &mut *io, ReadOptions::default())?;
            let header = session.next_frame()?.clone();
            let frame_count = session.frame_count();
            session.finish()?;
            Ok(ProbeResult {
                codec,
                width: header.width,
                height: header.height,
                pixel_format: header.pixel_format,
                frame_count,
                source: header.source,
                has_iccp: header.iccp.is_some(),
            })
        })
    }

    /// Start decoding `io`, choosing the codec by signature.
    pub fn start_decode<'io>(
        &self,
        io: impl ReadIo + 'io,
        options: ReadOptions,
    ) -> Result<DecodeSession<'io>, CodecError> {
        let mut io = io;
        let codec = self.detect(&mut io)?;
        self.start_decode_with(&codec, io, options)
    }

    /// Start decoding `io` with a known codec.
    pub fn start_decode_with<'io>(
        &self,
        codec: &Arc<CodecDescriptor>,
        io: impl ReadIo + 'io,
        options: ReadOptions,
    ) -> Result<DecodeSession<'io>, CodecError> {
        let backend = self.load(codec)?;
        DecodeSession::start(codec.clone(), backend, io, options)
    }

    /// Open a file for decoding.
    pub fn open_path(
        &self,
        path: impl AsRef<Path>,
        options: ReadOptions,
    ) -> Result<DecodeSession<'static>, CodecError> {
        let file = BufReader::new(File::open(path)?);
        self.start_decode(file, options)
    }

    /// Start encoding into `io`.
    pub fn start_encode<'io>(
        &self,
        codec: &Arc<CodecDescriptor>,
        io: impl WriteIo + 'io,
        options: WriteOptions,
    ) -> Result<EncodeSession<'io>, CodecError> {
        let backend = self.load(codec)?;
        EncodeSession::start(codec.clone(), backend, io, options)
    }

    /// Create a file for encoding, choosing the codec by extension.
    pub fn create_path(
        &self,
        path: impl AsRef<Path>,
        options: WriteOptions,
    ) -> Result<EncodeSession<'static>, CodecError> {
        let path = path.as_ref();
        let codec = self.find_by_path(path)?;
        let file = BufWriter::new(File::create(path)?);
        self.start_encode(&codec, file, options)
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Registry")
            .field(
                "codecs",
                &state
                    .entries
                    .iter()
                    .map(|e| e.descriptor.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("loaded", &state.loaded.len())
            .finish()
    }
}

static GLOBAL: Mutex<Option<Arc<Registry>>> = Mutex::new(None);

/// Initialize the process-wide registry with the default configuration.
///
/// Idempotent: later calls return the existing registry (preloading it if
/// asked to).
pub fn init(flags: InitFlags) -> Result<Arc<Registry>, CodecError> {
    let mut global = lock(&GLOBAL);
    if let Some(registry) = global.as_ref() {
        if flags.contains(InitFlags::PRELOAD_CODECS) {
            registry.preload();
        }
        return Ok(registry.clone());
    }
    let registry = Arc::new(Registry::new(RegistryConfig::default().with_flags(flags))?);
    *global = Some(registry.clone());
    Ok(registry)
}

/// The process-wide registry, initialized on first use.
pub fn global() -> Result<Arc<Registry>, CodecError> {
    init(InitFlags::NONE)
}

/// Unload the process-wide registry's backends.
pub fn unload_backends() {
    if let Some(registry) = lock(&GLOBAL).as_ref() {
        registry.unload_backends();
    }
}

/// Tear down the process-wide registry. Must not race with [`init`] from
/// another thread that expects the old instance; handles already returned
/// stay usable.
pub fn finish() {
    if lock(&GLOBAL).take().is_some() {
        log::debug!("global registry torn down");
    }
}
