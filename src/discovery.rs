//! Descriptor-file discovery.
//!
//! Search order is deterministic: explicit directories from the config,
//! then the first existing directory named by the path environment
//! variable (falling back to the compiled-in directory), then every
//! directory in the third-party variable. Files within a directory are read
//! in name order. Bad files are skipped with a warning.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::codec::BackendFactory;
use crate::config::RegistryConfig;
use crate::descriptor::{CodecDescriptor, Signature};
use crate::CodecError;

/// Descriptor file layout version understood by this crate.
pub const DESCRIPTOR_LAYOUT: u32 = 1;

/// Suffix of descriptor files.
pub const DESCRIPTOR_SUFFIX: &str = ".codec.json";

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    layout: u32,
    name: String,
    backend: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    magic_numbers: Vec<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    mime_types: Vec<String>,
}

/// A discovered codec and the factory that loads it.
#[derive(Clone, Debug)]
pub(crate) struct Discovered {
    pub descriptor: CodecDescriptor,
    pub factory: BackendFactory,
}

/// Directories to scan, in order.
pub(crate) fn search_dirs(config: &RegistryConfig) -> Vec<PathBuf> {
    let mut dirs = config.search_dirs.clone();

    let primary = std::env::var_os(&config.path_env)
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .find(|dir| dir.is_dir())
        .or_else(|| config.fallback_dir.is_dir().then(|| config.fallback_dir.clone()));
    if let Some(dir) = primary {
        dirs.push(dir);
    }

    if let Some(paths) = std::env::var_os(&config.third_party_env) {
        dirs.extend(std::env::split_paths(&paths).filter(|dir| dir.is_dir()));
    }
    dirs
}

/// Read every descriptor file under the search directories.
///
/// `factories` are the backends descriptor files may name.
pub(crate) fn discover(
    config: &RegistryConfig,
    factories: &[BackendFactory],
) -> Result<Vec<Discovered>, CodecError> {
    let mut found: Vec<Discovered> = Vec::new();
    for dir in search_dirs(config) {
        log::debug!("scanning codec directory {}", dir.display());
        for path in descriptor_files(&dir)? {
            match load_descriptor_file(&path, factories) {
                Ok(entry) => {
                    if found
                        .iter()
                        .any(|e| e.descriptor.name == entry.descriptor.name)
                    {
                        log::warn!(
                            "{}: codec '{}' already registered, skipping",
                            path.display(),
                            entry.descriptor.name
                        );
                        continue;
                    }
                    log::debug!("found codec '{}' in {}", entry.descriptor.name, path.display());
                    found.push(entry);
                }
                Err(e) => log::warn!("{}: skipping descriptor: {e}", path.display()),
            }
        }
    }
    Ok(found)
}

fn descriptor_files(dir: &Path) -> Result<Vec<PathBuf>, CodecError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CodecError::Discovery(alloc::format!("{}: {e}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CodecError::Discovery(alloc::format!("{}: {e}", dir.display())))?;
        let path = entry.path();
        let is_descriptor = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(DESCRIPTOR_SUFFIX));
        if is_descriptor && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one descriptor file and bind it to a linked backend.
///
/// Capabilities always come from the backend; the file supplies identity
/// and matching data.
pub(crate) fn load_descriptor_file(
    path: &Path,
    factories: &[BackendFactory],
) -> Result<Discovered, CodecError> {
    let text = std::fs::read_to_string(path)?;
    parse_descriptor(&text, factories)
}

pub(crate) fn parse_descriptor(
    text: &str,
    factories: &[BackendFactory],
) -> Result<Discovered, CodecError> {
    let file: DescriptorFile =
        serde_json::from_str(text).map_err(|e| CodecError::Discovery(e.to_string()))?;
    if file.layout != DESCRIPTOR_LAYOUT {
        return Err(CodecError::Discovery(alloc::format!(
            "unsupported descriptor layout {}",
            file.layout
        )));
    }
    let factory = *factories
        .iter()
        .find(|f| f.name == file.backend)
        .ok_or_else(|| CodecError::Discovery(alloc::format!("unknown backend '{}'", file.backend)))?;

    let mut descriptor = (factory.describe)();
    descriptor.name = file.name;
    if let Some(description) = file.description {
        descriptor.description = description;
    }
    if !file.magic_numbers.is_empty() {
        descriptor.signatures = file
            .magic_numbers
            .iter()
            .map(|m| Signature::parse(m))
            .collect::<Result<_, _>>()?;
    }
    if !file.extensions.is_empty() {
        descriptor.extensions = file
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
    }
    if !file.mime_types.is_empty() {
        descriptor.mime_types = file.mime_types;
    }
    Ok(Discovered {
        descriptor,
        factory,
    })
}

#[cfg(all(test, feature = "bmp"))]
mod tests {
    use super::*;

    fn factories() -> Vec<BackendFactory> {
        crate::codecs::linked()
    }

    #[test]
    fn descriptor_overrides_identity() {
        let text = r#"{
            "layout": 1,
            "name": "bmp-alt",
            "backend": "bmp",
            "description": "alternate",
            "magic_numbers": ["42 4D", "?? 00 00 00 01"],
            "extensions": [".DIB"],
            "mime_types": ["image/x-bmp"]
        }"#;
        let found = parse_descriptor(text, &factories()).unwrap();
        assert_eq!(found.descriptor.name, "bmp-alt");
        assert_eq!(found.descriptor.signatures.len(), 2);
        assert_eq!(found.descriptor.extensions, ["dib"]);
        assert!(found.descriptor.read_features.output_formats.len() > 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let text = r#"{"layout": 1, "name": "x", "backend": "nope"}"#;
        assert!(matches!(
            parse_descriptor(text, &factories()),
            Err(CodecError::Discovery(_))
        ));
    }

    #[test]
    fn wrong_layout_is_rejected() {
        let text = r#"{"layout": 2, "name": "x", "backend": "bmp"}"#;
        assert!(parse_descriptor(text, &factories()).is_err());
    }
}
