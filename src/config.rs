//! Node Configuration File
//!
//! The storage backend is chosen by a small JSON file, read once at
//! startup:
//!
//! ```text
//! { "dataStruct": "BPTree" }      ordered B+Tree index
//! { "dataStruct": "Map" }         hash index
//! ```
//!
//! Unknown keys are ignored. A missing file, a missing `dataStruct` or an
//! unrecognised backend name is fatal: the node refuses to start.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::storage::{Backend, UnknownBackend};

/// Where the node looks for its configuration by default.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// The key that selects the storage backend.
pub const BACKEND_KEY: &str = "dataStruct";

/// Errors that occur while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {} has no \"dataStruct\" entry", path.display())]
    MissingBackend { path: PathBuf },

    #[error(transparent)]
    UnknownBackend(#[from] UnknownBackend),
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "dataStruct")]
    data_struct: Option<String>,
}

/// Parses configuration text and returns the selected backend.
pub fn parse_backend(text: &str, path: &Path) -> Result<Backend, ConfigError> {
    let file: ConfigFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let name = file.data_struct.ok_or_else(|| ConfigError::MissingBackend {
        path: path.to_path_buf(),
    })?;
    Ok(name.parse()?)
}

/// Reads the configuration file at `path` and returns the selected backend.
pub fn load_backend(path: impl AsRef<Path>) -> Result<Backend, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let backend = parse_backend(&text, path)?;
    debug!(path = %path.display(), %backend, "Loaded configuration");
    Ok(backend)
}
