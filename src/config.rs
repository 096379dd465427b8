//! Unpacker configuration, loadable from a TOML `[replica]` section.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of transactions applied per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Configuration of a [`crate::CommittingResponseUnpacker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnpackerConfig {
    /// Transactions queued before a batch is applied.
    pub max_batch_size: usize,
    /// Time the primary quarantines deleted ids before reusing them.
    pub id_reuse_safe_zone: Duration,
}

impl Default for UnpackerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            id_reuse_safe_zone: Duration::ZERO,
        }
    }
}

impl UnpackerConfig {
    /// Sets the batch size.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the id-reuse safe zone.
    pub fn id_reuse_safe_zone(mut self, window: Duration) -> Self {
        self.id_reuse_safe_zone = window;
        self
    }

    /// Replaces unusable values with the smallest usable ones.
    pub fn normalize(mut self) -> Self {
        if self.max_batch_size == 0 {
            self.max_batch_size = 1;
        }
        self
    }

    /// Parses the `[replica]` section of a TOML document; missing keys keep defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })?;
        Ok(raw.replica.into_config())
    }

    /// Loads the configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        Ok(raw.replica.into_config())
    }

    /// Renders the configuration as a TOML document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let raw = RawConfig {
            replica: ReplicaSection {
                max_batch_size: Some(self.max_batch_size),
                id_reuse_safe_zone_ms: Some(
                    self.id_reuse_safe_zone.as_millis().min(u64::MAX as u128) as u64,
                ),
            },
        };
        toml::to_string_pretty(&raw).map_err(|source| ConfigError::Serialize { source })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    replica: ReplicaSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ReplicaSection {
    max_batch_size: Option<usize>,
    id_reuse_safe_zone_ms: Option<u64>,
}

impl ReplicaSection {
    fn into_config(self) -> UnpackerConfig {
        let defaults = UnpackerConfig::default();
        UnpackerConfig {
            max_batch_size: self.max_batch_size.unwrap_or(defaults.max_batch_size),
            id_reuse_safe_zone: self
                .id_reuse_safe_zone_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.id_reuse_safe_zone),
        }
        .normalize()
    }
}

/// Failures while loading or rendering the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read replica config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The document is not valid TOML for this schema.
    #[error("failed to parse replica config{}: {source}", display_path(.path))]
    Parse {
        /// File path, when loaded from disk.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The configuration could not be rendered.
    #[error("failed to serialize replica config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| format!(" {}", path.display()))
        .unwrap_or_default()
}
