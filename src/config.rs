//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! data_dir = "/var/lib/kgsync"
//!
//! [triple_store]
//! kind = "http"
//! query_url = "http://localhost:3030/{space}/query"
//! update_url = "http://localhost:3030/{space}/update"
//!
//! [triple_store.credentials]
//! kind = "basic"
//! username = "admin"
//! password = "secret"
//!
//! [write]
//! mirror_retries = 1
//! ```
//!
//! Every section is optional; an empty file is a valid in-memory setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::triplestore::{DEFAULT_INSERT_CHUNK, HttpTripleStoreConfig};
use crate::unit::UnitSchema;
use crate::unit::discovery::DEFAULT_MAX_DEPTH;

/// Which triple store the engine mirrors into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripleStoreConfig {
    /// Oxigraph in-process. `dir` defaults to `<data_dir>/triplestore`, or
    /// memory when there is no data directory either.
    Embedded {
        #[serde(default)]
        dir: Option<PathBuf>,
    },
    Http(HttpTripleStoreConfig),
}

impl Default for TripleStoreConfig {
    fn default() -> Self {
        TripleStoreConfig::Embedded { dir: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum edge depth below a unit root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Synchronous mirror retries before a write is reported degraded.
    #[serde(default)]
    pub mirror_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncConfig {
    /// Quads per `INSERT DATA` request during a full resync.
    #[serde(default = "default_insert_chunk")]
    pub insert_chunk: usize,
    /// Run the background resync worker.
    #[serde(default)]
    pub worker: bool,
    /// Seconds between sweeps of degraded spaces.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_insert_chunk() -> usize {
    DEFAULT_INSERT_CHUNK
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            insert_chunk: default_insert_chunk(),
            worker: false,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Top-level configuration for [`SyncEngine`](crate::engine::SyncEngine).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where the relational database (and the embedded triple store) live.
    /// `None` keeps everything in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub triple_store: TripleStoreConfig,
    #[serde(default)]
    pub schema: UnitSchema,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub resync: ResyncConfig,
}

impl EngineConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.discovery.max_depth == 0 {
            return invalid("discovery.max_depth must be at least 1");
        }
        if self.resync.insert_chunk == 0 {
            return invalid("resync.insert_chunk must be at least 1");
        }
        if self.resync.sweep_interval_secs == 0 {
            return invalid("resync.sweep_interval_secs must be at least 1");
        }
        if let TripleStoreConfig::Http(http) = &self.triple_store {
            for (name, url) in [("query_url", &http.query_url), ("update_url", &http.update_url)] {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        message: format!("triple_store.{name} must be an http(s) URL, got {url:?}"),
                    });
                }
            }
            if http.timeout_secs == 0 {
                return invalid("triple_store.timeout_secs must be at least 1");
            }
        }
        self.schema.validate()
    }

    /// Directory for the embedded triple store, if it persists.
    pub fn embedded_dir(&self) -> Option<PathBuf> {
        match &self.triple_store {
            TripleStoreConfig::Embedded { dir: Some(dir) } => Some(dir.clone()),
            TripleStoreConfig::Embedded { dir: None } => {
                self.data_dir.as_ref().map(|d| d.join("triplestore"))
            }
            TripleStoreConfig::Http(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triplestore::Credentials;

    #[test]
    fn empty_file_is_default() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.max_depth, 64);
        assert_eq!(config.resync.insert_chunk, 5_000);
        assert_eq!(config.embedded_dir(), None);
    }

    #[test]
    fn http_section_with_credentials() {
        let config: EngineConfig = toml::from_str(
            r#"
            [triple_store]
            kind = "http"
            query_url = "http://localhost:3030/{space}/query"
            update_url = "http://localhost:3030/{space}/update"

            [triple_store.credentials]
            kind = "static_bearer"
            token = "abc"

            [write]
            mirror_retries = 2
            "#,
        )
        .unwrap();
        let TripleStoreConfig::Http(http) = &config.triple_store else {
            panic!("expected http triple store");
        };
        assert_eq!(
            http.credentials,
            Credentials::StaticBearer {
                token: "abc".into()
            }
        );
        assert_eq!(config.write.mirror_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.discovery.max_depth = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.triple_store = TripleStoreConfig::Http(HttpTripleStoreConfig::new("ftp://x", "http://y"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = EngineConfig::default();
        config.schema.inner_marker = config.schema.outer_marker.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrip_through_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("kgsync.toml");
        let config = EngineConfig {
            data_dir: Some(tmp.path().join("data")),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.embedded_dir(), Some(tmp.path().join("data").join("triplestore")));
    }

    #[test]
    fn load_reports_parse_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "data_dir = [").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            EngineConfig::load(&tmp.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
