//! Configuration for the choraleia server: YAML config and model definitions
//! under `~/.choraleia/` (single place for all paths).
//!
//! - `config.yaml` holds the server section (`server.host`, `server.port`).
//! - `models.json` holds the model definition list (see [`models`]).
//! - `choraleia.db` is the SQLite database file.
//!
//! Missing files fall back to defaults; malformed files are load errors so
//! the binary can exit 1 at startup rather than serve half-configured.

pub mod models;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use models::{find_model, load_models, LlmModelConfig, ModelCapabilities, ModelLimits};

/// Directory name under the home directory.
const APP_DIR: &str = ".choraleia";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("home directory not resolvable")]
    NoHome,
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// `server` section of `config.yaml`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

/// Top-level `config.yaml` shape.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ChoraleiaConfig {
    pub server: ServerConfig,
}

impl ChoraleiaConfig {
    /// Loads from the default path (`~/.choraleia/config.yaml`); a missing
    /// file yields defaults.
    pub fn load_default() -> Result<Self, LoadError> {
        Self::load_from(config_file_path()?)
    }

    /// Loads from an explicit path; a missing file yields defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(ChoraleiaConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// `host:port` bind address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// `~/.choraleia`, created on demand by callers that write into it.
pub fn app_dir() -> Result<PathBuf, LoadError> {
    let home = dirs::home_dir().ok_or(LoadError::NoHome)?;
    Ok(home.join(APP_DIR))
}

pub fn config_file_path() -> Result<PathBuf, LoadError> {
    Ok(app_dir()?.join("config.yaml"))
}

pub fn models_file_path() -> Result<PathBuf, LoadError> {
    Ok(app_dir()?.join("models.json"))
}

pub fn db_file_path() -> Result<PathBuf, LoadError> {
    Ok(app_dir()?.join("choraleia.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ChoraleiaConfig::load_from(dir.path().join("config.yaml")).unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 8088);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 9999\n").unwrap();
        let cfg = ChoraleiaConfig::load_from(&path).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9999");
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: [not a map\n").unwrap();
        let err = ChoraleiaConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }
}
