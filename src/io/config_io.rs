use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::model::config::ClientConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TASKNEST_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tasknest.toml";

/// Error type for config and token file I/O
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// `explicit`, else `env`, else `tasknest.toml` in the working directory
pub fn resolve_config_path(explicit: Option<&Path>, env: Option<String>) -> PathBuf {
    match (explicit, env) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(env)) if !env.trim().is_empty() => PathBuf::from(env),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Where the config lives for this process
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    resolve_config_path(explicit, std::env::var(CONFIG_ENV).ok())
}

pub fn parse_config(text: &str) -> Result<ClientConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Read the config at `path`. A missing file means all defaults.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ClientConfig::default()),
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    parse_config(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}
