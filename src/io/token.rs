//! The persisted auth token.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::io::config_io::ConfigError;

/// Environment variable that overrides the token file
pub const TOKEN_ENV: &str = "TASKNEST_TOKEN";

pub const TOKEN_FILE: &str = ".tasknest-token";

/// The token file sits next to the config file
pub fn token_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(TOKEN_FILE),
        _ => PathBuf::from(TOKEN_FILE),
    }
}

/// `$TASKNEST_TOKEN`, else the token file
pub fn load_token(config_path: &Path) -> Result<Option<String>, ConfigError> {
    if let Ok(token) = std::env::var(TOKEN_ENV)
        && !token.trim().is_empty()
    {
        return Ok(Some(token.trim().to_string()));
    }
    read_token_file(&token_path(config_path))
}

pub fn read_token_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let token = text.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn save_token(path: &Path, token: &str) -> Result<(), ConfigError> {
    atomic_write(path, format!("{}\n", token.trim()).as_bytes()).map_err(|e| {
        ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Remove the token file. Returns whether there was one.
pub fn clear_token(path: &Path) -> Result<bool, ConfigError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Write `content` to `path` through a temp file in the same directory, so
/// a crash never leaves a half-written token.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
