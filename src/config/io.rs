use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use serde_json;

use crate::config::types::Config;
use crate::error::ConfigError;

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "jiband", "jiband-link")
}

// creates a path to <exe>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\foo.exe => F:\foo.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to jiband-link.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("jiband-link.json"))
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    /// Uses `path` if given, otherwise the portable config next to the executable if it exists,
    /// otherwise the per-user config directory.
    pub fn new(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        Ok(ConfigIO { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = File::open(&self.path).await?;
        info!("Reading config file {}", self.path.to_string_lossy());

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(config.validate())
    }

    /// Like `read`, but a missing file yields the defaults.
    pub async fn read_or_default(&self) -> Result<Config, ConfigError> {
        match self.read().await {
            Ok(config) => Ok(config),
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, using defaults");
                Ok(Config::default())
            },
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let io = ConfigIO::new(Some(dir.path().join("absent.json"))).unwrap();

        assert!(io.read().await.unwrap_err().is_file_not_found_error());
        assert_eq!(io.read_or_default().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "livenessIntervalMs": 0, "scanDurationMs": 1500 }"#).unwrap();

        let config = ConfigIO::new(Some(path)).unwrap().read().await.unwrap();
        assert_eq!(config.scan_duration_ms, 1500);
        assert_eq!(config.liveness_interval_ms, Config::default().liveness_interval_ms);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();

        let err = ConfigIO::new(Some(path)).unwrap().read_or_default().await.unwrap_err();
        assert!(matches!(err, ConfigError::JsonError { .. }));
    }
}
