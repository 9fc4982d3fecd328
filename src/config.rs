use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::options::SyncOptions;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub destination: Option<PathBuf>,
    pub options: SyncOptions,
    /// Program used for both the availability probe and the copies.
    pub tool: PathBuf,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: None,
            options: SyncOptions::recommended(),
            tool: PathBuf::from("rsync"),
            debug: false,
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("com", "example", "Copier").ok_or(ConfigError::NoProjectDir)
}

impl Config {
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.config_dir().join("config.json"))
    }

    pub fn log_file() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.data_dir().join("copier.log"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// A missing file is not an error; it yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(io_err)
    }
}
