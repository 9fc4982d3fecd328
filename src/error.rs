use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::AppStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no per-user configuration directory available")]
    NoProjectDir,
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("'{0}' not found. Is it installed and in your PATH?")]
    NotFound(PathBuf),
    #[error("'{program} --version' exited with {code:?}")]
    Failed { program: PathBuf, code: Option<i32> },
    #[error("'{program} --version' did not answer within {timeout:?}")]
    TimedOut { program: PathBuf, timeout: Duration },
    #[error("could not run '{program}': {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a run/resume request was turned down.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunBlocked {
    #[error("the sync tool is not available")]
    ToolUnavailable,
    #[error("no source files/folders added")]
    NoSources,
    #[error("destination path must be set")]
    NoDestination,
    #[error("a batch is already running")]
    Busy,
    #[error("cannot start while {0}")]
    Status(AppStatus),
}
