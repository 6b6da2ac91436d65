//! Typed failures for the config / music data subsystem
//!
//! Every fallible operation of the session reports one of these. Nothing here
//! aborts the process; the IPC layer turns them into `Response::Error`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Persistence gateway failures, classified by cause
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed document {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize document for {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Classify an I/O failure on `path`
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path },
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied { path, source },
            _ => StoreError::Io { path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::Malformed { .. })
    }
}

/// Point mutations on the current music data
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MusicDataError {
    #[error("no music data is loaded")]
    NoMusicData,

    #[error("song '{0}' not found in music data")]
    SongNotFound(String),

    #[error("loop sample {0} is out of range")]
    LoopOutOfRange(i64),
}

/// Game registry and app config failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no game is selected")]
    NoGameSelected,

    #[error("game '{0}' is not configured")]
    GameNotFound(String),

    #[error("'{0}' is not a known theme")]
    InvalidTheme(String),

    #[error("game support unavailable: {0}")]
    SupportUnavailable(String),

    #[error("tool '{tool}' for game '{game}' is not listed in dependencies")]
    ToolNotFound { tool: String, game: String },

    #[error("path for tool '{0}' is not set in dependencies")]
    ToolPathMissing(String),

    #[error("converter path is not set in dependencies")]
    ConverterPathMissing,

    #[error("no music data path is set for '{0}'")]
    MusicDataPathMissing(String),

    #[error("converter has no game flag for '{0}'")]
    GameFlagMissing(String),

    #[error("converter has no encoded format for '{0}'")]
    EncodedFormatMissing(String),

    #[error("no game directory is set for '{0}'")]
    GameDirectoryMissing(String),

    #[error("extracting original music is not supported for '{0}'")]
    ExtractUnsupported(String),
}

/// Preset merge failures; the music data is left untouched
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset is for '{preset}' but the current game is '{current}'")]
    WrongGame { preset: String, current: String },

    #[error("invalid preset: {0}")]
    Invalid(String),

    #[error("no default music data for '{0}'")]
    DefaultMissing(String),

    #[error("no music data is loaded")]
    NoMusicData,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Anything a session operation can fail with
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    MusicData(#[from] MusicDataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Preset(#[from] PresetError),
}
