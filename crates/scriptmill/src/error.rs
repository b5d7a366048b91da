//! Error types for scriptmill.

use std::path::PathBuf;

use scriptmill_engine::EngineError;

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the on-disk script store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid script name '{0}'")]
    InvalidName(String),

    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from script lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Script already running: {0}")]
    AlreadyRunning(String),

    #[error("Script not running: {0}")]
    NotRunning(String),

    #[error("No host runtime available")]
    RuntimeUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to spawn execution unit for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shutdown timed out with {0} script(s) still running")]
    ShutdownTimeout(usize),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

// ─────────────────────────────────────────────────────────────────────────────
// Host
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the host bridge
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("Host runtime is no longer accepting tasks")]
    Closed,
}

pub type HostResult<T> = Result<T, HostError>;

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Errors while loading `scriptmill.toml`
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Errors while parsing a `script ...` command line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Usage: script <list|exec|stop|reload> [name]")]
    Empty,

    #[error("Unknown subcommand: {0}")]
    Unknown(String),

    #[error("Usage: script {0} <name>")]
    MissingName(&'static str),
}

/// Failure of a single script execution, as reported to the host.
#[derive(Debug, thiserror::Error)]
#[error("Script error in {name}: {source}")]
pub struct ScriptFailure {
    pub name: String,
    #[source]
    pub source: EngineError,
}
