//! Top-level error type for the filter daemon.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::control::ControlError;
use crate::filter::LoadError;

/// Errors that stop the daemon from starting or the control command
/// from completing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load blocklist: {0}")]
    Load(#[from] LoadError),

    #[error("socket setup failed for {path:?}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("control error: {0}")]
    Control(#[from] ControlError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Invalid operator-supplied settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    #[error("invalid socket mode {0:?}, expected octal like 660")]
    InvalidMode(String),

    #[error("socket path {0:?} has no parent directory")]
    InvalidSocketPath(PathBuf),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
