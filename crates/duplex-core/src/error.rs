//! Error types for collaborator calls and configuration.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for calls through the collaborator ports.
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors raised by external collaborators (cloud queries, infra tools,
/// external actions, the history log).
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("infrastructure state is locked: {0}")]
    Locked(String),

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {what}: {message}")]
    Parse { what: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl InfraError {
    /// Whether this error means the authoritative state is held by
    /// another operation (lock contention or its timeout symptom).
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, InfraError::Locked(_) | InfraError::Timeout { .. })
    }
}

/// Errors loading or validating `duplex.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
