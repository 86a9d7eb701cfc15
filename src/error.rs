//! Error types for monaco-kit

use thiserror::Error;

use crate::models::providers::Capability;

pub type KitResult<T> = std::result::Result<T, KitError>;

#[derive(Debug, Error)]
pub enum KitError {
    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Plugin(#[from] PluginError),

    #[error("{0}")]
    Worker(#[from] WorkerError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Engine bootstrap failures. Cloned to every waiter of a shared load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Failed to load editor engine: {0}")]
    Failed(String),

    #[error("Engine not found at {0}")]
    NotFound(String),

    #[error("Engine load cancelled")]
    Cancelled,

    #[error("Engine load task aborted before publishing a result")]
    Aborted,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin id must not be empty")]
    InvalidId,

    #[error("Plugin '{0}' is already registered")]
    DuplicateId(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin '{plugin}' depends on '{dependency}', which was not requested")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Dependency cycle between plugins: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Invalid config for plugin '{plugin}': {message}")]
    InvalidConfig { plugin: String, message: String },

    #[error("Plugin '{name}' failed to install: {reason}")]
    InstallFailed { name: String, reason: String },
}

impl PluginError {
    pub fn install_failed(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InstallFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config(plugin: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start worker '{label}': {reason}")]
    SpawnFailed { label: String, reason: String },

    #[error("No worker registered with label '{0}'")]
    NotRegistered(String),

    #[error("No worker provides '{capability}' for language '{language}'")]
    NoProvider {
        language: String,
        capability: Capability,
    },

    #[error("Worker '{label}' terminated")]
    Terminated { label: String },

    #[error("Worker '{label}' timed out on '{method}'")]
    Timeout { label: String, method: String },

    #[error("Worker error [{code}]: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn spawn_failed(label: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SpawnFailed {
            label: label.into(),
            reason: reason.to_string(),
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            Self::ServerError { code, .. } => *code,
            Self::Terminated { .. } => -32099,
            Self::Timeout { .. } => -32001,
            Self::SpawnFailed { .. } => -32003,
            Self::NoProvider { .. } => -32601,
            _ => -32000,
        }
    }

    /// Errors after which a later request may succeed without re-registering.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ServerError { .. })
    }

    /// The worker label involved, when the error is tied to one worker.
    pub fn affected_label(&self) -> Option<&str> {
        match self {
            Self::SpawnFailed { label, .. }
            | Self::Terminated { label }
            | Self::Timeout { label, .. } => Some(label),
            Self::NotRegistered(label) => Some(label),
            _ => None,
        }
    }
}

impl From<crate::infra::worker::protocol::RpcError> for WorkerError {
    fn from(err: crate::infra::worker::protocol::RpcError) -> Self {
        Self::ServerError {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failure_is_not_recoverable() {
        let err = WorkerError::spawn_failed("graphql", "script not found");
        assert!(!err.is_recoverable());
        assert_eq!(err.affected_label(), Some("graphql"));
        assert_eq!(err.error_code(), -32003);
        assert!(err.to_string().contains("script not found"));
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = WorkerError::Timeout {
            label: "prettier".to_string(),
            method: "provideDocumentFormattingEdits".to_string(),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), -32001);
    }

    #[test]
    fn test_rpc_error_conversion() {
        let rpc = crate::infra::worker::protocol::RpcError::new(-32601, "Method not found");
        let err = WorkerError::from(rpc);
        assert_eq!(err.error_code(), -32601);
        assert!(err.affected_label().is_none());
    }

    #[test]
    fn test_dependency_cycle_message() {
        let err = PluginError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle between plugins: a -> b -> a");
    }

    #[test]
    fn test_load_error_cancelled() {
        assert!(LoadError::Cancelled.is_cancelled());
        assert!(!LoadError::Failed("network".into()).is_cancelled());
    }
}
