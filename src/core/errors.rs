use crate::graph::TaskId;
use crate::location::LocationId;
use thiserror::Error;

/// Unified error type for the runtime
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Payload encoding/decoding errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A peer location can no longer be addressed
    #[error("Location {location} is unreachable")]
    Unreachable { location: LocationId },

    /// Another location failed and the job was torn down
    #[error("Job aborted by location {origin}: {reason}")]
    Aborted { origin: LocationId, reason: String },

    /// A work callable returned an error
    #[error("Task {task} failed on location {location}")]
    TaskFailed {
        task: TaskId,
        location: LocationId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Global quiescence was reached with local tasks still unexecuted
    #[error("Location {location} reached quiescence with {pending} unexecuted task(s)")]
    Incomplete { location: LocationId, pending: usize },

    /// The fence did not converge within the configured number of rounds
    #[error("Fence did not converge after {rounds} rounds")]
    FenceDiverged { rounds: u64 },

    /// Too many nested blocking calls pumping messages
    #[error("Message pump depth {depth} exceeds limit {limit}")]
    PumpDepthExceeded { depth: usize, limit: usize },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TesseraError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create a task failure from the error returned by a work callable
    pub fn task_failed(task: TaskId, location: LocationId, source: anyhow::Error) -> Self {
        Self::TaskFailed {
            task,
            location,
            source: source.into(),
        }
    }

    /// Create an abort error
    pub fn aborted<S: Into<String>>(origin: LocationId, reason: S) -> Self {
        Self::Aborted {
            origin,
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error was caused by another location rather than this one
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Unreachable { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
            Self::Unreachable { .. } => "unreachable",
            Self::Aborted { .. } => "aborted",
            Self::TaskFailed { .. } => "task",
            Self::Incomplete { .. } => "incomplete",
            Self::FenceDiverged { .. } => "fence",
            Self::PumpDepthExceeded { .. } => "pump",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TesseraError>;

impl From<bincode::Error> for TesseraError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for TesseraError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}
