//! Error types for the store client.

use std::fmt;

/// Errors raised while building a [`StoreConfig`](crate::StoreConfig).
///
/// These are fatal and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required store setting: {0}")]
    Missing(&'static str),

    #[error("Invalid store setting {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("Config source error: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached, or the connection dropped mid-command.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// No pooled connection could be checked out.
    #[error("Pool error: {message}")]
    Pool {
        /// Description of the pool error.
        message: String,
    },

    /// The store rejected or failed a command.
    #[error("Command error: {message}")]
    Command {
        /// Description of the command error.
        message: String,
    },

    /// The connection is attached to a read-only replica.
    #[error("Read-only replica: {message}")]
    ReadOnly {
        /// Server message.
        message: String,
    },

    /// The backend cannot execute the requested script.
    #[error("Unsupported script: {name}")]
    UnsupportedScript {
        /// Script name.
        name: String,
    },

    /// The store has been shut down or is simulated offline.
    #[error("Store unavailable")]
    Unavailable,
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Returns `true` for failures that a reconnect may cure.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Pool { .. } | Self::ReadOnly { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::Pool { .. } | Self::Unavailable => {
                ErrorCategory::Connectivity
            }
            Self::ReadOnly { .. } => ErrorCategory::Topology,
            Self::Command { .. } => ErrorCategory::Command,
            Self::UnsupportedScript { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.kind() == redis::ErrorKind::ReadOnly {
            Self::ReadOnly {
                message: e.to_string(),
            }
        } else if e.is_io_error()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || e.is_timeout()
        {
            Self::connection(e.to_string())
        } else {
            Self::command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::pool(e.to_string())
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store unreachable or pool exhausted.
    Connectivity,
    /// Replica/primary topology changed underneath the connection.
    Topology,
    /// The store rejected the command.
    Command,
    /// Programming error on our side.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Topology => write!(f, "topology"),
            Self::Command => write!(f, "command"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::connection("refused");
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = ConfigError::Missing("REDIS_HOST");
        assert_eq!(err.to_string(), "Missing required store setting: REDIS_HOST");
    }

    #[test]
    fn test_readonly_classification() {
        let err: StoreError = redis::RedisError::from((
            redis::ErrorKind::ReadOnly,
            "You can't write against a read only replica.",
        ))
        .into();
        assert!(matches!(err, StoreError::ReadOnly { .. }));
        assert!(err.is_connection());
        assert_eq!(err.category(), ErrorCategory::Topology);
    }

    #[test]
    fn test_command_errors_are_not_retryable() {
        let err: StoreError =
            redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type")).into();
        assert!(!err.is_connection());
        assert_eq!(err.category(), ErrorCategory::Command);
        assert!(!StoreError::Unavailable.is_connection());
    }
}
