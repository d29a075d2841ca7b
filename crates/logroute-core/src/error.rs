//! Error types for logroute

use thiserror::Error;

/// Configuration-time failure.
///
/// Every variant aborts the whole `configure()` call; nothing from the
/// rejected configuration is committed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Schema violation naming the offending key
    #[error("Problem with logroute configuration: {0}")]
    Invalid(String),

    /// An appender transitively requires itself
    #[error(
        "Problem with logroute configuration: Dependency loop detected for appender {name}. ({})",
        .path.join(" -> ")
    )]
    DependencyLoop {
        /// Appender whose resolution was already in progress
        name: String,
        /// Resolution path ending at the repeated appender
        path: Vec<String>,
    },

    /// An appender factory rejected its configuration
    #[error("Problem with logroute configuration: appender \"{name}\" could not be created: {source}")]
    AppenderBuild {
        /// Name of the appender being built
        name: String,
        /// Error reported by the factory
        #[source]
        source: anyhow::Error,
    },
}

impl ConfigError {
    /// Build an `Invalid` error from anything printable.
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// Result type alias using ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure inside the forwarding transport.
///
/// These never reach a log call site; they are reported through `tracing`.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Socket level failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A write did not complete in time
    #[error("Write timed out after {0} ms")]
    WriteTimeout(u64),

    /// Could not bind the receiving socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to listen on
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The background connection task is gone
    #[error("Forwarding task stopped")]
    TaskStopped,

    /// Frames still buffered when shutdown gave up draining
    #[error("{0} event(s) were not delivered before shutdown")]
    Undelivered(usize),

    /// Network appenders spawn their tasks on the ambient tokio runtime
    #[error("No tokio runtime available to run the forwarding task")]
    NoRuntime,
}

/// Aggregated result of shutting down a generation of appenders.
#[derive(Error, Debug)]
#[error("{failed} appender(s) failed to shut down; first error: {first}")]
pub struct ShutdownError {
    /// Number of appenders whose shutdown hook failed
    pub failed: usize,
    /// First failure observed, in appender order
    pub first: anyhow::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display() {
        let err = ConfigError::invalid("must be an object.");
        assert_eq!(
            format!("{}", err),
            "Problem with logroute configuration: must be an object."
        );
    }

    #[test]
    fn test_dependency_loop_display_names_path() {
        let err = ConfigError::DependencyLoop {
            name: "a".to_string(),
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("Dependency loop detected for appender a."));
        assert!(text.contains("a -> b -> a"));
    }

    #[test]
    fn test_forward_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ForwardError = io_err.into();
        assert!(matches!(err, ForwardError::Io(_)));
    }
}
