//! Error taxonomy for the agent execution engine.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error (agent specs, skill front-matter)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// History-file persistence error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Streaming/HTTP failure against the model provider, carrying enough
    /// detail to render the user-visible apology message.
    #[error("provider error (status {status:?}): {detail}")]
    Provider {
        status: Option<u16>,
        detail: String,
    },

    /// A tool invocation failed. Fed back to the model as a tool-role
    /// message; never fatal to the loop.
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// The normalizer could not produce valid JSON, or the result failed to
    /// deserialize into the tool's parameter type.
    #[error("unparseable arguments for tool '{name}': {detail}")]
    ArgumentsUnparseable { name: String, detail: String },

    /// The agent loop ran `max_steps_per_run` steps without terminating.
    #[error("max steps per run ({0}) exceeded")]
    MaxStepsReached(u32),

    /// Compaction of the history failed; logged and non-fatal, but exposed
    /// so callers/tests can observe it.
    #[error("compaction failed: {0}")]
    CompactionFailed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn provider(status: Option<u16>, detail: impl Into<String>) -> Self {
        Error::Provider {
            status,
            detail: detail.into(),
        }
    }

    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn arguments_unparseable(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::ArgumentsUnparseable {
            name: name.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Whether this error is the kind of transient failure worth retrying
    /// (network blips, timeouts, 5xx). Used by `retry` and by C1's call path.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) => true,
            Error::Timeout => true,
            Error::Provider { status, .. } => {
                matches!(status, Some(s) if (500..600).contains(s)) || status.is_none()
            }
            Error::Config(_) | Error::InvalidInput(_) => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_provider_retryable() {
        let err = Error::provider(Some(503), "service unavailable");
        assert!(err.is_retryable());
        let err = Error::provider(Some(400), "bad request");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("read_file", "not found");
        assert_eq!(err.to_string(), "tool 'read_file' failed: not found");
    }

    #[test]
    fn test_error_max_steps() {
        let err = Error::MaxStepsReached(50);
        assert_eq!(err.to_string(), "max steps per run (50) exceeded");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }
        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}
