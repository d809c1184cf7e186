//! Error types for flake triage.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the triage pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The input report could not be found or opened.
    #[error("Report not found: {path}")]
    ReportNotFound { path: String },

    /// The input report is not a JSON array of objects.
    #[error("Malformed report: {0}")]
    MalformedReport(String),

    /// The classification oracle could not be reached or refused the request.
    #[error("Oracle unavailable: {oracle}: {message}")]
    OracleUnavailable { oracle: String, message: String },

    /// The oracle answered, but the answer could not be repaired into an assessment.
    #[error("Oracle returned a malformed response: {0}")]
    OracleMalformedResponse(String),

    /// The retry command could not be started.
    #[error("Executor invocation failed: {command}: {message}")]
    ExecutorInvocation { command: String, message: String },

    /// A pipeline stage was invoked before the stage it depends on.
    #[error("Stage '{stage}' has not run yet; run it before '{requested}'")]
    PrerequisiteMissing {
        stage: &'static str,
        requested: &'static str,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] Box<reqwest::Error>),
}

impl Error {
    /// Create a malformed report error.
    pub fn malformed_report(message: impl Into<String>) -> Self {
        Self::MalformedReport(message.into())
    }

    /// Create an oracle-unavailable error.
    pub fn oracle_unavailable(oracle: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OracleUnavailable {
            oracle: oracle.into(),
            message: message.into(),
        }
    }

    /// Create a malformed oracle response error.
    pub fn oracle_malformed(message: impl Into<String>) -> Self {
        Self::OracleMalformedResponse(message.into())
    }

    /// Create an executor invocation error.
    pub fn executor(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutorInvocation {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_message_names_both_stages() {
        let err = Error::PrerequisiteMissing {
            stage: "classify",
            requested: "retry",
        };
        let msg = err.to_string();
        assert!(msg.contains("'classify'"), "{msg}");
        assert!(msg.contains("'retry'"), "{msg}");
    }

    #[test]
    fn io_error_converts_boxed() {
        let err: Error = std::io::Error::other("disk gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
