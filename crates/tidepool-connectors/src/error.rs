//! Typed errors for the connectors crate.

use std::fmt;

use tidepool_core::ExtractError;

/// Errors that can occur in source and store connectors.
#[derive(Debug)]
pub enum ConnectorError {
    /// Failed to reach the remote service.
    ConnectionFailed(String),
    /// Credentials were missing, invalid or rejected.
    AuthFailed(String),
    /// A query against the source failed.
    QueryFailed(String),
    /// An asynchronous warehouse job finished with an error.
    JobFailed(String),
    /// The service answered with a body we could not interpret.
    UnexpectedResponse(String),
    /// The URI scheme is not supported by any connector.
    UnsupportedUri(String),
    /// Invalid or missing configuration.
    ConfigError(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            ConnectorError::AuthFailed(msg) => write!(f, "authentication failed: {}", msg),
            ConnectorError::QueryFailed(msg) => write!(f, "query failed: {}", msg),
            ConnectorError::JobFailed(msg) => write!(f, "job failed: {}", msg),
            ConnectorError::UnexpectedResponse(msg) => write!(f, "unexpected response: {}", msg),
            ConnectorError::UnsupportedUri(msg) => write!(f, "unsupported URI: {}", msg),
            ConnectorError::ConfigError(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<anyhow::Error> for ConnectorError {
    fn from(e: anyhow::Error) -> Self {
        ConnectorError::QueryFailed(e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ConnectorError::UnexpectedResponse(e.to_string())
        } else {
            ConnectorError::ConnectionFailed(e.to_string())
        }
    }
}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(_) | sqlx::Error::ColumnNotFound(_) => {
                ConnectorError::QueryFailed(e.to_string())
            }
            _ => ConnectorError::ConnectionFailed(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::UnexpectedResponse(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for ConnectorError {
    fn from(e: arrow::error::ArrowError) -> Self {
        ConnectorError::UnexpectedResponse(e.to_string())
    }
}

impl From<object_store::Error> for ConnectorError {
    fn from(e: object_store::Error) -> Self {
        ConnectorError::ConnectionFailed(e.to_string())
    }
}

impl From<ConnectorError> for ExtractError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::ConfigError(msg) | ConnectorError::UnsupportedUri(msg) => {
                ExtractError::Config(msg)
            }
            other => ExtractError::SourceUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_become_source_unavailable() {
        let err: ExtractError = ConnectorError::AuthFailed("token expired".to_string()).into();
        match err {
            ExtractError::SourceUnavailable(msg) => {
                assert_eq!(msg, "authentication failed: token expired")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_config_errors_stay_config() {
        let err: ExtractError = ConnectorError::ConfigError("missing project".to_string()).into();
        assert!(matches!(err, ExtractError::Config(_)));
    }
}
