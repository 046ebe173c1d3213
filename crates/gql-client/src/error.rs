//! Error types for the GraphQL client.

use serde_json::Value;
use thiserror::Error;

use crate::response::GraphQLError;

/// Errors produced while executing a GraphQL operation.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Variables could not be encoded, or the chosen serializer cannot
    /// represent them.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The transport failed to deliver the request or read the response.
    #[error("transport error: {0}")]
    Transport(String),

    /// An endpoint URL could not be parsed.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// The transport gave up waiting for the server.
    #[error("request timed out")]
    Timeout,

    /// A non-success status whose body was not a GraphQL response.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },

    /// The server answered with a GraphQL `errors` array.
    #[error("GraphQL errors: {}", serialize_errors(.errors))]
    GraphQL {
        /// The errors reported by the server.
        errors: Vec<GraphQLError>,
        /// Partial data returned alongside the errors, if any.
        data: Option<Value>,
    },

    /// The `data` payload did not match the operation's result type.
    #[error("result validation failed: {0}")]
    Validation(String),

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// The initial subscription response was not an event stream.
    #[error("subscription rejected with HTTP {status} ({}): {body}", .content_type.as_deref().unwrap_or("no content type"))]
    SubscriptionFraming {
        /// The HTTP status code.
        status: u16,
        /// The `Content-Type` header, if present.
        content_type: Option<String>,
        /// The response body text.
        body: String,
    },

    /// A middleware failed or broke a pipeline invariant.
    #[error("middleware error: {0}")]
    Middleware(String),

    /// The cancellation handle fired before a response arrived.
    #[error("operation was cancelled")]
    Cancelled,
}

impl ClientError {
    /// Create a middleware error from any displayable message.
    pub fn middleware(message: impl std::fmt::Display) -> Self {
        Self::Middleware(message.to_string())
    }

    /// Whether the failure is transient and worth another attempt.
    ///
    /// Transport failures, timeouts, `429 Too Many Requests` and 5xx
    /// statuses are considered transient. Used by
    /// [`BackoffRetry`](crate::retry::BackoffRetry); the executor itself
    /// leaves every decision to the configured policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// The GraphQL errors carried by this error, if any.
    pub fn graphql_errors(&self) -> Option<&[GraphQLError]> {
        match self {
            Self::GraphQL { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

fn serialize_errors(errors: &[GraphQLError]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| {
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    })
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Transport(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for ClientError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::Serialization(format!("invalid header value: {err}"))
    }
}

impl From<http::header::InvalidHeaderName> for ClientError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::Serialization(format!("invalid header name: {err}"))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
