//! Per-call request context.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::cancel::CancellationHandle;
use crate::error::Result;

/// Caller-supplied settings for a single execution.
///
/// Headers set here override the ones chosen by the serializer. The
/// context is also visible to every middleware and to the retry policy.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Transport deadline for each attempt.
    pub timeout: Option<Duration>,
    /// Endpoint override for this call.
    pub endpoint: Option<String>,
    /// Cancellation for sync operations. Subscriptions take their handle
    /// as an explicit argument instead.
    pub cancellation: Option<CancellationHandle>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn header(
        mut self,
        name: impl TryInto<HeaderName, Error: Into<http::Error>>,
        value: impl TryInto<HeaderValue, Error: Into<http::Error>>,
    ) -> Result<Self> {
        let name = name
            .try_into()
            .map_err(|e| crate::ClientError::Serialization(format!("invalid header name: {}", e.into())))?;
        let value = value
            .try_into()
            .map_err(|e| crate::ClientError::Serialization(format!("invalid header value: {}", e.into())))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Add a `Bearer` authorization header.
    pub fn bearer_token(self, token: &str) -> Result<Self> {
        self.header(http::header::AUTHORIZATION, format!("Bearer {token}"))
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send this call to a different endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attach a cancellation handle to a sync call.
    pub fn cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}
