//! Response parsers.
//!
//! A parser turns a [`WireResponse`] into the JSON `data` payload (sync
//! operations) or into a lazy stream of payloads (subscriptions). Decoding
//! the payload into the operation's result type happens in the executor.

mod sse;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::cancel::CancellationHandle;
use crate::error::{ClientError, Result};
use crate::operation::OperationDescriptor;
use crate::response::{Envelope, GraphQLError};
use crate::wire::WireResponse;

/// A stream of subscription `data` payloads.
pub type EventStream = BoxStream<'static, Result<Value>>;

/// Turns wire responses into GraphQL `data` payloads.
pub trait ResponseParser: Send + Sync {
    /// Parse the response of a query or mutation.
    fn parse_sync<'a>(
        &'a self,
        operation: &'a OperationDescriptor,
        response: WireResponse,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Validate the initial response of a subscription and return its event
    /// stream.
    ///
    /// The stream must end as soon as `cancellation` fires.
    fn parse_subscription<'a>(
        &'a self,
        operation: &'a OperationDescriptor,
        response: WireResponse,
        cancellation: CancellationHandle,
    ) -> BoxFuture<'a, Result<EventStream>>;
}

/// Decides what happens when a response carries GraphQL `errors`.
///
/// Returning `Ok(data)` continues with `data` as the payload to decode;
/// returning `Err` fails the attempt.
pub trait ErrorHandler: Send + Sync {
    /// Handle a non-empty error list and the `data` that came with it.
    fn on_errors(
        &self,
        operation: &OperationDescriptor,
        errors: Vec<GraphQLError>,
        data: Option<Value>,
    ) -> Result<Value>;
}

/// Fails with [`ClientError::GraphQL`] whenever errors are present.
///
/// Partial data is kept on the error rather than returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaiseOnErrors;

impl ErrorHandler for RaiseOnErrors {
    fn on_errors(
        &self,
        _operation: &OperationDescriptor,
        errors: Vec<GraphQLError>,
        data: Option<Value>,
    ) -> Result<Value> {
        Err(ClientError::GraphQL { errors, data })
    }
}

/// Returns partial data when the server sent any, and raises otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptPartialData;

impl ErrorHandler for AcceptPartialData {
    fn on_errors(
        &self,
        operation: &OperationDescriptor,
        errors: Vec<GraphQLError>,
        data: Option<Value>,
    ) -> Result<Value> {
        match data {
            Some(data) if !data.is_null() => {
                tracing::debug!(
                    target: "gql_client::parser",
                    operation = operation.name(),
                    errors = errors.len(),
                    "returning partial data alongside errors"
                );
                Ok(data)
            }
            data => Err(ClientError::GraphQL { errors, data }),
        }
    }
}

struct FnErrorHandler<F>(F);

impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(&OperationDescriptor, Vec<GraphQLError>, Option<Value>) -> Result<Value> + Send + Sync,
{
    fn on_errors(
        &self,
        operation: &OperationDescriptor,
        errors: Vec<GraphQLError>,
        data: Option<Value>,
    ) -> Result<Value> {
        (self.0)(operation, errors, data)
    }
}

/// The standard parser: JSON bodies for sync operations, Server-Sent Events
/// for subscriptions.
#[derive(Clone)]
pub struct DefaultParser {
    error_handler: Arc<dyn ErrorHandler>,
}

impl Default for DefaultParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultParser {
    /// Create a parser that raises on GraphQL errors.
    pub fn new() -> Self {
        Self {
            error_handler: Arc::new(RaiseOnErrors),
        }
    }

    /// Use `handler` for responses carrying GraphQL errors.
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Use a closure for responses carrying GraphQL errors.
    pub fn on_errors<F>(self, handler: F) -> Self
    where
        F: Fn(&OperationDescriptor, Vec<GraphQLError>, Option<Value>) -> Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.with_error_handler(FnErrorHandler(handler))
    }

    async fn parse_sync_body(
        &self,
        operation: &OperationDescriptor,
        response: WireResponse,
    ) -> Result<Value> {
        let status = response.status();
        let bytes = response.bytes().await?;

        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::HttpStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            Err(e) => return Err(ClientError::InvalidBody(e.to_string())),
        };

        resolve_envelope(&*self.error_handler, operation, envelope).and_then(|data| {
            if data.is_null() && !status.is_success() {
                Err(ClientError::HttpStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                })
            } else {
                Ok(data)
            }
        })
    }

    async fn open_event_stream(
        &self,
        operation: &OperationDescriptor,
        response: WireResponse,
        cancellation: CancellationHandle,
    ) -> Result<EventStream> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if status != http::StatusCode::OK || !is_event_stream(content_type.as_deref()) {
            let body = response.text().await?;
            tracing::debug!(
                target: "gql_client::parser",
                operation = operation.name(),
                %status,
                content_type = content_type.as_deref().unwrap_or(""),
                "subscription rejected"
            );
            return Err(ClientError::SubscriptionFraming {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        Ok(sse::event_stream(
            response.into_byte_stream(),
            cancellation,
            Arc::clone(&self.error_handler),
            operation.clone(),
        ))
    }
}

impl ResponseParser for DefaultParser {
    fn parse_sync<'a>(
        &'a self,
        operation: &'a OperationDescriptor,
        response: WireResponse,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.parse_sync_body(operation, response))
    }

    fn parse_subscription<'a>(
        &'a self,
        operation: &'a OperationDescriptor,
        response: WireResponse,
        cancellation: CancellationHandle,
    ) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(self.open_event_stream(operation, response, cancellation))
    }
}

impl std::fmt::Debug for DefaultParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultParser").finish_non_exhaustive()
    }
}

/// Route errors through the handler and return the payload to decode.
fn resolve_envelope(
    handler: &dyn ErrorHandler,
    operation: &OperationDescriptor,
    envelope: Envelope,
) -> Result<Value> {
    match envelope.into_parts() {
        (data, Some(errors)) => handler.on_errors(operation, errors, data),
        (data, None) => Ok(data.unwrap_or(Value::Null)),
    }
}

/// Whether a `Content-Type` names `text/event-stream`, ignoring parameters.
fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/event-stream"))
}
