//! Request serializers.
//!
//! A serializer turns an [`OperationRequest`] plus the caller's
//! [`RequestContext`] into a [`WireRequest`]. Two strategies are provided:
//!
//! - [`JsonSerializer`]: `application/json` body `{"query", "variables"}`.
//! - [`MultipartSerializer`]: the GraphQL multipart request convention, used
//!   when the variables carry [`Upload`](crate::Upload)s.
//!
//! [`SelectingSerializer`] (the default) picks between them per request.

mod json;
mod multipart;

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use http::HeaderValue;
use http::header::ACCEPT;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::Result;
use crate::operation::{OperationDescriptor, OperationRequest};
use crate::variables::VariableValue;
use crate::wire::WireRequest;

pub use self::json::JsonSerializer;
pub use self::multipart::MultipartSerializer;

/// Turns an operation request into a wire request.
pub trait RequestSerializer: Send + Sync {
    /// Serialize `request` for sending.
    fn serialize<'a>(
        &'a self,
        request: &'a OperationRequest,
        request_context: &'a RequestContext,
    ) -> BoxFuture<'a, Result<WireRequest>>;
}

/// Predicate deciding whether a request needs the multipart strategy.
pub type MultipartSelector = Arc<dyn Fn(&OperationRequest) -> bool + Send + Sync>;

/// Chooses [`MultipartSerializer`] when the selector matches and
/// [`JsonSerializer`] otherwise.
///
/// The default selector is [`VariableValue::has_upload`].
#[derive(Clone)]
pub struct SelectingSerializer {
    json: JsonSerializer,
    multipart: MultipartSerializer,
    selector: MultipartSelector,
}

impl Default for SelectingSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectingSerializer {
    /// Create a serializer using the default upload detection.
    pub fn new() -> Self {
        Self {
            json: JsonSerializer,
            multipart: MultipartSerializer,
            selector: Arc::new(|request: &OperationRequest| request.variables.has_upload()),
        }
    }

    /// Replace the multipart selector.
    pub fn with_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&OperationRequest) -> bool + Send + Sync + 'static,
    {
        self.selector = Arc::new(selector);
        self
    }

    /// Whether `request` would be sent as multipart.
    pub fn uses_multipart(&self, request: &OperationRequest) -> bool {
        (self.selector)(request)
    }

    /// Serialize without going through the async trait.
    pub fn build_request(
        &self,
        request: &OperationRequest,
        request_context: &RequestContext,
    ) -> Result<WireRequest> {
        if self.uses_multipart(request) {
            self.multipart.build_request(request, request_context)
        } else {
            self.json.build_request(request, request_context)
        }
    }
}

impl RequestSerializer for SelectingSerializer {
    fn serialize<'a>(
        &'a self,
        request: &'a OperationRequest,
        request_context: &'a RequestContext,
    ) -> BoxFuture<'a, Result<WireRequest>> {
        Box::pin(future::ready(self.build_request(request, request_context)))
    }
}

impl std::fmt::Debug for SelectingSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectingSerializer").finish_non_exhaustive()
    }
}

/// The `{"query", "variables"}` payload shared by both strategies.
#[derive(Serialize)]
struct GraphQLBody<'a> {
    query: &'a str,
    variables: &'a VariableValue,
}

/// Headers and overrides common to both strategies.
fn finish_request(
    mut wire: WireRequest,
    operation: &OperationDescriptor,
    request_context: &RequestContext,
) -> WireRequest {
    let accept = if operation.kind().is_subscription() {
        "text/event-stream"
    } else {
        "application/json"
    };
    wire.headers.insert(ACCEPT, HeaderValue::from_static(accept));

    for (name, value) in &request_context.headers {
        wire.headers.insert(name.clone(), value.clone());
    }
    wire.endpoint.clone_from(&request_context.endpoint);
    wire.timeout = request_context.timeout;
    wire.cancellation.clone_from(&request_context.cancellation);
    wire
}
