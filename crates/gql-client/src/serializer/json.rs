//! `application/json` request serializer.

use futures_util::future::{self, BoxFuture};
use http::HeaderValue;
use http::header::CONTENT_TYPE;

use super::{GraphQLBody, RequestSerializer, finish_request};
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use crate::operation::OperationRequest;
use crate::wire::{WireBody, WireRequest};

/// Sends `{"query": document, "variables": variables}` as JSON.
///
/// Variables containing an [`Upload`](crate::Upload) are rejected with
/// [`ClientError::Serialization`] instead of being silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Serialize without going through the async trait.
    pub fn build_request(
        &self,
        request: &OperationRequest,
        request_context: &RequestContext,
    ) -> Result<WireRequest> {
        if let Some(path) = request.variables.first_upload_path() {
            return Err(ClientError::Serialization(format!(
                "JSON serializer cannot encode binary values, key: \"{path}\""
            )));
        }

        let body = serde_json::to_string(&GraphQLBody {
            query: request.operation.document(),
            variables: &request.variables,
        })
        .map_err(|e| ClientError::Serialization(e.to_string()))?;

        let mut wire = WireRequest::post(WireBody::Json(body));
        wire.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(finish_request(wire, &request.operation, request_context))
    }
}

impl RequestSerializer for JsonSerializer {
    fn serialize<'a>(
        &'a self,
        request: &'a OperationRequest,
        request_context: &'a RequestContext,
    ) -> BoxFuture<'a, Result<WireRequest>> {
        Box::pin(future::ready(self.build_request(request, request_context)))
    }
}
