//! GraphQL multipart request serializer.
//!
//! Implements the multipart request convention used by GraphQL servers for
//! file uploads. The form carries, in order:
//!
//! 1. `operations`: the usual `{"query", "variables"}` JSON with every
//!    upload replaced by `null`;
//! 2. `map`: `{"0": ["variables.<path>"], "1": [...]}` linking each file
//!    part to the variable it fills;
//! 3. one file part per upload, named by its index.
//!
//! No `Content-Type` header is set; the transport adds it together with the
//! form boundary.

use futures_util::future::{self, BoxFuture};
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use super::{GraphQLBody, RequestSerializer, finish_request};
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use crate::operation::OperationRequest;
use crate::variables::{MAX_DEPTH, Upload, VariableMap, VariableValue};
use crate::wire::{MultipartBody, WireBody, WireRequest};

/// Sends variables containing uploads as `multipart/form-data`.
///
/// Fails with [`ClientError::Serialization`] when the variables contain no
/// upload; such requests belong to the JSON strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultipartSerializer;

impl MultipartSerializer {
    /// Serialize without going through the async trait.
    pub fn build_request(
        &self,
        request: &OperationRequest,
        request_context: &RequestContext,
    ) -> Result<WireRequest> {
        let mut files = Vec::new();
        let variables = extract_uploads(&request.variables, &mut Vec::new(), &mut files)?;
        if files.is_empty() {
            return Err(ClientError::Serialization(
                "multipart serializer used for a request without uploads".to_string(),
            ));
        }

        let operations = serde_json::to_string(&GraphQLBody {
            query: request.operation.document(),
            variables: &variables,
        })
        .map_err(|e| ClientError::Serialization(e.to_string()))?;
        let map = serde_json::to_string(&FileMap(&files))
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        tracing::trace!(
            target: "gql_client::serializer",
            operation = request.operation.name(),
            files = files.len(),
            "encoding multipart request"
        );

        let body = files.into_iter().enumerate().fold(
            MultipartBody::new().text("operations", operations).text("map", map),
            |body, (index, (_, upload))| body.file(index.to_string(), upload),
        );

        let wire = WireRequest::post(WireBody::Multipart(body));
        Ok(finish_request(wire, &request.operation, request_context))
    }
}

impl RequestSerializer for MultipartSerializer {
    fn serialize<'a>(
        &'a self,
        request: &'a OperationRequest,
        request_context: &'a RequestContext,
    ) -> BoxFuture<'a, Result<WireRequest>> {
        Box::pin(future::ready(self.build_request(request, request_context)))
    }
}

/// Serializes the `map` part with keys in index order.
struct FileMap<'a>(&'a [(String, Upload)]);

impl Serialize for FileMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, (path, _)) in self.0.iter().enumerate() {
            map.serialize_entry(&index.to_string(), &[format!("variables.{path}")])?;
        }
        map.end()
    }
}

/// Copy `value`, replacing each upload with `null` and collecting it with
/// its dotted path.
fn extract_uploads(
    value: &VariableValue,
    path: &mut Vec<String>,
    files: &mut Vec<(String, Upload)>,
) -> Result<VariableValue> {
    if path.len() > MAX_DEPTH {
        return Err(ClientError::Serialization(format!(
            "variables nested deeper than {MAX_DEPTH} levels"
        )));
    }

    Ok(match value {
        VariableValue::Upload(upload) => {
            files.push((path.join("."), upload.clone()));
            VariableValue::Null
        }
        VariableValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(index.to_string());
                out.push(extract_uploads(item, path, files)?);
                path.pop();
            }
            VariableValue::List(out)
        }
        VariableValue::Object(map) => {
            let mut out = VariableMap::new();
            for (key, item) in map.iter() {
                path.push(key.clone());
                out.insert(key.clone(), extract_uploads(item, path, files)?);
                path.pop();
            }
            VariableValue::Object(out)
        }
        other => other.clone(),
    })
}
