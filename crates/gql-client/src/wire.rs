//! Transport-level request and response values.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, Method, StatusCode};

use crate::cancel::CancellationHandle;
use crate::error::{ClientError, Result};
use crate::variables::Upload;

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// A request ready to be handed to a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// The HTTP method. Serializers always produce `POST`.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: WireBody,
    /// Endpoint override; the transport's default endpoint is used when unset.
    pub endpoint: Option<String>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
    /// Signal that aborts the request when cancelled.
    pub cancellation: Option<CancellationHandle>,
}

impl WireRequest {
    /// Create a `POST` request with the given body.
    pub fn post(body: WireBody) -> Self {
        Self {
            method: Method::POST,
            headers: HeaderMap::new(),
            body,
            endpoint: None,
            timeout: None,
            cancellation: None,
        }
    }
}

/// The body of a [`WireRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    /// A JSON document.
    Json(String),
    /// A `multipart/form-data` body.
    Multipart(MultipartBody),
}

impl WireBody {
    /// The JSON text, if this is a JSON body.
    pub fn as_json(&self) -> Option<&str> {
        match self {
            Self::Json(text) => Some(text),
            Self::Multipart(_) => None,
        }
    }

    /// The multipart parts, if this is a multipart body.
    pub fn as_multipart(&self) -> Option<&MultipartBody> {
        match self {
            Self::Multipart(body) => Some(body),
            Self::Json(_) => None,
        }
    }
}

/// An ordered list of multipart form parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    parts: Vec<FormPart>,
}

impl MultipartBody {
    /// Create an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text part.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            data: PartData::Text(value.into()),
        });
        self
    }

    /// Append a file part.
    pub fn file(mut self, name: impl Into<String>, upload: Upload) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            data: PartData::File(upload),
        });
        self
    }

    /// The parts in the order they will be sent.
    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Find the first part with `name`.
    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.iter().find(|part| part.name == name)
    }
}

/// A single multipart form part.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    /// The form field name.
    pub name: String,
    /// The part contents.
    pub data: PartData,
}

/// Contents of a [`FormPart`].
#[derive(Debug, Clone, PartialEq)]
pub enum PartData {
    /// A text field.
    Text(String),
    /// A file field.
    File(Upload),
}

/// Status line and headers of a response, kept after the body is consumed.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// The HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// The `Content-Type` header, if present and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// A response returned by a transport.
pub struct WireResponse {
    head: ResponseHead,
    body: ResponseBody,
}

/// The body of a [`WireResponse`].
pub enum ResponseBody {
    /// A fully buffered body.
    Buffered(Bytes),
    /// A body read chunk by chunk.
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl WireResponse {
    /// Create a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            head: ResponseHead { status, headers },
            body,
        }
    }

    /// A buffered response carrying `body`.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, ResponseBody::Buffered(body.into()))
    }

    /// A `200 OK` response with `Content-Type: application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self::from_bytes(StatusCode::OK, headers, body)
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Mutable access to the response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Status and headers.
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Split into head and body.
    pub fn into_parts(self) -> (ResponseHead, ResponseBody) {
        (self.head, self.body)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the whole body as JSON.
    pub async fn json_value(self) -> Result<serde_json::Value> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidBody(e.to_string()))
    }

    /// Turn the body into a chunk stream.
    pub fn into_byte_stream(self) -> ByteStream {
        match self.body {
            ResponseBody::Buffered(bytes) if bytes.is_empty() => stream::empty().boxed(),
            ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireResponse")
            .field("status", &self.head.status)
            .field("headers", &self.head.headers)
            .field("body", &self.body)
            .finish()
    }
}
