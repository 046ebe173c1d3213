//! HTTP transport backed by `reqwest`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use tokio::sync::oneshot;
use url::Url;

use super::Transport;
use crate::cancel::CancellationHandle;
use crate::error::{ClientError, Result};
use crate::variables::Upload;
use crate::wire::{ByteStream, MultipartBody, PartData, ResponseBody, WireBody, WireRequest, WireResponse};

/// Configuration for the HTTP transport.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Default request timeout. Subscriptions usually want none.
    pub timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Maximum number of redirects to follow; `0` disables redirects.
    pub max_redirects: usize,
    /// Whether to enable cookie storage.
    pub cookies_enabled: bool,
    /// Default user agent.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            max_redirects: 10,
            cookies_enabled: false,
            user_agent: Some(format!("gql-client/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            proxy: None,
        }
    }
}

/// Builder for an [`HttpTransport`].
pub struct HttpTransportBuilder {
    endpoint: String,
    config: HttpTransportConfig,
    default_headers: http::HeaderMap,
}

impl HttpTransportBuilder {
    /// Create a builder targeting `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            config: HttpTransportConfig::default(),
            default_headers: http::HeaderMap::new(),
        }
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Enable cookie storage.
    pub fn cookies(mut self) -> Self {
        self.config.cookies_enabled = true;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set a proxy URL.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy_url.into());
        self
    }

    /// Add a header sent with every request.
    pub fn default_header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Result<Self> {
        let name = name
            .try_into()
            .map_err(|_| ClientError::Serialization("invalid header name".to_string()))?;
        let value = value
            .try_into()
            .map_err(|_| ClientError::Serialization("invalid header value".to_string()))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpTransport> {
        let endpoint = Url::parse(&self.endpoint)?;
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        builder = if self.config.max_redirects == 0 {
            builder.redirect(Policy::none())
        } else {
            builder.redirect(Policy::limited(self.config.max_redirects))
        };

        if self.config.cookies_enabled {
            builder = builder.cookie_store(true);
        }
        if let Some(ref ua) = self.config.user_agent {
            builder = builder.user_agent(ua);
        }
        if let Some(ref proxy_url) = self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ClientError::InvalidUrl(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder = builder.default_headers(self.default_headers);
        let client = builder.build()?;

        Ok(HttpTransport {
            inner: Arc::new(HttpTransportInner {
                client,
                endpoint,
                config: self.config,
            }),
        })
    }
}

struct HttpTransportInner {
    client: reqwest::Client,
    endpoint: Url,
    config: HttpTransportConfig,
}

/// A [`Transport`] that sends requests over HTTP with `reqwest`.
///
/// Cheap to clone; clones share the connection pool. Response bodies are
/// exposed as byte streams so subscription events are decoded as they
/// arrive. When the request carries a cancellation handle, cancelling it
/// drops the in-flight request, or the response body once the head has
/// arrived, which closes the connection.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<HttpTransportInner>,
}

impl HttpTransport {
    /// Create a transport with default configuration.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        HttpTransportBuilder::new(endpoint).build()
    }

    /// Create a builder.
    pub fn builder(endpoint: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(endpoint)
    }

    /// The default endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// The transport configuration.
    pub fn config(&self) -> &HttpTransportConfig {
        &self.inner.config
    }

    async fn send_request(&self, request: WireRequest) -> Result<WireResponse> {
        let url = match request.endpoint {
            Some(ref endpoint) => Url::parse(endpoint)?,
            None => self.inner.endpoint.clone(),
        };

        let mut builder = self
            .inner
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body {
            WireBody::Json(text) => builder.body(text),
            WireBody::Multipart(body) => builder.multipart(to_form(body)),
        };

        tracing::trace!(target: "gql_client::transport", "sending request");
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        tracing::trace!(target: "gql_client::transport", %status, "received response head");

        let body: ByteStream = response.bytes_stream().map_err(ClientError::from).boxed();
        let body = match request.cancellation {
            Some(cancellation) => CancellableBody::new(body, cancellation).boxed(),
            None => body,
        };
        Ok(WireResponse::new(status, headers, ResponseBody::Stream(body)))
    }
}

/// A response body that is dropped as soon as its cancellation handle fires,
/// whether or not anyone is polling it.
struct CancellableBody {
    body: Arc<Mutex<Option<ByteStream>>>,
    _release: oneshot::Sender<()>,
}

impl CancellableBody {
    fn new(body: ByteStream, cancellation: CancellationHandle) -> Self {
        let body = Arc::new(Mutex::new(Some(body)));
        let slot = Arc::clone(&body);
        let (release, released) = oneshot::channel::<()>();

        // Exits when the body is cancelled or when this wrapper is dropped.
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    if slot.lock().take().is_some() {
                        tracing::debug!(target: "gql_client::transport", "response body released on cancellation");
                    }
                }
                _ = released => {}
            }
        });

        Self {
            body,
            _release: release,
        }
    }
}

impl Stream for CancellableBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut slot = self.body.lock();
        match slot.as_mut() {
            Some(body) => body.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse>> {
        Box::pin(async move {
            match request.cancellation.clone() {
                Some(cancellation) => cancellation
                    .run_until_cancelled(self.send_request(request))
                    .await
                    .unwrap_or(Err(ClientError::Cancelled)),
                None => self.send_request(request).await,
            }
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn to_form(body: MultipartBody) -> Form {
    body.parts()
        .iter()
        .fold(Form::new(), |form, part| match &part.data {
            PartData::Text(text) => form.text(part.name.clone(), text.clone()),
            PartData::File(upload) => form.part(part.name.clone(), file_part(upload)),
        })
}

fn file_part(upload: &Upload) -> Part {
    let build = || {
        let part = Part::bytes(upload.bytes().to_vec());
        match upload.filename() {
            Some(filename) => part.file_name(filename.to_owned()),
            None => part,
        }
    };
    match upload.content_type() {
        Some(mime) => build().mime_str(mime).unwrap_or_else(|e| {
            tracing::warn!(target: "gql_client::transport", "Invalid MIME type '{}': {}", mime, e);
            build()
        }),
        None => build(),
    }
}
