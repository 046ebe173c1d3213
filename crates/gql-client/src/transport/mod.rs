//! Transports deliver wire requests and return wire responses.
//!
//! The executor calls [`Transport::send`] exactly once per attempt. Any
//! `Fn(WireRequest) -> impl Future<Output = Result<WireResponse>>` closure is
//! a transport, which keeps tests and custom integrations light:
//!
//! ```ignore
//! let transport = |request: WireRequest| async move {
//!     Ok(WireResponse::json(r#"{"data":{"ok":true}}"#))
//! };
//! let executor = Executor::builder(transport).build();
//! ```

mod client;

use std::future::Future;

use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::wire::{WireRequest, WireResponse};

pub use self::client::{HttpTransport, HttpTransportBuilder, HttpTransportConfig};

/// Sends a [`WireRequest`] and returns the raw [`WireResponse`].
///
/// Implementations should honor `request.cancellation` and
/// `request.timeout` when present. The response body may be left unread;
/// subscription bodies are consumed incrementally.
pub trait Transport: Send + Sync {
    /// Send the request.
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse>>;
}

impl<F, Fut> Transport for F
where
    F: Fn(WireRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireResponse>> + Send + 'static,
{
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse>> {
        Box::pin(self(request))
    }
}
