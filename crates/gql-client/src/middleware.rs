//! Middleware stages around serialization and parsing.
//!
//! Four stages wrap every attempt:
//!
//! | Stage                  | Receives and returns   |
//! |------------------------|------------------------|
//! | `before_serialization` | [`OperationRequest`]   |
//! | `after_serialization`  | [`WireRequest`]        |
//! | `before_parsing`       | [`WireResponse`]       |
//! | `after_parsing`        | [`ParsedResult`]       |
//!
//! Stages run in registration order and may be async. Each one may replace
//! the value it receives; an error aborts the attempt and is handed to the
//! retry policy. Sync and subscription operations use separate chains.
//!
//! # Example
//!
//! ```ignore
//! let middlewares = MiddlewareChain::new()
//!     .after_serialization(|_ctx, mut request: WireRequest| async move {
//!         request.headers.insert("x-client", HeaderValue::from_static("gql-client"));
//!         Ok(request)
//!     });
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::cancel::CancellationHandle;
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use crate::operation::OperationRequest;
use crate::wire::{ResponseHead, WireRequest, WireResponse};

/// Context passed to `before_serialization` middleware.
pub struct BeforeSerializationContext<'a, C> {
    /// The executor's client context.
    pub client: &'a C,
    /// The caller's request context.
    pub request_context: &'a RequestContext,
    /// The 1-based attempt number.
    pub attempt: u32,
    /// Cancellation handle of a subscription call.
    pub cancellation: Option<&'a CancellationHandle>,
}

/// Context passed to `after_serialization` middleware.
pub struct AfterSerializationContext<'a, C> {
    /// The executor's client context.
    pub client: &'a C,
    /// The caller's request context.
    pub request_context: &'a RequestContext,
    /// The 1-based attempt number.
    pub attempt: u32,
    /// Cancellation handle of a subscription call.
    pub cancellation: Option<&'a CancellationHandle>,
    /// The operation and variables that were serialized.
    pub operation: &'a OperationRequest,
}

/// Context passed to `before_parsing` middleware.
pub struct BeforeParsingContext<'a, C> {
    /// The executor's client context.
    pub client: &'a C,
    /// The caller's request context.
    pub request_context: &'a RequestContext,
    /// The 1-based attempt number.
    pub attempt: u32,
    /// Cancellation handle of a subscription call.
    pub cancellation: Option<&'a CancellationHandle>,
    /// The operation and variables that were serialized.
    pub operation: &'a OperationRequest,
    /// The request handed to the transport.
    pub request: &'a WireRequest,
}

/// Context passed to `after_parsing` middleware.
pub struct AfterParsingContext<'a, C> {
    /// The executor's client context.
    pub client: &'a C,
    /// The caller's request context.
    pub request_context: &'a RequestContext,
    /// The 1-based attempt number.
    pub attempt: u32,
    /// Cancellation handle of a subscription call.
    pub cancellation: Option<&'a CancellationHandle>,
    /// The operation and variables that were serialized.
    pub operation: &'a OperationRequest,
    /// The request handed to the transport.
    pub request: &'a WireRequest,
    /// Status and headers of the response.
    pub response: &'a ResponseHead,
}

/// A decoded result whose type is fixed by the operation.
///
/// Middleware can inspect or modify the value in place through
/// [`downcast_mut`](Self::downcast_mut) but cannot swap in a value of a
/// different type. For subscriptions the value is the
/// [`SubscriptionStream`](crate::SubscriptionStream).
pub struct ParsedResult {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl ParsedResult {
    pub(crate) fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn into_inner<T: Any>(self) -> Result<T> {
        let type_name = self.type_name;
        self.value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| {
                ClientError::middleware(format!(
                    "parsed result changed type: expected {}, found {type_name}",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Whether the result holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the result as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// Mutably borrow the result as a `T`.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut()
    }

    /// The Rust type name of the result.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ParsedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedResult")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Runs before the serializer.
pub trait BeforeSerialization<C>: Send + Sync {
    /// Inspect or replace the operation request.
    fn before_serialization<'a>(
        &'a self,
        ctx: &'a BeforeSerializationContext<'a, C>,
        request: OperationRequest,
    ) -> BoxFuture<'a, Result<OperationRequest>>;
}

/// Runs after the serializer, before the transport.
pub trait AfterSerialization<C>: Send + Sync {
    /// Inspect or replace the wire request.
    fn after_serialization<'a>(
        &'a self,
        ctx: &'a AfterSerializationContext<'a, C>,
        request: WireRequest,
    ) -> BoxFuture<'a, Result<WireRequest>>;
}

/// Runs after the transport, before the parser.
pub trait BeforeParsing<C>: Send + Sync {
    /// Inspect or replace the wire response.
    fn before_parsing<'a>(
        &'a self,
        ctx: &'a BeforeParsingContext<'a, C>,
        response: WireResponse,
    ) -> BoxFuture<'a, Result<WireResponse>>;
}

/// Runs after the parser.
pub trait AfterParsing<C>: Send + Sync {
    /// Inspect or modify the parsed result.
    fn after_parsing<'a>(
        &'a self,
        ctx: &'a AfterParsingContext<'a, C>,
        result: ParsedResult,
    ) -> BoxFuture<'a, Result<ParsedResult>>;
}

/// Adapts a closure to one of the stage traits.
struct FnStage<F>(F);

impl<C, F, Fut> BeforeSerialization<C> for FnStage<F>
where
    F: Fn(&BeforeSerializationContext<'_, C>, OperationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OperationRequest>> + Send + 'static,
{
    fn before_serialization<'a>(
        &'a self,
        ctx: &'a BeforeSerializationContext<'a, C>,
        request: OperationRequest,
    ) -> BoxFuture<'a, Result<OperationRequest>> {
        Box::pin((self.0)(ctx, request))
    }
}

impl<C, F, Fut> AfterSerialization<C> for FnStage<F>
where
    F: Fn(&AfterSerializationContext<'_, C>, WireRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireRequest>> + Send + 'static,
{
    fn after_serialization<'a>(
        &'a self,
        ctx: &'a AfterSerializationContext<'a, C>,
        request: WireRequest,
    ) -> BoxFuture<'a, Result<WireRequest>> {
        Box::pin((self.0)(ctx, request))
    }
}

impl<C, F, Fut> BeforeParsing<C> for FnStage<F>
where
    F: Fn(&BeforeParsingContext<'_, C>, WireResponse) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireResponse>> + Send + 'static,
{
    fn before_parsing<'a>(
        &'a self,
        ctx: &'a BeforeParsingContext<'a, C>,
        response: WireResponse,
    ) -> BoxFuture<'a, Result<WireResponse>> {
        Box::pin((self.0)(ctx, response))
    }
}

impl<C, F, Fut> AfterParsing<C> for FnStage<F>
where
    F: Fn(&AfterParsingContext<'_, C>, ParsedResult) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ParsedResult>> + Send + 'static,
{
    fn after_parsing<'a>(
        &'a self,
        ctx: &'a AfterParsingContext<'a, C>,
        result: ParsedResult,
    ) -> BoxFuture<'a, Result<ParsedResult>> {
        Box::pin((self.0)(ctx, result))
    }
}

/// The four middleware stages of one operation family.
pub struct MiddlewareChain<C> {
    pub(crate) before_serialization: Vec<Arc<dyn BeforeSerialization<C>>>,
    pub(crate) after_serialization: Vec<Arc<dyn AfterSerialization<C>>>,
    pub(crate) before_parsing: Vec<Arc<dyn BeforeParsing<C>>>,
    pub(crate) after_parsing: Vec<Arc<dyn AfterParsing<C>>>,
}

impl<C> Default for MiddlewareChain<C> {
    fn default() -> Self {
        Self {
            before_serialization: Vec::new(),
            after_serialization: Vec::new(),
            before_parsing: Vec::new(),
            after_parsing: Vec::new(),
        }
    }
}

impl<C> Clone for MiddlewareChain<C> {
    fn clone(&self) -> Self {
        Self {
            before_serialization: self.before_serialization.clone(),
            after_serialization: self.after_serialization.clone(),
            before_parsing: self.before_parsing.clone(),
            after_parsing: self.after_parsing.clone(),
        }
    }
}

impl<C: 'static> MiddlewareChain<C> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `before_serialization` closure.
    pub fn before_serialization<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&BeforeSerializationContext<'_, C>, OperationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<OperationRequest>> + Send + 'static,
    {
        self.with_before_serialization(FnStage(f))
    }

    /// Append an `after_serialization` closure.
    pub fn after_serialization<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&AfterSerializationContext<'_, C>, WireRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WireRequest>> + Send + 'static,
    {
        self.with_after_serialization(FnStage(f))
    }

    /// Append a `before_parsing` closure.
    pub fn before_parsing<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&BeforeParsingContext<'_, C>, WireResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WireResponse>> + Send + 'static,
    {
        self.with_before_parsing(FnStage(f))
    }

    /// Append an `after_parsing` closure.
    pub fn after_parsing<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&AfterParsingContext<'_, C>, ParsedResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ParsedResult>> + Send + 'static,
    {
        self.with_after_parsing(FnStage(f))
    }

    /// Append a `before_serialization` middleware.
    pub fn with_before_serialization(mut self, m: impl BeforeSerialization<C> + 'static) -> Self {
        self.before_serialization.push(Arc::new(m));
        self
    }

    /// Append an `after_serialization` middleware.
    pub fn with_after_serialization(mut self, m: impl AfterSerialization<C> + 'static) -> Self {
        self.after_serialization.push(Arc::new(m));
        self
    }

    /// Append a `before_parsing` middleware.
    pub fn with_before_parsing(mut self, m: impl BeforeParsing<C> + 'static) -> Self {
        self.before_parsing.push(Arc::new(m));
        self
    }

    /// Append an `after_parsing` middleware.
    pub fn with_after_parsing(mut self, m: impl AfterParsing<C> + 'static) -> Self {
        self.after_parsing.push(Arc::new(m));
        self
    }

    /// Whether no stage has any middleware.
    pub fn is_empty(&self) -> bool {
        self.before_serialization.is_empty()
            && self.after_serialization.is_empty()
            && self.before_parsing.is_empty()
            && self.after_parsing.is_empty()
    }

    pub(crate) async fn run_before_serialization(
        &self,
        ctx: &BeforeSerializationContext<'_, C>,
        mut request: OperationRequest,
    ) -> Result<OperationRequest> {
        let kind = request.operation.kind();
        for middleware in &self.before_serialization {
            request = middleware.before_serialization(ctx, request).await?;
        }
        if request.operation.kind() != kind {
            return Err(ClientError::middleware(format!(
                "before_serialization changed the operation kind from {kind} to {}",
                request.operation.kind()
            )));
        }
        Ok(request)
    }

    pub(crate) async fn run_after_serialization(
        &self,
        ctx: &AfterSerializationContext<'_, C>,
        mut request: WireRequest,
    ) -> Result<WireRequest> {
        for middleware in &self.after_serialization {
            request = middleware.after_serialization(ctx, request).await?;
        }
        Ok(request)
    }

    pub(crate) async fn run_before_parsing(
        &self,
        ctx: &BeforeParsingContext<'_, C>,
        mut response: WireResponse,
    ) -> Result<WireResponse> {
        for middleware in &self.before_parsing {
            response = middleware.before_parsing(ctx, response).await?;
        }
        Ok(response)
    }

    pub(crate) async fn run_after_parsing(
        &self,
        ctx: &AfterParsingContext<'_, C>,
        mut result: ParsedResult,
    ) -> Result<ParsedResult> {
        for middleware in &self.after_parsing {
            result = middleware.after_parsing(ctx, result).await?;
        }
        Ok(result)
    }
}

impl<C> fmt::Debug for MiddlewareChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("before_serialization", &self.before_serialization.len())
            .field("after_serialization", &self.after_serialization.len())
            .field("before_parsing", &self.before_parsing.len())
            .field("after_parsing", &self.after_parsing.len())
            .finish()
    }
}
