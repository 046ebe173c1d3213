//! The operation executor.
//!
//! Each call runs one or more attempts. An attempt moves through
//! [`AttemptState`]s:
//!
//! ```text
//! Pending -> Serializing -> Sending -> Parsing -> Succeeded
//!     \____________\____________\__________\____-> Failed
//! ```
//!
//! A failed attempt is handed to the retry policy; if it accepts, a new
//! attempt starts from the original operation and variables. Attempts never
//! overlap and each makes exactly one transport call.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cancel::CancellationHandle;
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use crate::middleware::{
    AfterParsingContext, AfterSerializationContext, BeforeParsingContext,
    BeforeSerializationContext, MiddlewareChain, ParsedResult,
};
use crate::operation::{Operation, OperationDescriptor, OperationRequest, SubscriptionOperation, SyncOperation};
use crate::parser::{DefaultParser, ResponseParser};
use crate::retry::{FnRetry, NeverRetry, RetryOptions, RetryPolicy};
use crate::serializer::{RequestSerializer, SelectingSerializer};
use crate::stream::SubscriptionStream;
use crate::transport::Transport;
use crate::variables::to_variables;
use crate::wire::{ResponseHead, WireRequest, WireResponse};

/// Lifecycle of a single attempt, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Not started.
    Pending,
    /// Running `before_serialization`, the serializer and
    /// `after_serialization`.
    Serializing,
    /// Waiting for the transport.
    Sending,
    /// Running `before_parsing`, the parser, result decoding and
    /// `after_parsing`.
    Parsing,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Serializing => "serializing",
            Self::Sending => "sending",
            Self::Parsing => "parsing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// A successful execution.
#[derive(Debug)]
pub struct ExecuteResult<T> {
    /// The decoded result, or the result stream for subscriptions.
    pub result: T,
    /// Status and headers of the response that produced it.
    pub response: ResponseHead,
}

/// Outcome of [`Executor::execute`].
#[derive(Debug)]
pub enum Execution<R> {
    /// A query or mutation result.
    Value(ExecuteResult<R>),
    /// A subscription stream.
    Stream(ExecuteResult<SubscriptionStream<R>>),
}

impl<R> Execution<R> {
    /// The value, if this was a query or mutation.
    pub fn into_value(self) -> Option<ExecuteResult<R>> {
        match self {
            Self::Value(result) => Some(result),
            Self::Stream(_) => None,
        }
    }

    /// The stream, if this was a subscription.
    pub fn into_stream(self) -> Option<ExecuteResult<SubscriptionStream<R>>> {
        match self {
            Self::Stream(result) => Some(result),
            Self::Value(_) => None,
        }
    }
}

/// Builder for an [`Executor`].
pub struct ExecutorBuilder<C = ()> {
    context: C,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn RequestSerializer>,
    parser: Arc<dyn ResponseParser>,
    sync_middlewares: MiddlewareChain<C>,
    subscription_middlewares: MiddlewareChain<C>,
    sync_retry: Arc<dyn RetryPolicy<C>>,
    subscription_retry: Arc<dyn RetryPolicy<C>>,
}

impl<C: Send + Sync + 'static> ExecutorBuilder<C> {
    /// Create a builder with a client context visible to middleware and
    /// retry policies.
    pub fn new(transport: impl Transport + 'static, context: C) -> Self {
        Self {
            context,
            transport: Arc::new(transport),
            serializer: Arc::new(SelectingSerializer::new()),
            parser: Arc::new(DefaultParser::new()),
            sync_middlewares: MiddlewareChain::new(),
            subscription_middlewares: MiddlewareChain::new(),
            sync_retry: Arc::new(NeverRetry),
            subscription_retry: Arc::new(NeverRetry),
        }
    }

    /// Replace the request serializer.
    pub fn serializer(mut self, serializer: impl RequestSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Replace the response parser.
    pub fn parser(mut self, parser: impl ResponseParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Middleware for queries and mutations.
    pub fn sync_middlewares(mut self, chain: MiddlewareChain<C>) -> Self {
        self.sync_middlewares = chain;
        self
    }

    /// Middleware for subscriptions.
    pub fn subscription_middlewares(mut self, chain: MiddlewareChain<C>) -> Self {
        self.subscription_middlewares = chain;
        self
    }

    /// Retry policy for queries and mutations.
    pub fn sync_retry(mut self, policy: impl RetryPolicy<C> + 'static) -> Self {
        self.sync_retry = Arc::new(policy);
        self
    }

    /// Retry policy for subscriptions.
    pub fn subscription_retry(mut self, policy: impl RetryPolicy<C> + 'static) -> Self {
        self.subscription_retry = Arc::new(policy);
        self
    }

    /// Use a closure as the retry policy for queries and mutations.
    pub fn sync_retry_fn<F>(self, f: F) -> Self
    where
        F: Fn(&ClientError, u32, &RetryOptions<'_, C>) -> bool + Send + Sync + 'static,
    {
        self.sync_retry(FnRetry(f))
    }

    /// Use a closure as the retry policy for subscriptions.
    pub fn subscription_retry_fn<F>(self, f: F) -> Self
    where
        F: Fn(&ClientError, u32, &RetryOptions<'_, C>) -> bool + Send + Sync + 'static,
    {
        self.subscription_retry(FnRetry(f))
    }

    /// Build the executor.
    pub fn build(self) -> Executor<C> {
        Executor {
            inner: Arc::new(ExecutorInner {
                context: self.context,
                transport: self.transport,
                serializer: self.serializer,
                parser: self.parser,
                sync_middlewares: self.sync_middlewares,
                subscription_middlewares: self.subscription_middlewares,
                sync_retry: self.sync_retry,
                subscription_retry: self.subscription_retry,
            }),
        }
    }
}

struct ExecutorInner<C> {
    context: C,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn RequestSerializer>,
    parser: Arc<dyn ResponseParser>,
    sync_middlewares: MiddlewareChain<C>,
    subscription_middlewares: MiddlewareChain<C>,
    sync_retry: Arc<dyn RetryPolicy<C>>,
    subscription_retry: Arc<dyn RetryPolicy<C>>,
}

/// Executes typed GraphQL operations.
///
/// The executor holds only immutable configuration. It is cheap to clone,
/// and concurrent calls share nothing but that configuration.
///
/// # Example
///
/// ```ignore
/// let executor = Executor::builder(HttpTransport::new("https://api.example.com/graphql")?)
///     .sync_retry(BackoffRetry::default())
///     .build();
///
/// let user = executor
///     .execute_sync(&GET_USER, &GetUserVariables { id: "1".into() }, &RequestContext::default())
///     .await?
///     .result;
/// ```
pub struct Executor<C = ()> {
    inner: Arc<ExecutorInner<C>>,
}

impl<C> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Executor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("sync_middlewares", &self.inner.sync_middlewares)
            .field("subscription_middlewares", &self.inner.subscription_middlewares)
            .finish_non_exhaustive()
    }
}

impl Executor<()> {
    /// Create a builder without a client context.
    pub fn builder(transport: impl Transport + 'static) -> ExecutorBuilder<()> {
        ExecutorBuilder::new(transport, ())
    }
}

/// What an attempt brought back from the transport.
struct Exchange {
    operation: OperationRequest,
    request: WireRequest,
    response: WireResponse,
}

/// Which middleware chain and cancellation an attempt runs with.
struct AttemptScope<'a, C> {
    chain: &'a MiddlewareChain<C>,
    request_context: &'a RequestContext,
    cancellation: Option<&'a CancellationHandle>,
    attempt: u32,
}

impl<C: Send + Sync + 'static> Executor<C> {
    /// Create a builder with a client context.
    pub fn with_context(transport: impl Transport + 'static, context: C) -> ExecutorBuilder<C> {
        ExecutorBuilder::new(transport, context)
    }

    /// The client context.
    pub fn context(&self) -> &C {
        &self.inner.context
    }

    /// Execute a query or mutation.
    pub async fn execute_sync<V, R>(
        &self,
        operation: &SyncOperation<V, R>,
        variables: &V,
        request_context: &RequestContext,
    ) -> Result<ExecuteResult<R>>
    where
        V: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let base = OperationRequest::new(operation.descriptor().clone(), to_variables(variables)?);
        let cancellation = request_context.cancellation.as_ref();
        let retry = &*self.inner.sync_retry;

        self.with_retry(retry, &base, request_context, |attempt| {
            let scope = AttemptScope {
                chain: &self.inner.sync_middlewares,
                request_context,
                cancellation,
                attempt,
            };
            self.attempt_sync::<R>(scope, base.clone())
        })
        .await
    }

    /// Execute a subscription.
    ///
    /// Resolves once the server has accepted the subscription with a
    /// `200 text/event-stream` response. Cancelling `cancellation` aborts
    /// the request while it is in flight and closes the returned stream.
    pub async fn execute_subscription<V, R>(
        &self,
        operation: &SubscriptionOperation<V, R>,
        variables: &V,
        request_context: &RequestContext,
        cancellation: CancellationHandle,
    ) -> Result<ExecuteResult<SubscriptionStream<R>>>
    where
        V: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let base = OperationRequest::new(operation.descriptor().clone(), to_variables(variables)?);
        let retry = &*self.inner.subscription_retry;

        self.with_retry(retry, &base, request_context, |attempt| {
            let scope = AttemptScope {
                chain: &self.inner.subscription_middlewares,
                request_context,
                cancellation: Some(&cancellation),
                attempt,
            };
            self.attempt_subscription::<R>(scope, base.clone())
        })
        .await
    }

    /// Execute either kind of operation.
    ///
    /// Subscriptions get a fresh cancellation handle unless one is given.
    pub async fn execute<V, R>(
        &self,
        operation: &Operation<V, R>,
        variables: &V,
        request_context: &RequestContext,
        cancellation: Option<CancellationHandle>,
    ) -> Result<Execution<R>>
    where
        V: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        match operation {
            Operation::Sync(op) => self
                .execute_sync(op, variables, request_context)
                .await
                .map(Execution::Value),
            Operation::Subscription(op) => self
                .execute_subscription(
                    op,
                    variables,
                    request_context,
                    cancellation.unwrap_or_default(),
                )
                .await
                .map(Execution::Stream),
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        policy: &dyn RetryPolicy<C>,
        base: &OperationRequest,
        request_context: &RequestContext,
        mut run_attempt: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            tracing::debug!(
                target: "gql_client::executor",
                operation = base.operation.name(),
                kind = %base.operation.kind(),
                attempt,
                state = %AttemptState::Pending,
                "starting attempt"
            );

            let error = match run_attempt(attempt).await {
                Ok(value) => {
                    tracing::debug!(
                        target: "gql_client::executor",
                        operation = base.operation.name(),
                        attempt,
                        state = %AttemptState::Succeeded,
                        "attempt finished"
                    );
                    return Ok(value);
                }
                Err(error) => error,
            };

            tracing::debug!(
                target: "gql_client::executor",
                operation = base.operation.name(),
                attempt,
                state = %AttemptState::Failed,
                error = %error,
                "attempt finished"
            );

            // Encoding bugs and caller cancellation never get better on retry.
            if matches!(error, ClientError::Serialization(_) | ClientError::Cancelled) {
                return Err(error);
            }

            let options = RetryOptions {
                client: &self.inner.context,
                operation: &base.operation,
                variables: &base.variables,
                request_context,
            };
            if !policy.should_retry(&error, attempt, &options).await {
                return Err(error);
            }
            attempt += 1;
        }
    }

    /// Run the attempt up to and including `before_parsing`.
    async fn exchange(&self, scope: &AttemptScope<'_, C>, operation: OperationRequest) -> Result<Exchange> {
        let client = &self.inner.context;
        let trace_state = |state: AttemptState| {
            tracing::trace!(
                target: "gql_client::executor",
                attempt = scope.attempt,
                state = %state,
                "attempt state"
            );
        };

        trace_state(AttemptState::Serializing);
        let ctx = BeforeSerializationContext {
            client,
            request_context: scope.request_context,
            attempt: scope.attempt,
            cancellation: scope.cancellation,
        };
        let operation = scope.chain.run_before_serialization(&ctx, operation).await?;

        let request = self
            .inner
            .serializer
            .serialize(&operation, scope.request_context)
            .await?;

        let ctx = AfterSerializationContext {
            client,
            request_context: scope.request_context,
            attempt: scope.attempt,
            cancellation: scope.cancellation,
            operation: &operation,
        };
        let mut request = scope.chain.run_after_serialization(&ctx, request).await?;
        if let Some(cancellation) = scope.cancellation {
            request.cancellation = Some(cancellation.clone());
        }

        trace_state(AttemptState::Sending);
        let send = self.inner.transport.send(request.clone());
        let response = match request.cancellation.as_ref() {
            Some(cancellation) => cancellation
                .run_until_cancelled(send)
                .await
                .ok_or(ClientError::Cancelled)??,
            None => send.await?,
        };

        trace_state(AttemptState::Parsing);
        let ctx = BeforeParsingContext {
            client,
            request_context: scope.request_context,
            attempt: scope.attempt,
            cancellation: scope.cancellation,
            operation: &operation,
            request: &request,
        };
        let response = scope.chain.run_before_parsing(&ctx, response).await?;

        Ok(Exchange {
            operation,
            request,
            response,
        })
    }

    async fn attempt_sync<R>(&self, scope: AttemptScope<'_, C>, operation: OperationRequest) -> Result<ExecuteResult<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let Exchange {
            operation,
            request,
            response,
        } = self.exchange(&scope, operation).await?;

        let head = response.head().clone();
        let data = self
            .inner
            .parser
            .parse_sync(&operation.operation, response)
            .await?;
        let result: R = decode_result(&operation.operation, data)?;

        let ctx = AfterParsingContext {
            client: &self.inner.context,
            request_context: scope.request_context,
            attempt: scope.attempt,
            cancellation: scope.cancellation,
            operation: &operation,
            request: &request,
            response: &head,
        };
        let result = scope
            .chain
            .run_after_parsing(&ctx, ParsedResult::new(result))
            .await?
            .into_inner::<R>()?;

        Ok(ExecuteResult {
            result,
            response: head,
        })
    }

    async fn attempt_subscription<R>(
        &self,
        scope: AttemptScope<'_, C>,
        operation: OperationRequest,
    ) -> Result<ExecuteResult<SubscriptionStream<R>>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let cancellation = scope
            .cancellation
            .cloned()
            .ok_or_else(|| ClientError::middleware("subscription attempt without cancellation"))?;

        let Exchange {
            operation,
            request,
            response,
        } = self.exchange(&scope, operation).await?;

        let head = response.head().clone();
        let events = self
            .inner
            .parser
            .parse_subscription(&operation.operation, response, cancellation.clone())
            .await?;
        let stream = SubscriptionStream::<R>::provisional(events, cancellation);

        let ctx = AfterParsingContext {
            client: &self.inner.context,
            request_context: scope.request_context,
            attempt: scope.attempt,
            cancellation: scope.cancellation,
            operation: &operation,
            request: &request,
            response: &head,
        };
        let stream = scope
            .chain
            .run_after_parsing(&ctx, ParsedResult::new(stream))
            .await?
            .into_inner::<SubscriptionStream<R>>()?
            .confirm();

        Ok(ExecuteResult {
            result: stream,
            response: head,
        })
    }
}

fn decode_result<R: DeserializeOwned>(operation: &OperationDescriptor, data: serde_json::Value) -> Result<R> {
    serde_json::from_value(data).map_err(|e| {
        ClientError::Validation(format!("{} returned unexpected data: {e}", operation.name()))
    })
}
