//! Typed GraphQL operation executor.
//!
//! This crate runs GraphQL operations described by generated, typed
//! descriptors:
//!
//! - **Serialization**: JSON bodies, or GraphQL multipart requests when the
//!   variables carry file [`Upload`]s
//! - **Transport**: any [`Transport`]; [`HttpTransport`] uses `reqwest`
//! - **Parsing**: JSON responses for queries and mutations, Server-Sent
//!   Events for subscriptions
//! - **Middleware**: four async stages around serialization and parsing
//! - **Retry**: pluggable policies, separate for sync operations and
//!   subscriptions
//!
//! # Queries and Mutations
//!
//! ```ignore
//! use gql_client::{Executor, HttpTransport, RequestContext, SyncOperation};
//!
//! #[derive(Serialize)]
//! struct GetUserVariables { id: String }
//!
//! #[derive(Deserialize)]
//! struct GetUserResult { user: Option<User> }
//!
//! const GET_USER: SyncOperation<GetUserVariables, GetUserResult> =
//!     SyncOperation::query("GetUser", "query GetUser($id: ID!) { user(id: $id) { id name } }");
//!
//! let executor = Executor::builder(HttpTransport::new("https://api.example.com/graphql")?).build();
//!
//! let response = executor
//!     .execute_sync(&GET_USER, &GetUserVariables { id: "1".into() }, &RequestContext::default())
//!     .await?;
//! println!("{:?} (HTTP {})", response.result.user, response.response.status);
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! const ON_TICK: SubscriptionOperation<(), Tick> =
//!     SubscriptionOperation::new("OnTick", "subscription OnTick { tick }");
//!
//! let cancellation = CancellationHandle::new();
//! let mut ticks = executor
//!     .execute_subscription(&ON_TICK, &(), &RequestContext::default(), cancellation.clone())
//!     .await?
//!     .result;
//!
//! while let Some(tick) = ticks.next().await {
//!     let tick = tick?;
//!     if tick.tick == 10 {
//!         ticks.close();
//!     }
//! }
//! ```
//!
//! # File Uploads
//!
//! ```ignore
//! #[derive(Serialize)]
//! struct UploadVariables { file: Upload }
//!
//! let file = Upload::new(std::fs::read("avatar.png")?)
//!     .with_filename("avatar.png")
//!     .with_content_type("image/png");
//!
//! // Sent as multipart/form-data automatically.
//! executor
//!     .execute_sync(&UPLOAD_AVATAR, &UploadVariables { file }, &RequestContext::default())
//!     .await?;
//! ```
//!
//! # Middleware and Retry
//!
//! ```ignore
//! let executor = Executor::with_context(transport, AppContext::default())
//!     .sync_middlewares(MiddlewareChain::new().after_serialization(
//!         |ctx: &AfterSerializationContext<'_, AppContext>, mut request: WireRequest| {
//!             let token = ctx.client.token();
//!             async move {
//!                 request.headers.insert(AUTHORIZATION, token.parse().map_err(ClientError::middleware)?);
//!                 Ok(request)
//!             }
//!         },
//!     ))
//!     .sync_retry(BackoffRetry::default())
//!     .build();
//! ```

#![forbid(unsafe_code)]

mod cancel;
mod context;
mod error;
mod executor;
pub mod middleware;
mod operation;
pub mod parser;
mod response;
pub mod retry;
pub mod serializer;
mod stream;
pub mod transport;
mod variables;
pub mod wire;

pub use cancel::CancellationHandle;
pub use context::RequestContext;
pub use error::{ClientError, Result};
pub use executor::{AttemptState, ExecuteResult, Execution, Executor, ExecutorBuilder};
pub use middleware::{MiddlewareChain, ParsedResult};
pub use operation::{
    Operation, OperationDescriptor, OperationKind, OperationRequest, SubscriptionOperation,
    SyncOperation,
};
pub use parser::{AcceptPartialData, DefaultParser, ErrorHandler, RaiseOnErrors};
pub use response::{GraphQLError, GraphQLLocation, PathSegment};
pub use retry::{BackoffConfig, BackoffRetry, NeverRetry, RetryOptions, RetryPolicy};
pub use serializer::{JsonSerializer, MultipartSerializer, SelectingSerializer};
pub use stream::{StreamCloser, SubscriptionStream};
pub use transport::{HttpTransport, HttpTransportBuilder, HttpTransportConfig, Transport};
pub use variables::{Upload, VariableMap, VariableValue, to_variables};
pub use wire::{ResponseBody, ResponseHead, WireBody, WireRequest, WireResponse};
