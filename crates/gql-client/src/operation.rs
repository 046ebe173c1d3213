//! Operation descriptors.
//!
//! Generated code emits one descriptor per GraphQL operation. A descriptor
//! pairs the operation name and document with the Rust types used to encode
//! its variables and decode its result:
//!
//! ```ignore
//! #[derive(Serialize)]
//! pub struct GetUserVariables { pub id: String }
//!
//! #[derive(Deserialize)]
//! pub struct GetUserResult { pub user: Option<User> }
//!
//! pub const GET_USER: SyncOperation<GetUserVariables, GetUserResult> =
//!     SyncOperation::query("GetUser", "query GetUser($id: ID!) { user(id: $id) { id } }");
//! ```

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::variables::VariableValue;

/// The kind of a GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    /// A read operation.
    Query,
    /// A write operation.
    Mutation,
    /// A long-lived operation delivering a stream of results.
    Subscription,
}

impl OperationKind {
    /// Whether operations of this kind produce a stream.
    pub fn is_subscription(self) -> bool {
        matches!(self, Self::Subscription)
    }

    /// The upper-case name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "QUERY",
            Self::Mutation => "MUTATION",
            Self::Subscription => "SUBSCRIPTION",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The untyped part of an operation: what serializers, parsers and
/// middleware see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    name: Cow<'static, str>,
    document: Cow<'static, str>,
    kind: OperationKind,
}

impl OperationDescriptor {
    /// Create a descriptor from borrowed static strings.
    pub const fn new_static(name: &'static str, document: &'static str, kind: OperationKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            document: Cow::Borrowed(document),
            kind,
        }
    }

    /// Create a descriptor from owned or borrowed strings.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        document: impl Into<Cow<'static, str>>,
        kind: OperationKind,
    ) -> Self {
        Self {
            name: name.into(),
            document: document.into(),
            kind,
        }
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The GraphQL document text.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Replace the document, keeping name and kind.
    ///
    /// Useful for middleware that rewrites documents (for example to strip
    /// client-only directives).
    pub fn with_document(mut self, document: impl Into<Cow<'static, str>>) -> Self {
        self.document = document.into();
        self
    }
}

/// A typed query or mutation descriptor.
pub struct SyncOperation<V, R> {
    descriptor: OperationDescriptor,
    _codecs: PhantomData<fn(&V) -> R>,
}

impl<V, R> SyncOperation<V, R> {
    /// Describe a query.
    pub const fn query(name: &'static str, document: &'static str) -> Self {
        Self {
            descriptor: OperationDescriptor::new_static(name, document, OperationKind::Query),
            _codecs: PhantomData,
        }
    }

    /// Describe a mutation.
    pub const fn mutation(name: &'static str, document: &'static str) -> Self {
        Self {
            descriptor: OperationDescriptor::new_static(name, document, OperationKind::Mutation),
            _codecs: PhantomData,
        }
    }

    /// The untyped descriptor.
    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }
}

/// A typed subscription descriptor.
pub struct SubscriptionOperation<V, R> {
    descriptor: OperationDescriptor,
    _codecs: PhantomData<fn(&V) -> R>,
}

impl<V, R> SubscriptionOperation<V, R> {
    /// Describe a subscription.
    pub const fn new(name: &'static str, document: &'static str) -> Self {
        Self {
            descriptor: OperationDescriptor::new_static(
                name,
                document,
                OperationKind::Subscription,
            ),
            _codecs: PhantomData,
        }
    }

    /// The untyped descriptor.
    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }
}

// Manual impls: derives would demand `V: Clone` and `R: Clone`.
impl<V, R> Clone for SyncOperation<V, R> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _codecs: PhantomData,
        }
    }
}

impl<V, R> Clone for SubscriptionOperation<V, R> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _codecs: PhantomData,
        }
    }
}

impl<V, R> fmt::Debug for SyncOperation<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOperation")
            .field("name", &self.descriptor.name())
            .field("kind", &self.descriptor.kind())
            .finish()
    }
}

impl<V, R> fmt::Debug for SubscriptionOperation<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOperation")
            .field("name", &self.descriptor.name())
            .finish()
    }
}

/// Either kind of typed operation.
pub enum Operation<V, R> {
    /// A query or mutation.
    Sync(SyncOperation<V, R>),
    /// A subscription.
    Subscription(SubscriptionOperation<V, R>),
}

impl<V, R> Operation<V, R> {
    /// The untyped descriptor.
    pub fn descriptor(&self) -> &OperationDescriptor {
        match self {
            Self::Sync(op) => op.descriptor(),
            Self::Subscription(op) => op.descriptor(),
        }
    }
}

impl<V, R> From<SyncOperation<V, R>> for Operation<V, R> {
    fn from(op: SyncOperation<V, R>) -> Self {
        Self::Sync(op)
    }
}

impl<V, R> From<SubscriptionOperation<V, R>> for Operation<V, R> {
    fn from(op: SubscriptionOperation<V, R>) -> Self {
        Self::Subscription(op)
    }
}

/// An operation together with its encoded variables.
///
/// This is the value threaded through the `before_serialization` middleware
/// stage and handed to the serializer.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// The operation descriptor.
    pub operation: OperationDescriptor,
    /// The encoded variables.
    pub variables: VariableValue,
}

impl OperationRequest {
    /// Pair an operation with its variables.
    pub fn new(operation: OperationDescriptor, variables: VariableValue) -> Self {
        Self {
            operation,
            variables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_USER: SyncOperation<(), ()> =
        SyncOperation::query("GetUser", "query GetUser { user { id } }");
    const ON_TICK: SubscriptionOperation<(), ()> =
        SubscriptionOperation::new("OnTick", "subscription OnTick { tick }");

    #[test]
    fn test_const_descriptors() {
        assert_eq!(GET_USER.descriptor().name(), "GetUser");
        assert_eq!(GET_USER.descriptor().kind(), OperationKind::Query);
        assert!(ON_TICK.descriptor().kind().is_subscription());
        assert_eq!(
            SyncOperation::<(), ()>::mutation("M", "mutation M { x }")
                .descriptor()
                .kind(),
            OperationKind::Mutation
        );
    }

    #[test]
    fn test_kind_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&OperationKind::Subscription).unwrap(),
            "\"SUBSCRIPTION\""
        );
        assert_eq!(OperationKind::Query.to_string(), "QUERY");
    }

    #[test]
    fn test_with_document_keeps_kind() {
        let descriptor = ON_TICK.descriptor().clone().with_document("subscription OnTick { tock }");
        assert_eq!(descriptor.kind(), OperationKind::Subscription);
        assert_eq!(descriptor.document(), "subscription OnTick { tock }");
        assert_eq!(descriptor.name(), "OnTick");
    }

    #[test]
    fn test_operation_dispatch_descriptor() {
        let op: Operation<(), ()> = ON_TICK.clone().into();
        assert!(matches!(op, Operation::Subscription(_)));
        assert_eq!(op.descriptor().name(), "OnTick");
    }
}
