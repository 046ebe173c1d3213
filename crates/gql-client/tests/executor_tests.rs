//! Integration tests for sync operation execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gql_client::middleware::{AfterParsingContext, BeforeSerializationContext};
use gql_client::{
    CancellationHandle, ClientError, Execution, Executor, JsonSerializer, MiddlewareChain,
    Operation, OperationRequest, ParsedResult, RequestContext, SyncOperation, Upload,
    VariableValue, WireRequest, WireResponse,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize)]
struct GetUserVariables {
    id: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct GetUserResult {
    user: Option<User>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: String,
}

const GET_USER: SyncOperation<GetUserVariables, GetUserResult> =
    SyncOperation::query("GetUser", "query GetUser($id: ID!) { user(id: $id) { id } }");

#[derive(Serialize)]
struct UploadVariables {
    file: Upload,
}

const UPLOAD: SyncOperation<UploadVariables, Value> =
    SyncOperation::mutation("Upload", "mutation Upload($file: Upload!) { upload(file: $file) }");

fn request_json(request: &WireRequest) -> Value {
    serde_json::from_str(request.body.as_json().expect("expected JSON body")).unwrap()
}

/// A transport answering `GetUser` with the requested id, counting calls.
fn echo_transport(
    calls: Arc<AtomicU32>,
) -> impl Fn(WireRequest) -> std::future::Ready<gql_client::Result<WireResponse>> + Send + Sync {
    move |request: WireRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        let body = request_json(&request);
        let id = body["variables"]["id"].clone();
        std::future::ready(Ok(WireResponse::json(
            json!({"data": {"user": {"id": id}}}).to_string(),
        )))
    }
}

fn failing_transport(
    calls: Arc<AtomicU32>,
) -> impl Fn(WireRequest) -> std::future::Ready<gql_client::Result<WireResponse>> + Send + Sync {
    move |_: WireRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(ClientError::Transport("connection reset".into())))
    }
}

fn get_user(id: &str) -> GetUserVariables {
    GetUserVariables { id: id.into() }
}

#[tokio::test]
async fn test_get_user_end_to_end() {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = Executor::builder(echo_transport(calls.clone())).build();

    let response = executor
        .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
        .await
        .expect("GetUser failed");

    assert_eq!(
        response.result,
        GetUserResult {
            user: Some(User { id: "1".into() })
        }
    );
    assert_eq!(response.response.status, http::StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_graphql_errors_reject_with_message() {
    let executor = Executor::builder(|_: WireRequest| async {
        Ok(WireResponse::json(r#"{"data":null,"errors":[{"message":"boom"}]}"#))
    })
    .build();

    let err = executor
        .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::GraphQL { .. }));
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn test_mismatched_data_is_validation_error() {
    let executor = Executor::builder(|_: WireRequest| async {
        Ok(WireResponse::json(r#"{"data":{"user":{"id":42}}}"#))
    })
    .build();

    let err = executor
        .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(err.to_string().contains("GetUser"));
}

#[tokio::test]
async fn test_retry_policy_controls_attempt_count() {
    for k in 1..=4u32 {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = Executor::builder(failing_transport(calls.clone()))
            .sync_retry_fn(move |_, attempt, _| attempt < k)
            .build();

        let err = executor
            .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)), "k = {k}: {err}");
        assert_eq!(calls.load(Ordering::SeqCst), k, "k = {k}");
    }
}

#[tokio::test]
async fn test_retry_policy_sees_attempts_and_options() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicU32::new(0));
    let recorded = seen.clone();
    let executor = Executor::with_context(failing_transport(calls.clone()), "tenant-a")
        .sync_retry_fn(move |error, attempt, options| {
            recorded.lock().push((
                attempt,
                *options.client,
                options.operation.name().to_owned(),
                options.variables.get("id").cloned(),
                error.is_retryable(),
            ));
            attempt < 2
        })
        .build();

    let _ = executor
        .execute_sync(&GET_USER, &get_user("7"), &RequestContext::default())
        .await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 1);
    assert_eq!(seen[1].0, 2);
    assert_eq!(seen[0].1, "tenant-a");
    assert_eq!(seen[0].2, "GetUser");
    assert_eq!(seen[0].3, Some(VariableValue::String("7".into())));
    assert!(seen[0].4);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_serialization_errors_skip_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy_calls = Arc::new(AtomicU32::new(0));
    let counted = policy_calls.clone();
    let executor = Executor::builder(echo_transport(calls.clone()))
        .serializer(JsonSerializer)
        .sync_retry_fn(move |_, _, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            true
        })
        .build();

    let err = executor
        .execute_sync(
            &UPLOAD,
            &UploadVariables {
                file: Upload::new(vec![1u8, 2, 3]),
            },
            &RequestContext::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Serialization(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(policy_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_uploads_are_sent_as_multipart() {
    let executor = Executor::builder(|request: WireRequest| async move {
        let body = request.body.as_multipart().expect("expected multipart body");
        let names: Vec<_> = body.parts().iter().map(|p| p.name.clone()).collect();
        Ok(WireResponse::json(json!({"data": names}).to_string()))
    })
    .build();

    let response = executor
        .execute_sync(
            &UPLOAD,
            &UploadVariables {
                file: Upload::new(vec![1u8]).with_filename("a.bin"),
            },
            &RequestContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.result, json!(["operations", "map", "0"]));
}

#[tokio::test]
async fn test_middleware_stages_run_in_order() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let (l1, l2, l3, l4, l5) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());

    let chain = MiddlewareChain::<()>::new()
        .before_serialization(move |_, request: OperationRequest| {
            l1.lock().push(format!("before_serialization:{}", request.operation.name()));
            async move { Ok(request) }
        })
        .before_serialization(move |_, request: OperationRequest| {
            l2.lock().push("before_serialization:2".into());
            async move { Ok(request) }
        })
        .after_serialization(move |_, mut request: WireRequest| {
            l3.lock().push("after_serialization".into());
            async move {
                request
                    .headers
                    .insert("x-middleware", http::HeaderValue::from_static("1"));
                Ok(request)
            }
        })
        .before_parsing(move |ctx, response: WireResponse| {
            l4.lock().push(format!(
                "before_parsing:{}",
                ctx.request.headers.contains_key("x-middleware")
            ));
            async move { Ok(response) }
        })
        .after_parsing(move |ctx, result: ParsedResult| {
            l5.lock().push(format!("after_parsing:{}", ctx.response.status.as_u16()));
            async move { Ok(result) }
        });

    let executor = Executor::builder(|request: WireRequest| async move {
        assert_eq!(request.headers["x-middleware"], "1");
        Ok(WireResponse::json(r#"{"data":{"user":null}}"#))
    })
    .sync_middlewares(chain)
    .build();

    let response = executor
        .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(response.result.user, None);

    assert_eq!(
        *log.lock(),
        [
            "before_serialization:GetUser",
            "before_serialization:2",
            "after_serialization",
            "before_parsing:true",
            "after_parsing:200",
        ]
    );
}

#[tokio::test]
async fn test_after_parsing_can_modify_result() {
    let chain = MiddlewareChain::<()>::new().after_parsing(
        |_: &AfterParsingContext<'_, ()>, mut result: ParsedResult| async move {
            if let Some(GetUserResult { user: Some(user) }) = result.downcast_mut::<GetUserResult>()
            {
                user.id.push_str("-checked");
            }
            Ok(result)
        },
    );
    let executor = Executor::builder(echo_transport(Arc::new(AtomicU32::new(0))))
        .sync_middlewares(chain)
        .build();

    let response = executor
        .execute_sync(&GET_USER, &get_user("5"), &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(response.result.user.unwrap().id, "5-checked");
}

#[tokio::test]
async fn test_before_serialization_can_replace_variables() {
    let chain = MiddlewareChain::<()>::new().before_serialization(
        |_: &BeforeSerializationContext<'_, ()>, mut request: OperationRequest| async move {
            request.variables = json!({"id": "rewritten"}).into();
            Ok(request)
        },
    );
    let executor = Executor::builder(echo_transport(Arc::new(AtomicU32::new(0))))
        .sync_middlewares(chain)
        .build();

    let response = executor
        .execute_sync(&GET_USER, &get_user("1"), &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(response.result.user.unwrap().id, "rewritten");
}

#[tokio::test]
async fn test_middleware_failure_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let chain = MiddlewareChain::<()>::new().before_serialization(
        |ctx: &BeforeSerializationContext<'_, ()>, request: OperationRequest| {
            let attempt = ctx.attempt;
            async move {
                if attempt == 1 {
                    Err(ClientError::middleware("token expired"))
                } else {
                    Ok(request)
                }
            }
        },
    );
    let executor = Executor::builder(echo_transport(calls.clone()))
        .sync_middlewares(chain)
        .sync_retry_fn(|error, attempt, _| {
            attempt == 1 && matches!(error, ClientError::Middleware(_))
        })
        .build();

    let response = executor
        .execute_sync(&GET_USER, &get_user("3"), &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(response.result.user.unwrap().id, "3");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_context_reaches_transport() {
    let executor = Executor::builder(|request: WireRequest| async move {
        assert_eq!(request.headers[http::header::AUTHORIZATION], "Bearer t0k3n");
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
        Ok(WireResponse::json(r#"{"data":{"user":null}}"#))
    })
    .build();

    let context = RequestContext::new()
        .bearer_token("t0k3n")
        .unwrap()
        .timeout(Duration::from_secs(3));
    executor.execute_sync(&GET_USER, &get_user("1"), &context).await.unwrap();
}

#[tokio::test]
async fn test_sync_cancellation_aborts_transport() {
    let executor = Executor::builder(|_: WireRequest| {
        futures_util::future::pending::<gql_client::Result<WireResponse>>()
    })
    .sync_retry_fn(|_, _, _| true)
    .build();

    let cancellation = CancellationHandle::new();
    let canceller = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        executor.execute_sync(
            &GET_USER,
            &get_user("1"),
            &RequestContext::new().cancellation(cancellation),
        ),
    )
    .await
    .expect("cancellation did not abort the call");
    assert!(matches!(result, Err(ClientError::Cancelled)));
}

#[tokio::test]
async fn test_executor_is_shared_across_tasks() {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = Executor::builder(echo_transport(calls.clone())).build();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let vars = get_user(&i.to_string());
                executor
                    .execute_sync(&GET_USER, &vars, &RequestContext::default())
                    .await
                    .map(|r| r.result.user.map(|u| u.id))
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), Some(i.to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_execute_dispatches_sync_operations() {
    let executor = Executor::builder(echo_transport(Arc::new(AtomicU32::new(0)))).build();
    let operation: Operation<GetUserVariables, GetUserResult> = GET_USER.clone().into();

    let execution = executor
        .execute(&operation, &get_user("9"), &RequestContext::default(), None)
        .await
        .unwrap();
    let Execution::Value(response) = execution else {
        panic!("expected a value");
    };
    assert_eq!(response.result.user.unwrap().id, "9");
}
