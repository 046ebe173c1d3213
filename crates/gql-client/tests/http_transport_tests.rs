//! Integration tests for the HTTP transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gql_client::{
    BackoffRetry, ClientError, Executor, HttpTransport, HttpTransportBuilder, RequestContext,
    SyncOperation, Transport, WireRequest,
};
use serde_json::Value;

#[test]
fn test_transport_defaults() {
    let transport = HttpTransport::new("https://api.example.com/graphql").expect("Failed to build transport");
    assert_eq!(transport.endpoint().as_str(), "https://api.example.com/graphql");
    assert_eq!(transport.config().timeout, None);
    assert!(!transport.config().cookies_enabled);
    assert_eq!(transport.config().max_redirects, 10);
}

#[test]
fn test_transport_builder() {
    let transport = HttpTransportBuilder::new("https://api.example.com/graphql")
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(2))
        .max_redirects(0)
        .cookies()
        .user_agent("test-agent")
        .default_header("x-api-key", "secret")
        .expect("valid header")
        .build()
        .expect("Failed to build transport");

    assert_eq!(transport.config().timeout, Some(Duration::from_secs(30)));
    assert_eq!(transport.config().connect_timeout, Some(Duration::from_secs(2)));
    assert_eq!(transport.config().max_redirects, 0);
    assert!(transport.config().cookies_enabled);
    assert_eq!(transport.config().user_agent.as_deref(), Some("test-agent"));
}

#[test]
fn test_invalid_endpoint_is_rejected() {
    assert!(HttpTransport::new("not a url").is_err());
}

#[test]
fn test_invalid_default_header_is_rejected() {
    assert!(
        HttpTransport::builder("https://api.example.com/graphql")
            .default_header("bad header", "value")
            .is_err()
    );
}

const PING: SyncOperation<(), Value> = SyncOperation::query("Ping", "query Ping { ping }");

#[tokio::test]
async fn test_malformed_endpoint_override_is_not_retried() {
    let transport = HttpTransport::new("https://api.example.com/graphql").expect("Failed to build transport");
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();

    let executor = Executor::builder(move |request: WireRequest| {
        counted.fetch_add(1, Ordering::SeqCst);
        let transport = transport.clone();
        async move { transport.send(request).await }
    })
    .sync_retry(BackoffRetry::default())
    .build();

    let err = executor
        .execute_sync(&PING, &(), &RequestContext::new().endpoint("not a url"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidUrl(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "integration-tests")]
mod integration_tests {
    use super::*;
    use gql_client::{CancellationHandle, SubscriptionOperation, Upload};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Serialize)]
    struct GetUserVariables {
        id: String,
    }

    #[derive(Debug, Deserialize)]
    struct GetUserResult {
        user: Option<User>,
    }

    #[derive(Debug, Deserialize)]
    struct User {
        id: String,
        name: String,
    }

    const GET_USER: SyncOperation<GetUserVariables, GetUserResult> = SyncOperation::query(
        "GetUser",
        "query GetUser($id: ID!) { user(id: $id) { id name } }",
    );

    #[derive(Serialize)]
    struct UploadVariables {
        file: Upload,
    }

    const UPLOAD_AVATAR: SyncOperation<UploadVariables, Value> = SyncOperation::mutation(
        "UploadAvatar",
        "mutation UploadAvatar($file: Upload!) { uploadAvatar(file: $file) }",
    );

    #[derive(Debug, Deserialize)]
    struct Tick {
        tick: u32,
    }

    const ON_TICK: SubscriptionOperation<(), Tick> =
        SubscriptionOperation::new("OnTick", "subscription OnTick { tick }");

    fn executor(server: &MockServer) -> Executor {
        let transport = HttpTransport::new(format!("{}/graphql", server.uri()))
            .expect("Failed to build transport");
        Executor::builder(transport).build()
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("content-type", "application/json"))
            .and(header("accept", "application/json"))
            .and(body_json(json!({
                "query": GET_USER.descriptor().document(),
                "variables": {"id": "1"},
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"user": {"id": "1", "name": "Ada"}}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = executor(&mock_server)
            .execute_sync(
                &GET_USER,
                &GetUserVariables { id: "1".into() },
                &RequestContext::default(),
            )
            .await
            .expect("Request failed");

        let user = response.result.user.expect("user missing");
        assert_eq!(user.id, "1");
        assert_eq!(user.name, "Ada");
        assert_eq!(response.response.status, 200);
    }

    #[tokio::test]
    async fn test_context_headers_and_endpoint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant/graphql"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"user": null}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let context = RequestContext::new()
            .bearer_token("abc")
            .expect("valid token")
            .endpoint(format!("{}/tenant/graphql", mock_server.uri()));

        let response = executor(&mock_server)
            .execute_sync(&GET_USER, &GetUserVariables { id: "2".into() }, &context)
            .await
            .expect("Request failed");
        assert!(response.result.user.is_none());
    }

    #[tokio::test]
    async fn test_error_status_without_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let err = executor(&mock_server)
            .execute_sync(
                &GET_USER,
                &GetUserVariables { id: "1".into() },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::HttpStatus { status: 502, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"user": null}}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let result = executor(&mock_server)
            .execute_sync(
                &GET_USER,
                &GetUserVariables { id: "1".into() },
                &RequestContext::new().timeout(Duration::from_millis(100)),
            )
            .await;

        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn test_upload_is_sent_as_multipart() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"uploadAvatar": true}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let file = Upload::new(b"PNGDATA".to_vec())
            .with_filename("avatar.png")
            .with_content_type("image/png");
        let response = executor(&mock_server)
            .execute_sync(
                &UPLOAD_AVATAR,
                &UploadVariables { file },
                &RequestContext::default(),
            )
            .await
            .expect("Upload failed");
        assert_eq!(response.result, json!({"uploadAvatar": true}));

        let requests = mock_server.received_requests().await.expect("recording enabled");
        let request = &requests[0];
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("multipart/form-data; boundary="));

        let body = String::from_utf8_lossy(&request.body);
        let operations = body.find("name=\"operations\"").expect("operations part");
        let map = body.find("name=\"map\"").expect("map part");
        let file = body.find("name=\"0\"").expect("file part");
        assert!(operations < map && map < file);
        assert!(body.contains(r#""variables":{"file":null}"#));
        assert!(body.contains(r#"{"0":["variables.file"]}"#));
        assert!(body.contains("filename=\"avatar.png\""));
        assert!(body.to_ascii_lowercase().contains("content-type: image/png"));
        assert!(body.contains("PNGDATA"));
    }

    #[tokio::test]
    async fn test_subscription_over_sse() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"data\":{\"tick\":1}}\n\ndata: {\"data\":{\"tick\":2}}\n\n",
                "text/event-stream",
            ))
            .mount(&mock_server)
            .await;

        let mut ticks = executor(&mock_server)
            .execute_subscription(
                &ON_TICK,
                &(),
                &RequestContext::default(),
                CancellationHandle::new(),
            )
            .await
            .expect("Subscription rejected")
            .result;

        assert_eq!(ticks.next().await.unwrap().unwrap().tick, 1);
        assert_eq!(ticks.next().await.unwrap().unwrap().tick, 2);
        assert!(ticks.next().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_subscription() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = executor(&mock_server)
            .execute_subscription(
                &ON_TICK,
                &(),
                &RequestContext::default(),
                CancellationHandle::new(),
            )
            .await
            .unwrap_err();

        match err {
            ClientError::SubscriptionFraming { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("expected a framing error, got {other:?}"),
        }
    }

    /// Read one request: headers, then `content-length` bytes of body.
    async fn read_request(socket: &mut TcpStream) {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read request");
            assert!(n > 0, "client hung up before sending the request");
            received.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&received);
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if received.len() >= head_end + 4 + length {
                return;
            }
        }
    }

    /// Serve one SSE event on a raw socket, keep the response open, and
    /// report once the client closes the connection.
    async fn open_event_stream_server() -> (String, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (hung_up, on_hang_up) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;

            let event = "data: {\"data\":{\"tick\":1}}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{event}\r\n",
                event.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write response");

            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
            let _ = hung_up.send(());
        });

        (format!("http://{addr}/graphql"), on_hang_up)
    }

    async fn assert_hung_up(on_hang_up: oneshot::Receiver<()>) {
        tokio::time::timeout(Duration::from_secs(2), on_hang_up)
            .await
            .expect("connection still open")
            .expect("server task failed");
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let (endpoint, on_hang_up) = open_event_stream_server().await;
        let executor = Executor::builder(HttpTransport::new(endpoint).expect("Failed to build transport")).build();

        let mut ticks = executor
            .execute_subscription(&ON_TICK, &(), &RequestContext::default(), CancellationHandle::new())
            .await
            .expect("Subscription rejected")
            .result;
        assert_eq!(ticks.next().await.unwrap().unwrap().tick, 1);

        ticks.close();
        assert_hung_up(on_hang_up).await;
        assert!(ticks.next().await.is_none());
    }

    #[tokio::test]
    async fn test_caller_cancellation_releases_connection() {
        let (endpoint, on_hang_up) = open_event_stream_server().await;
        let executor = Executor::builder(HttpTransport::new(endpoint).expect("Failed to build transport")).build();
        let cancellation = CancellationHandle::new();

        let mut ticks = executor
            .execute_subscription(&ON_TICK, &(), &RequestContext::default(), cancellation.clone())
            .await
            .expect("Subscription rejected")
            .result;
        assert_eq!(ticks.next().await.unwrap().unwrap().tick, 1);

        cancellation.cancel();
        assert_hung_up(on_hang_up).await;
        assert!(ticks.next().await.is_none());
    }
}
