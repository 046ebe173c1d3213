//! Server-Sent Events decoding for subscription bodies.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;

use super::{ErrorHandler, EventStream, resolve_envelope};
use crate::cancel::CancellationHandle;
use crate::error::{ClientError, Result};
use crate::operation::OperationDescriptor;
use crate::response::Envelope;
use crate::wire::ByteStream;

/// Splits a byte stream into lines, buffering partial lines across chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// The next complete line, without its `\n` or `\r\n` terminator.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the body has ended.
    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_owned())
    }
}

/// The payload of a `data:` line, or `None` for any other line.
fn data_payload(line: &str) -> Option<&str> {
    let (field, value) = line.split_once(':')?;
    (field == "data").then_some(value)
}

struct EventReader {
    body: ByteStream,
    lines: LineBuffer,
    body_done: bool,
    cancellation: CancellationHandle,
    error_handler: Arc<dyn ErrorHandler>,
    operation: OperationDescriptor,
}

impl EventReader {
    /// Pull until the next `data:` event, the end of the body, or
    /// cancellation.
    async fn next_event(&mut self) -> Option<Result<Value>> {
        loop {
            if self.cancellation.is_cancelled() {
                return None;
            }

            let line = match self.lines.next_line() {
                Some(line) => line,
                None if self.body_done => self.lines.take_remainder()?,
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancellation.cancelled() => return None,
                        chunk = self.body.next() => match chunk {
                            Some(Ok(bytes)) => self.lines.push(&bytes),
                            Some(Err(error)) => return Some(Err(error)),
                            None => self.body_done = true,
                        },
                    }
                    continue;
                }
            };

            tracing::trace!(target: "gql_client::sse", line = %line, "event line");
            if let Some(payload) = data_payload(&line) {
                return Some(self.decode(payload));
            }
        }
    }

    fn decode(&self, payload: &str) -> Result<Value> {
        let envelope: Envelope = serde_json::from_str(payload.trim())
            .map_err(|e| ClientError::InvalidBody(format!("malformed event payload: {e}")))?;
        resolve_envelope(&*self.error_handler, &self.operation, envelope)
    }
}

/// Build the lazy payload stream for a subscription body.
///
/// Each `data:` line yields its `data` member; other lines are ignored. The
/// stream ends with the body or on cancellation, and stops after the first
/// error it yields. Nothing is read until the stream is polled.
pub(super) fn event_stream(
    body: ByteStream,
    cancellation: CancellationHandle,
    error_handler: Arc<dyn ErrorHandler>,
    operation: OperationDescriptor,
) -> EventStream {
    let reader = EventReader {
        body,
        lines: LineBuffer::default(),
        body_done: false,
        cancellation,
        error_handler,
        operation,
    };

    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        match reader.next_event().await {
            Some(Ok(data)) => Some((Ok(data), Some(reader))),
            Some(Err(error)) => Some((Err(error), None)),
            None => {
                tracing::debug!(
                    target: "gql_client::sse",
                    operation = reader.operation.name(),
                    cancelled = reader.cancellation.is_cancelled(),
                    "event stream finished"
                );
                None
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::parser::RaiseOnErrors;
    use bytes::Bytes;
    use serde_json::json;

    fn body(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|&c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    fn events(body: ByteStream, cancellation: CancellationHandle) -> EventStream {
        event_stream(
            body,
            cancellation,
            Arc::new(RaiseOnErrors),
            OperationDescriptor::new("OnTick", "subscription OnTick { tick }", OperationKind::Subscription),
        )
    }

    #[test]
    fn test_line_buffer_handles_split_lines() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: {\"a\"");
        assert_eq!(lines.next_line(), None);
        lines.push(b":1}\r\nevent: x\n");
        assert_eq!(lines.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(lines.next_line().as_deref(), Some("event: x"));
        assert_eq!(lines.next_line(), None);
        lines.push(b"tail");
        assert_eq!(lines.take_remainder().as_deref(), Some("tail"));
        assert_eq!(lines.take_remainder(), None);
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let snowman = "☃".as_bytes();
        let mut lines = LineBuffer::default();
        lines.push(&snowman[..1]);
        lines.push(&snowman[1..]);
        lines.push(b"\n");
        assert_eq!(lines.next_line().as_deref(), Some("☃"));
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {}"), Some(" {}"));
        assert_eq!(data_payload("data:{\"a\":\"b:c\"}"), Some("{\"a\":\"b:c\"}"));
        assert_eq!(data_payload("event: next"), None);
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("data"), None);
    }

    #[tokio::test]
    async fn test_yields_data_and_skips_other_lines() {
        let mut stream = events(
            body(&[
                ": ping\n",
                "event: next\ndata: {\"data\":{\"tick\":1}}\n\n",
                "id: 2\ndata: {\"data\":{\"ti",
                "ck\":2}}\n",
            ]),
            CancellationHandle::new(),
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"tick": 1}));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"tick": 2}));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let mut stream = events(body(&["data: {\"data\":7}"]), CancellationHandle::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), json!(7));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_event_ends_stream() {
        let mut stream = events(
            body(&["data: {oops\n", "data: {\"data\":1}\n"]),
            CancellationHandle::new(),
        );
        assert!(matches!(stream.next().await, Some(Err(ClientError::InvalidBody(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_errors_go_through_handler() {
        let mut stream = events(
            body(&["data: {\"errors\":[{\"message\":\"boom\"}]}\n"]),
            CancellationHandle::new(),
        );
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_pending_read() {
        let cancellation = CancellationHandle::new();
        let mut stream = events(stream::pending().boxed(), cancellation.clone());

        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let next = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("pending read was not unblocked");
        assert!(next.is_none());
    }
}
