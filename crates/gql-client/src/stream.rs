//! Typed subscription streams.

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use serde::de::DeserializeOwned;

use crate::cancel::CancellationHandle;
use crate::error::{ClientError, Result};
use crate::parser::EventStream;

/// Closes a [`SubscriptionStream`] from another task.
#[derive(Debug, Clone)]
pub struct StreamCloser {
    cancellation: CancellationHandle,
}

impl StreamCloser {
    /// Close the stream. Safe to call any number of times.
    pub fn close(&self) {
        if self.cancellation.cancel() {
            tracing::debug!(target: "gql_client::stream", "subscription closed");
        }
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A lazily decoded stream of subscription results.
///
/// Events are read from the response body only when the stream is polled,
/// and each `data` payload is decoded into `R` as it is yielded. The stream
/// is single-pass. It ends when the server closes the body, after the first
/// error it yields, or when it is closed.
///
/// Closing (through [`close`](Self::close), a [`StreamCloser`], the
/// cancellation handle passed to the executor, or dropping the stream)
/// aborts the underlying request, wakes a pending read so that it returns
/// `None`, and guarantees that nothing more is yielded.
///
/// # Example
///
/// ```ignore
/// let mut ticks = executor
///     .execute_subscription(&ON_TICK, &(), &RequestContext::default(), CancellationHandle::new())
///     .await?
///     .result;
///
/// while let Some(tick) = ticks.next().await {
///     println!("tick {}", tick?.tick);
/// }
/// ```
pub struct SubscriptionStream<R> {
    events: Option<EventStream>,
    closer: StreamCloser,
    close_on_drop: bool,
    _result: PhantomData<fn() -> R>,
}

impl<R> SubscriptionStream<R> {
    pub(crate) fn new(events: EventStream, cancellation: CancellationHandle) -> Self {
        Self {
            events: Some(events),
            closer: StreamCloser { cancellation },
            close_on_drop: true,
            _result: PhantomData,
        }
    }

    /// A stream that releases its body on drop but leaves the handle alone
    /// until [`confirm`](Self::confirm) is called. A stream discarded by a
    /// failed attempt must not cancel the handle the next attempt reuses.
    pub(crate) fn provisional(events: EventStream, cancellation: CancellationHandle) -> Self {
        let mut stream = Self::new(events, cancellation);
        stream.close_on_drop = false;
        stream
    }

    /// Hand the stream to the caller; dropping it now closes it.
    pub(crate) fn confirm(mut self) -> Self {
        self.close_on_drop = true;
        self
    }

    /// Close the stream. Safe to call any number of times.
    pub fn close(&self) {
        self.closer.close();
    }

    /// A handle that closes this stream from elsewhere.
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

impl<R: DeserializeOwned> SubscriptionStream<R> {
    /// Wait for the next result.
    pub async fn next(&mut self) -> Option<Result<R>> {
        futures_util::StreamExt::next(self).await
    }
}

impl<R: DeserializeOwned> Stream for SubscriptionStream<R> {
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closer.is_closed() {
            this.events = None;
            return Poll::Ready(None);
        }
        let Some(events) = this.events.as_mut() else {
            return Poll::Ready(None);
        };

        let item = match ready!(events.as_mut().poll_next(cx)) {
            Some(Ok(data)) => serde_json::from_value::<R>(data)
                .map_err(|e| ClientError::Validation(e.to_string())),
            Some(Err(error)) => Err(error),
            None => {
                this.events = None;
                return Poll::Ready(None);
            }
        };

        // Closed while the event was being read.
        if this.closer.is_closed() {
            this.events = None;
            return Poll::Ready(None);
        }
        if item.is_err() {
            this.events = None;
        }
        Poll::Ready(Some(item))
    }
}

impl<R> Drop for SubscriptionStream<R> {
    fn drop(&mut self) {
        if self.close_on_drop {
            self.closer.close();
        }
    }
}

impl<R> fmt::Debug for SubscriptionStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("closed", &self.is_closed())
            .field("finished", &self.events.is_none())
            .finish()
    }
}
