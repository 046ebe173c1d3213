//! Retry policies.
//!
//! The executor asks the policy after every failed attempt whether to try
//! again. It adds no limit, backoff or jitter of its own: those belong to
//! the policy, which is why [`RetryPolicy::should_retry`] is async.

use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use rand::Rng;

use crate::context::RequestContext;
use crate::error::ClientError;
use crate::operation::OperationDescriptor;
use crate::variables::VariableValue;

/// What a retry policy knows about the failed call.
pub struct RetryOptions<'a, C> {
    /// The executor's client context.
    pub client: &'a C,
    /// The operation being executed.
    pub operation: &'a OperationDescriptor,
    /// The encoded variables.
    pub variables: &'a VariableValue,
    /// The caller's request context.
    pub request_context: &'a RequestContext,
}

/// Decides whether a failed attempt is retried.
pub trait RetryPolicy<C>: Send + Sync {
    /// Return `true` to run another attempt.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry<'a>(
        &'a self,
        error: &'a ClientError,
        attempt: u32,
        options: &'a RetryOptions<'a, C>,
    ) -> BoxFuture<'a, bool>;
}

/// Never retries. The default for both operation families.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<C> RetryPolicy<C> for NeverRetry {
    fn should_retry<'a>(
        &'a self,
        _error: &'a ClientError,
        _attempt: u32,
        _options: &'a RetryOptions<'a, C>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(future::ready(false))
    }
}

pub(crate) struct FnRetry<F>(pub(crate) F);

impl<C, F> RetryPolicy<C> for FnRetry<F>
where
    F: Fn(&ClientError, u32, &RetryOptions<'_, C>) -> bool + Send + Sync,
{
    fn should_retry<'a>(
        &'a self,
        error: &'a ClientError,
        attempt: u32,
        options: &'a RetryOptions<'a, C>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(future::ready((self.0)(error, attempt, options)))
    }
}

/// Configuration for [`BackoffRetry`].
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Randomize each delay between half and all of its value.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retries transient failures with capped exponential backoff.
///
/// Only errors accepted by the predicate are retried; the default predicate
/// is [`ClientError::is_retryable`].
#[derive(Clone, Debug)]
pub struct BackoffRetry {
    config: BackoffConfig,
    predicate: fn(&ClientError) -> bool,
}

impl Default for BackoffRetry {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl BackoffRetry {
    /// Create a policy from `config`.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            predicate: ClientError::is_retryable,
        }
    }

    /// Retry only errors matching `predicate`.
    pub fn retry_if(mut self, predicate: fn(&ClientError) -> bool) -> Self {
        self.predicate = predicate;
        self
    }

    /// The policy configuration.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// The delay before retrying after `attempt` failed, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.config.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

impl<C> RetryPolicy<C> for BackoffRetry {
    fn should_retry<'a>(
        &'a self,
        error: &'a ClientError,
        attempt: u32,
        options: &'a RetryOptions<'a, C>,
    ) -> BoxFuture<'a, bool> {
        if attempt > self.config.max_retries || !(self.predicate)(error) {
            return Box::pin(future::ready(false));
        }

        let delay = self.jittered(self.delay_for(attempt));
        tracing::debug!(
            target: "gql_client::retry",
            operation = options.operation.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "backing off before retry"
        );
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            true
        })
    }
}
