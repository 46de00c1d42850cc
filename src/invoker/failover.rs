//! Failover: bounded retries of a base invoker.
//!
//! # Responsibilities
//! - Run up to `max_attempts` sequential attempts, each resolving a fresh endpoint
//! - Keep the total elapsed time within `retry_timeout`
//! - Stop as soon as an external cancellation is observed
//!
//! # Design Decisions
//! - Only retryable failures (no endpoint, unavailable, connection) trigger another attempt
//! - An attempt still running when the budget elapses is dropped, which releases it
//! - Budget exhaustion surfaces the last failure, or `Timeout` if there was none
//! - Backoff between attempts never exceeds the remaining budget

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::time::Instant;

use crate::context::RequestContext;
use crate::invoker::cancel::CancelSignal;
use crate::invoker::connector::BodyStream;
use crate::invoker::{Invocation, InvokeError, Invoker};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Retry bounds of a [`FailoverInvoker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverOptions {
    /// Total attempts, including the first. 1 disables failover.
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts.
    pub retry_timeout: Duration,
    /// Base backoff between attempts (zero = retry immediately).
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_timeout: Duration::from_secs(10),
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps an invoker with failover.
#[derive(Debug)]
pub struct FailoverInvoker<I> {
    inner: I,
    options: FailoverOptions,
}

impl<I: Invoker> FailoverInvoker<I> {
    pub fn new(inner: I, options: FailoverOptions) -> Self {
        Self { inner, options }
    }

    pub fn options(&self) -> &FailoverOptions {
        &self.options
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    async fn invoke_with_failover(
        &self,
        ctx: &mut RequestContext,
        body: &mut BodyStream,
    ) -> Result<Invocation, InvokeError> {
        let deadline = Instant::now() + self.options.retry_timeout;
        let max_attempts = self.options.max_attempts.max(1);
        let cancel = ctx.cancel_signal().cloned();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
                return Err(InvokeError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let outcome = {
                let attempt_future = tokio::time::timeout(remaining, self.inner.invoke(&mut *ctx, &mut *body));
                match &cancel {
                    Some(signal) => tokio::select! {
                        outcome = attempt_future => Some(outcome),
                        _ = signal.cancelled() => None,
                    },
                    None => Some(attempt_future.await),
                }
            };

            let error = match outcome {
                None => {
                    tracing::info!(request_id = %ctx.request_id(), attempt, "Invocation cancelled");
                    return Err(InvokeError::Cancelled);
                }
                Some(Err(_elapsed)) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        attempt,
                        timeout = ?self.options.retry_timeout,
                        "Retry budget elapsed during attempt"
                    );
                    break;
                }
                Some(Ok(Ok(mut invocation))) => {
                    invocation.attempts = attempt;
                    return Ok(invocation);
                }
                Some(Ok(Err(error))) => error,
            };

            if !error.is_retryable() || attempt == max_attempts {
                return Err(error);
            }

            let delay = calculate_backoff(attempt, self.options.base_delay, self.options.max_delay)
                .min(deadline.saturating_duration_since(Instant::now()));
            tracing::info!(
                request_id = %ctx.request_id(),
                attempt,
                max_attempts,
                delay = ?delay,
                error = %error,
                "Retrying invocation"
            );
            metrics::record_failover_attempt(self.inner.id());
            last_error = Some(error);

            if !delay.is_zero() {
                match &cancel {
                    Some(signal) => tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = signal.cancelled() => return Err(InvokeError::Cancelled),
                    },
                    None => tokio::time::sleep(delay).await,
                }
            }
        }

        Err(last_error.unwrap_or(InvokeError::Timeout))
    }
}

impl<I: Invoker> Invoker for FailoverInvoker<I> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        body: &'a mut BodyStream,
    ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
        self.invoke_with_failover(ctx, body).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::cancel::Cancellation;
    use crate::invoker::connector::tests::RefusingConnector;
    use crate::invoker::connector::{BackendResponse, BodyError, ConnectorError};
    use crate::load_balancer::endpoint::{EndpointDefinition, ManagedEndpoint};
    use axum::http::{Method, StatusCode};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails with a connection error until attempt `succeed_on`.
    struct FlakyInvoker {
        calls: AtomicU32,
        succeed_on: u32,
        delay: Duration,
    }

    impl FlakyInvoker {
        fn new(succeed_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
                delay: Duration::ZERO,
            }
        }
    }

    impl Invoker for FlakyInvoker {
        fn id(&self) -> &str {
            "flaky"
        }

        fn invoke<'a>(
            &'a self,
            _ctx: &'a mut RequestContext,
            _body: &'a mut BodyStream,
        ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
            async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.delay).await;
                if call < self.succeed_on {
                    return Err(InvokeError::Connection {
                        endpoint: format!("e{call}"),
                        source: ConnectorError::Refused(format!("e{call}")),
                    });
                }
                Ok(Invocation {
                    endpoint: Arc::new(ManagedEndpoint::new(
                        EndpointDefinition::new("ok", "http://ok", 1),
                        Arc::new(RefusingConnector),
                    )),
                    response: BackendResponse::empty(StatusCode::OK),
                    bytes_sent: 0,
                    attempts: 1,
                })
            }
            .boxed()
        }
    }

    fn options(max_attempts: u32) -> FailoverOptions {
        FailoverOptions {
            max_attempts,
            ..FailoverOptions::default()
        }
    }

    fn empty_body() -> BodyStream {
        Box::pin(futures_util::stream::empty::<Result<Bytes, BodyError>>())
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let invoker = FailoverInvoker::new(FlakyInvoker::new(3), options(3));
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        let invocation = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap();
        assert_eq!(invocation.attempts, 3);
        assert_eq!(invoker.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_last_failure() {
        let invoker = FailoverInvoker::new(FlakyInvoker::new(3), options(2));
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        let err = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Connection { ref endpoint, .. } if endpoint == "e2"));
        assert_eq!(invoker.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        struct Malformed;
        impl Invoker for Malformed {
            fn id(&self) -> &str {
                "malformed"
            }
            fn invoke<'a>(
                &'a self,
                _ctx: &'a mut RequestContext,
                _body: &'a mut BodyStream,
            ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
                async { Err(InvokeError::MalformedRequest("bad target".into())) }.boxed()
            }
        }

        let invoker = FailoverInvoker::new(Malformed, options(5));
        let mut ctx = RequestContext::new("api", Method::GET, "/");
        let err = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_budget_spans_attempts() {
        let mut flaky = FlakyInvoker::new(10);
        flaky.delay = Duration::from_secs(4);
        let invoker = FailoverInvoker::new(
            flaky,
            FailoverOptions {
                max_attempts: 10,
                retry_timeout: Duration::from_secs(10),
                ..FailoverOptions::default()
            },
        );
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        let err = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap_err();
        // Attempts at t=0 and t=4 fail, the one at t=8 is cut off at t=10
        assert!(matches!(err, InvokeError::Connection { ref endpoint, .. } if endpoint == "e2"));
        assert_eq!(invoker.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_failure() {
        let mut slow = FlakyInvoker::new(1);
        slow.delay = Duration::from_secs(60);
        let invoker = FailoverInvoker::new(slow, options(3));
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        let err = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Timeout));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancellation = Cancellation::new();
        let mut ctx = RequestContext::new("api", Method::GET, "/").with_cancel_signal(cancellation.signal());
        cancellation.cancel();

        let invoker = FailoverInvoker::new(FlakyInvoker::new(1), options(3));
        let err = invoker.invoke(&mut ctx, &mut empty_body()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));
        assert_eq!(invoker.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_in_flight_attempt() {
        let mut slow = FlakyInvoker::new(1);
        slow.delay = Duration::from_secs(5);
        let invoker = Arc::new(FailoverInvoker::new(slow, options(3)));
        let cancellation = Cancellation::new();
        let mut ctx = RequestContext::new("api", Method::GET, "/").with_cancel_signal(cancellation.signal());

        let task = tokio::spawn({
            let invoker = invoker.clone();
            async move {
                let mut body = empty_body();
                let result = invoker.invoke(&mut ctx, &mut body).await;
                result
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancellation.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));
        assert_eq!(invoker.inner().calls.load(Ordering::SeqCst), 1);
    }
}
