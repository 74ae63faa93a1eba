//! Resilience wrappers composable over steps and sinks alike.
//!
//! A [`ResilienceChain`] is an explicit ordered list of policies; each
//! policy wraps the one after it, with the component call innermost.
//! Every policy raises its own failure kind so callers can tell "the
//! business logic failed" from "the wrapper intervened".

mod breaker;
mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use retry::{
    BackoffStrategy, JitterStrategy, NoOpRetryListener, RetryConfig, RetryListener, RetryPolicy,
};

use crate::errors::EngineError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// A re-invocable wrapped operation.
pub type Operation<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, EngineError>> + Send + Sync>;

/// One resilience policy in a chain.
#[derive(Clone)]
pub enum ResiliencePolicy {
    /// Fail fast while the shared breaker is open.
    CircuitBreaker(Arc<CircuitBreaker>),
    /// Re-invoke on failure up to the configured attempts.
    Retry(Arc<RetryPolicy>),
    /// Bound wall-time, cancelling past the deadline.
    TimeLimit(Duration),
}

impl ResiliencePolicy {
    fn wrap<T: Send + 'static>(&self, component: Arc<str>, inner: Operation<T>) -> Operation<T> {
        match self {
            Self::CircuitBreaker(breaker) => {
                let breaker = breaker.clone();
                Arc::new(move || {
                    let breaker = breaker.clone();
                    let inner = inner.clone();
                    let component = component.clone();
                    async move {
                        breaker.try_acquire(&component)?;
                        match inner().await {
                            Ok(value) => {
                                breaker.record_success();
                                Ok(value)
                            }
                            Err(error) => {
                                breaker.record_failure();
                                Err(error)
                            }
                        }
                    }
                    .boxed()
                })
            }
            Self::Retry(policy) => {
                let policy = policy.clone();
                Arc::new(move || {
                    let policy = policy.clone();
                    let inner = inner.clone();
                    let component = component.clone();
                    async move {
                        let max_attempts = policy.config().max_attempts;
                        let mut attempts = 0;
                        loop {
                            attempts += 1;
                            match inner().await {
                                Ok(value) => {
                                    policy.notify_success(attempts);
                                    return Ok(value);
                                }
                                Err(error) => {
                                    if attempts >= max_attempts {
                                        return Err(EngineError::RetriesExhausted {
                                            component: component.to_string(),
                                            attempts,
                                            source: Box::new(error),
                                        });
                                    }
                                    tracing::debug!(
                                        component = %component,
                                        attempt = attempts,
                                        error = %error,
                                        "retrying after failure"
                                    );
                                    policy.notify_retry(attempts, &error);
                                    tokio::time::sleep(policy.config().delay_for(attempts - 1))
                                        .await;
                                }
                            }
                        }
                    }
                    .boxed()
                })
            }
            Self::TimeLimit(limit) => {
                let limit = *limit;
                Arc::new(move || {
                    let inner = inner.clone();
                    let component = component.clone();
                    async move {
                        // Run on its own task so the deadline races the
                        // call; the span keeps correlation context across
                        // the hop.
                        let mut handle =
                            tokio::spawn(inner().instrument(tracing::Span::current()));
                        match tokio::time::timeout(limit, &mut handle).await {
                            Ok(Ok(result)) => result,
                            Ok(Err(join_error)) => Err(EngineError::Join(join_error.to_string())),
                            Err(_elapsed) => {
                                handle.abort();
                                Err(EngineError::Timeout {
                                    component: component.to_string(),
                                    limit_ms: u64::try_from(limit.as_millis())
                                        .unwrap_or(u64::MAX),
                                })
                            }
                        }
                    }
                    .boxed()
                })
            }
        }
    }
}

impl std::fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitBreaker(_) => f.write_str("CircuitBreaker"),
            Self::Retry(policy) => f.debug_tuple("Retry").field(policy.config()).finish(),
            Self::TimeLimit(limit) => f.debug_tuple("TimeLimit").field(limit).finish(),
        }
    }
}

/// An ordered chain of resilience policies.
///
/// The first policy added is outermost: `retry.and_then(time_limit)`
/// retries calls that time out.
#[derive(Clone, Debug, Default)]
pub struct ResilienceChain {
    policies: Vec<ResiliencePolicy>,
}

impl ResilienceChain {
    /// Creates an empty chain that just invokes the operation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a policy inside the chain so far.
    #[must_use]
    pub fn and_then(mut self, policy: ResiliencePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Appends a circuit breaker.
    #[must_use]
    pub fn circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        self.and_then(ResiliencePolicy::CircuitBreaker(breaker))
    }

    /// Appends a retry policy.
    #[must_use]
    pub fn retry(self, policy: RetryPolicy) -> Self {
        self.and_then(ResiliencePolicy::Retry(Arc::new(policy)))
    }

    /// Appends a time limit.
    #[must_use]
    pub fn time_limit(self, limit: Duration) -> Self {
        self.and_then(ResiliencePolicy::TimeLimit(limit))
    }

    /// Returns true if no policies are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Invokes an operation through the chain.
    ///
    /// # Errors
    ///
    /// Propagates the operation's failure, or a wrapper failure kind
    /// when a policy intervenes.
    pub async fn invoke<T: Send + 'static>(
        &self,
        component: &str,
        operation: Operation<T>,
    ) -> Result<T, EngineError> {
        let component: Arc<str> = Arc::from(component);
        let mut wrapped = operation;
        for policy in self.policies.iter().rev() {
            wrapped = policy.wrap(component.clone(), wrapped);
        }
        wrapped().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_op(
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    ) -> Operation<u32> {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    Err(EngineError::business(format!("attempt {n} failed")))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        })
    }

    #[derive(Default)]
    struct CountingListener {
        retries: AtomicUsize,
        successes: AtomicUsize,
    }

    impl RetryListener for CountingListener {
        fn on_retry(&self, _attempt: usize, _error: &EngineError) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_success(&self, _attempts: usize) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_empty_chain_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResilienceChain::new();
        let result = chain.invoke("op", counting_op(calls.clone(), 0)).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = Arc::new(CountingListener::default());
        let chain = ResilienceChain::new().retry(
            RetryPolicy::new(
                RetryConfig::new()
                    .with_max_attempts(5)
                    .with_base_delay_ms(1)
                    .with_jitter(JitterStrategy::None),
            )
            .with_listener(listener.clone()),
        );

        let result = chain.invoke("flaky", counting_op(calls.clone(), 4)).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(listener.retries.load(Ordering::SeqCst), 4);
        assert_eq!(listener.successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_distinct() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResilienceChain::new().retry(RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay_ms(1)
                .with_jitter(JitterStrategy::None),
        ));

        let error = chain
            .invoke("doomed", counting_op(calls.clone(), usize::MAX))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_time_limit_cancels() {
        let chain = ResilienceChain::new().time_limit(Duration::from_millis(20));
        let op: Operation<u32> = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            }
            .boxed()
        });

        let error = chain.invoke("slow", op).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_breaker_fails_fast_when_open() {
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerConfig::new()
                .with_failure_rate(1.0)
                .with_minimum_calls(2),
        ));
        let chain = ResilienceChain::new().circuit_breaker(breaker.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let _ = chain
                .invoke("fragile", counting_op(calls.clone(), usize::MAX))
                .await;
        }
        assert!(breaker.is_open());

        let error = chain
            .invoke("fragile", counting_op(calls.clone(), usize::MAX))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_wraps_time_limit_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResilienceChain::new()
            .retry(RetryPolicy::new(
                RetryConfig::new()
                    .with_max_attempts(2)
                    .with_base_delay_ms(1)
                    .with_jitter(JitterStrategy::None),
            ))
            .time_limit(Duration::from_millis(20));

        let inner_calls = calls.clone();
        let op: Operation<u32> = Arc::new(move || {
            let calls = inner_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            }
            .boxed()
        });

        let error = chain.invoke("slow", op).await.unwrap_err();
        // The retry saw two timeouts, then gave up.
        assert_eq!(error.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
