//! Fail-fast wrapper around unreliable async work.
//!
//! State machine: CLOSED counts failures of the tracked kind and opens at
//! the threshold; OPEN rejects calls in O(1) without scheduling the work;
//! once the recovery timeout elapses a single probe runs in HALF_OPEN and
//! either closes the circuit or re-opens it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the work was never invoked.
    #[error("circuit breaker open")]
    Open,
    /// The work ran and failed; the original error is preserved.
    #[error(transparent)]
    Inner(E),
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Predicate deciding which errors count toward opening the circuit.
/// Non-matching failures are re-raised without touching the state.
type CountsFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

pub struct CircuitBreaker<E> {
    failure_threshold: u32,
    recovery_timeout: Duration,
    counts: CountsFn<E>,
    state: Mutex<BreakerState>,
}

impl<E> CircuitBreaker<E> {
    /// Breaker counting every failure, with the given threshold and timeout.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self::with_predicate(failure_threshold, recovery_timeout, |_| true)
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    /// Breaker counting only failures matched by `counts`.
    pub fn with_predicate(
        failure_threshold: u32,
        recovery_timeout: Duration,
        counts: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            counts: Arc::new(counts),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("breaker mutex poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().expect("breaker mutex poisoned").failures
    }

    /// Run `work` through the breaker.
    ///
    /// In OPEN the call is rejected before the work is scheduled, so the
    /// rejection latency is independent of whatever the work would do.
    /// The state mutex is held only across transitions, never across the
    /// await.
    pub async fn call<T, F, Fut>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut guard = self.state.lock().expect("breaker mutex poisoned");
            if guard.state == CircuitState::Open {
                let elapsed = guard
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed <= self.recovery_timeout {
                    return Err(BreakerError::Open);
                }
                // Recovery window elapsed — let one probe through.
                guard.state = CircuitState::HalfOpen;
                tracing::debug!("circuit breaker half-open — probing");
            }
        }

        match work().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if (self.counts)(&err) {
                    self.on_failure();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn on_success(&self) {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");
        if guard.state == CircuitState::HalfOpen {
            tracing::info!("circuit breaker closed after successful probe");
        }
        guard.state = CircuitState::Closed;
        guard.failures = 0;
        guard.opened_at = None;
    }

    fn on_failure(&self) {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");
        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
                tracing::warn!("circuit breaker re-opened — probe failed");
            }
            CircuitState::Closed => {
                guard.failures += 1;
                if guard.failures >= self.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    tracing::warn!(
                        failures = guard.failures,
                        "circuit breaker opened — failure threshold reached"
                    );
                }
            }
            // A call admitted before the circuit opened can fail afterwards;
            // the circuit is already open, nothing to do.
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum WorkError {
        Transient,
        Fatal,
    }

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker<WorkError> {
        CircuitBreaker::new(threshold, Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(3, 1_000);

        for _ in 0..3 {
            let result: Result<(), _> = breaker.call(|| async { Err(WorkError::Transient) }).await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result: Result<(), _> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn open_rejection_does_not_run_slow_work() {
        let breaker = breaker(1, 10_000);
        let _ = breaker
            .call(|| async { Err::<(), _>(WorkError::Transient) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let started = Instant::now();
        let result: Result<(), _> = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "fast-fail must not await the wrapped work"
        );
    }

    #[tokio::test]
    async fn recovers_through_half_open_probe() {
        let breaker = breaker(3, 100);

        for _ in 0..3 {
            let _ = breaker
                .call(|| async { Err::<(), _>(WorkError::Transient) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(110)).await;
        let result = breaker.call(|| async { Ok(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens_circuit() {
        let breaker = breaker(1, 50);
        let _ = breaker
            .call(|| async { Err::<(), _>(WorkError::Transient) })
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let result: Result<(), _> = breaker
            .call(|| async { Err(WorkError::Transient) })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn untracked_errors_do_not_trip_the_circuit() {
        let breaker = CircuitBreaker::with_predicate(1, Duration::from_secs(60), |err| {
            matches!(err, WorkError::Transient)
        });

        for _ in 0..5 {
            let result: Result<(), _> =
                breaker.call(|| async { Err(WorkError::Fatal) }).await;
            assert!(matches!(result, Err(BreakerError::Inner(WorkError::Fatal))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = breaker
            .call(|| async { Err::<(), _>(WorkError::Transient) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = breaker(3, 1_000);
        let _ = breaker
            .call(|| async { Err::<(), _>(WorkError::Transient) })
            .await;
        let _ = breaker
            .call(|| async { Err::<(), _>(WorkError::Transient) })
            .await;
        assert_eq!(breaker.failure_count(), 2);

        let _ = breaker.call(|| async { Ok(()) }).await;
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
