use crate::domain::errors::EngineError;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - single probe allowed
}

impl CircuitState {
    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Circuit breaker wrapping every call to a fallible external collaborator.
///
/// Only transient failures (per `EngineError::is_transient`) count toward
/// the threshold; permanent errors pass through to the caller unchanged.
pub struct CircuitBreaker {
    state: Arc<RwLock<BreakerState>>,
    failure_threshold: usize,
    recovery_timeout: Duration,
    name: String,
    metrics: Option<Metrics>,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    /// # Arguments
    /// * `name` - Instance label for logs and metrics
    /// * `failure_threshold` - Consecutive transient failures before opening
    /// * `recovery_timeout` - Duration to wait before allowing a HalfOpen probe
    pub fn new(name: impl Into<String>, failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
            failure_threshold,
            recovery_timeout,
            name: name.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute a call with breaker protection.
    pub async fn call<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        // Admission check
        {
            let mut state = self.state.write().await;

            match state.state {
                CircuitState::Open => {
                    let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    if elapsed >= self.recovery_timeout {
                        info!(
                            "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (timeout elapsed)",
                            self.name
                        );
                        state.state = CircuitState::HalfOpen;
                        state.probe_in_flight = true;
                        self.record_transition("half_open", state.state);
                    } else {
                        self.record_call("rejected");
                        return Err(EngineError::BreakerOpen(self.name.clone()));
                    }
                }
                CircuitState::HalfOpen => {
                    if state.probe_in_flight {
                        // Only one probe may be in flight
                        self.record_call("rejected");
                        return Err(EngineError::BreakerOpen(self.name.clone()));
                    }
                    state.probe_in_flight = true;
                }
                CircuitState::Closed => {}
            }
        }

        match f.await {
            Ok(result) => {
                self.on_success().await;
                self.record_call("success");
                Ok(result)
            }
            Err(e) if e.is_transient() => {
                self.on_failure().await;
                self.record_call("failure");
                Err(e)
            }
            Err(e) => {
                // Permanent / validation errors do not count toward the
                // threshold but must release the probe slot.
                self.release_probe().await;
                self.record_call("passthrough_error");
                Err(e)
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        state.probe_in_flight = false;

        match state.state {
            CircuitState::HalfOpen => {
                info!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed (probe succeeded)",
                    self.name
                );
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                self.record_transition("closed", state.state);
            }
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.probe_in_flight = false;
        state.consecutive_failures += 1;

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, state.consecutive_failures
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    self.record_transition("open", state.state);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (probe failed)",
                    self.name
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                self.record_transition("open", state.state);
            }
            CircuitState::Open => {}
        }
    }

    async fn release_probe(&self) {
        let mut state = self.state.write().await;
        state.probe_in_flight = false;
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn consecutive_failures(&self) -> usize {
        self.state.read().await.consecutive_failures
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn record_call(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.breaker_calls_total
                .with_label_values(&[&self.name, outcome])
                .inc();
        }
    }

    fn record_transition(&self, to: &str, new_state: CircuitState) {
        if let Some(m) = &self.metrics {
            m.breaker_transitions_total
                .with_label_values(&[&self.name, to])
                .inc();
            m.breaker_state
                .with_label_values(&[&self.name])
                .set(new_state.gauge_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> EngineError {
        EngineError::transient("simulated network error")
    }

    #[tokio::test]
    async fn test_circuit_opens_exactly_at_threshold() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(1));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>(transient()) }).await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }

        // Third failure is exactly at the threshold
        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        // Next call fails fast without touching the callee
        let result = cb.call(async { Ok::<(), _>(()) }).await;
        assert!(matches!(result, Err(EngineError::BreakerOpen(_))));
    }

    #[tokio::test]
    async fn test_circuit_recovers_after_timeout() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Probe passes through and closes the circuit on success
        let result = cb.call(async { Ok::<(), _>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_halfopen_reopens_on_failure() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_count() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_secs(1));

        for _ in 0..5 {
            let result = cb
                .call(async { Err::<(), _>(EngineError::permanent("bad request")) })
                .await;
            assert!(matches!(result, Err(EngineError::Permanent(_))));
        }

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(1));

        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        assert_eq!(cb.consecutive_failures().await, 2);

        let _ = cb.call(async { Ok::<(), _>(()) }).await;
        assert_eq!(cb.consecutive_failures().await, 0);

        // Two more failures stay under the threshold again
        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        let _ = cb.call(async { Err::<(), _>(transient()) }).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
