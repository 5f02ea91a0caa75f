//! Feed Circuit Breaker
//!
//! Wraps upstream live-data calls. Consecutive failures open the circuit;
//! after the cooldown exactly one trial call is let through. A successful
//! trial closes the circuit, a failed one reopens it for another cooldown.

use crate::config::BreakerConfig;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Failure threshold exceeded - calls blocked
    Open,
    /// Cooldown elapsed - a single trial call allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Trip reasons for the circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripReason {
    ConsecutiveFailures(u32),
    TrialFailed(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveFailures(n) => write!(f, "{} consecutive failures", n),
            TripReason::TrialFailed(reason) => write!(f, "half-open trial failed: {}", reason),
        }
    }
}

/// Circuit breaker for one upstream feed
pub struct FeedCircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    consecutive_failures: AtomicU32,
    trial_in_flight: AtomicBool,
    last_success: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_failure: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_trip_reason: Arc<RwLock<Option<TripReason>>>,
    opened_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    total_trips: AtomicU64,
}

impl FeedCircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: AtomicU32::new(0),
            trial_in_flight: AtomicBool::new(false),
            last_success: Arc::new(RwLock::new(None)),
            last_failure: Arc::new(RwLock::new(None)),
            last_trip_reason: Arc::new(RwLock::new(None)),
            opened_at: Arc::new(RwLock::new(None)),
            total_trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: &str) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether the next upstream call may proceed.
    ///
    /// In half-open state only the first caller gets `true` until the trial
    /// is recorded.
    pub async fn should_allow(&self) -> bool {
        match self.state().await {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.cooldown_elapsed().await {
                    self.transition_to_half_open().await;
                    self.claim_trial()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    fn claim_trial(&self) -> bool {
        !self.trial_in_flight.swap(true, Ordering::SeqCst)
    }

    pub async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.last_success.write().await = Some(Utc::now());

        if self.state().await == CircuitState::HalfOpen {
            self.close().await;
        }
        debug!("[{}] upstream call succeeded", self.name);
    }

    pub async fn record_failure(&self, reason: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure.write().await = Some(Utc::now());

        warn!("[{}] upstream failure #{}: {}", self.name, failures, reason);

        if self.state().await == CircuitState::HalfOpen {
            self.trip(TripReason::TrialFailed(reason.to_string())).await;
        } else if failures >= self.config.failure_threshold {
            self.trip(TripReason::ConsecutiveFailures(failures)).await;
        }
    }

    pub async fn trip(&self, reason: TripReason) {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Utc::now());
            *self.last_trip_reason.write().await = Some(reason.clone());
            self.trial_in_flight.store(false, Ordering::SeqCst);
            self.total_trips.fetch_add(1, Ordering::SeqCst);

            warn!("[{}] circuit breaker TRIPPED: {}", self.name, reason);
        }
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            self.trial_in_flight.store(false, Ordering::SeqCst);
            info!("[{}] circuit breaker transitioning to HALF-OPEN", self.name);
        }
    }

    /// Close the circuit (resume normal operation)
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        *state = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.trial_in_flight.store(false, Ordering::SeqCst);
        *self.opened_at.write().await = None;

        info!("[{}] circuit breaker CLOSED - polling resumed", self.name);
    }

    async fn cooldown_elapsed(&self) -> bool {
        match *self.opened_at.read().await {
            Some(opened_at) => {
                let elapsed = Utc::now().signed_duration_since(opened_at).num_seconds();
                elapsed >= self.config.cooldown_secs as i64
            }
            None => true,
        }
    }

    /// Seconds left before a trial call is allowed
    pub async fn time_until_trial(&self) -> u64 {
        match *self.opened_at.read().await {
            Some(opened_at) => {
                let elapsed = Utc::now().signed_duration_since(opened_at).num_seconds() as u64;
                self.config.cooldown_secs.saturating_sub(elapsed)
            }
            None => 0,
        }
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state().await,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_success: *self.last_success.read().await,
            last_failure: *self.last_failure.read().await,
            last_trip_reason: self.last_trip_reason.read().await.clone(),
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_trip_reason: Option<TripReason>,
    pub total_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> FeedCircuitBreaker {
        FeedCircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown_secs,
            },
        )
    }

    #[tokio::test]
    async fn test_circuit_breaker_initial_state() {
        let cb = FeedCircuitBreaker::with_defaults("espn");
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.should_allow().await);
    }

    #[tokio::test]
    async fn test_trip_on_consecutive_failures() {
        let cb = breaker(3, 60);

        cb.record_failure("timeout").await;
        cb.record_failure("timeout").await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure("timeout").await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.should_allow().await);
        assert!(cb.time_until_trial().await > 0);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let cb = breaker(3, 60);

        cb.record_failure("503").await;
        cb.record_failure("503").await;
        cb.record_success().await;

        cb.record_failure("503").await;
        cb.record_failure("503").await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_allows_single_trial() {
        let cb = breaker(1, 0);
        cb.record_failure("down").await;
        assert_eq!(cb.state().await, CircuitState::Open);

        // Cooldown of zero: first caller gets the trial, the next does not
        assert!(cb.should_allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(!cb.should_allow().await);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.should_allow().await);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let cb = breaker(1, 0);
        cb.record_failure("down").await;
        assert!(cb.should_allow().await);

        cb.record_failure("still down").await;
        assert_eq!(cb.state().await, CircuitState::Open);

        let stats = cb.get_stats().await;
        assert_eq!(stats.total_trips, 2);
        assert!(matches!(
            stats.last_trip_reason,
            Some(TripReason::TrialFailed(_))
        ));
    }
}
