//! Circuit breaker wrapping outbound delivery calls.
//!
//! One breaker guards one target. It bounds every logical call to
//! `max_retries + 1` attempts, each limited by `attempt_timeout`, and stops
//! calling the target altogether once consecutive failures reach the
//! threshold.
//!
//! # Circuit Breaker State Machine
//!
//! ```text
//!                          ┌─────────────────────────┐
//!                          │        CLOSED           │
//!                          │   (Normal Operation)    │
//!                          │                         │
//!                          │ ● All attempts allowed  │
//!                          │ ● Counting failures     │
//!                          └─────────────────────────┘
//!                           │                        ▲
//!                           │                        │
//!     failure_threshold     │                        │ trial succeeds
//!     consecutive failures  │                        │
//!                           ▼                        │
//!    ┌─────────────────────────┐                  ┌───────────────────────┐
//!    │         OPEN            │                  │       HALF-OPEN       │
//!    │      (Fail Fast)        │  reset_timeout   │   (Testing Recovery)  │
//!    │                         │ ───────────────▶ │                       │
//!    │ ● All attempts rejected │                  │ ● Exactly one trial   │
//!    │ ● Target not called     │                  │ ● Others rejected     │
//!    └─────────────────────────┘                  └───────────────────────┘
//!                 ▲                                           │
//!                 │                             trial fails   │
//!                 └───────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relaykit_core::RealClock;
//! use relaykit_delivery::{
//!     circuit::{CircuitBreaker, CircuitConfig},
//!     DeliveryError,
//! };
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let breaker = CircuitBreaker::new("orders", CircuitConfig::default(), Arc::new(RealClock::new()));
//!
//! let status = breaker
//!     .execute(|attempt| async move {
//!         tracing::debug!(attempt, "calling target");
//!         Ok::<_, DeliveryError>(200_u16)
//!     })
//!     .await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use relaykit_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Retries after the first attempt of a call.
    pub max_retries: u32,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Consecutive failed attempts that open the circuit.
    pub failure_threshold: u32,
    /// Time to wait before transitioning from Open to Half-Open.
    pub reset_timeout: Duration,
    /// Delay schedule between retries of one call.
    pub retry_policy: RetryPolicy,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::with_send_attempts(3)
    }
}

impl CircuitConfig {
    /// Configuration allowing `send_attempts` attempts per call.
    ///
    /// Zero is treated as one attempt.
    pub fn with_send_attempts(send_attempts: u32) -> Self {
        Self {
            max_retries: send_attempts.saturating_sub(1),
            attempt_timeout: Duration::from_millis(3000),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Attempts allowed per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all attempts allowed.
    Closed,
    /// Target unhealthy - attempts rejected without calling it.
    Open,
    /// Testing recovery - a single trial attempt allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Statistics and state of a breaker.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    /// Current circuit state.
    pub state: CircuitState,
    /// Failed attempts since the last success or state reset.
    pub consecutive_failures: u32,
    /// Attempts that reached the target.
    pub total_attempts: u64,
    /// Attempts that failed.
    pub failed_attempts: u64,
    /// Attempts rejected because the circuit was open.
    pub rejected_attempts: u64,
    /// When circuit was last opened.
    pub last_opened_at: Option<Instant>,
    /// When circuit last changed state.
    pub last_state_change: Instant,
    /// Whether the half-open trial has been handed out.
    pub trial_in_flight: bool,
}

impl CircuitStats {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_attempts: 0,
            failed_attempts: 0,
            rejected_attempts: 0,
            last_opened_at: None,
            last_state_change: now,
            trial_in_flight: false,
        }
    }
}

/// Failure-isolation wrapper for calls to one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    stats: Mutex<CircuitStats>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        let stats = Mutex::new(CircuitStats::new(clock.now()));
        Self { name: name.into(), config, clock, stats }
    }

    /// Name used in logs and in `CircuitOpen` errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Runs `call` under the breaker.
    ///
    /// `call` receives the 1-based attempt number. Failed attempts are
    /// retried up to `max_retries` times. Errors that are not retryable end
    /// the call immediately and are returned as-is.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::CircuitOpen` if an attempt is rejected by an open
    ///   circuit; `call` is not invoked for it.
    /// - `DeliveryError::RetriesExhausted` when every allowed attempt failed.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.config.retry_policy.delay_for_retry(attempt - 1);
                if !delay.is_zero() {
                    debug!(breaker = %self.name, attempt, delay_ms = delay.as_millis(), "backing off before retry");
                    self.clock.sleep(delay).await;
                }
            }

            if !self.try_acquire().await {
                debug!(breaker = %self.name, attempt, "attempt rejected by open circuit");
                return Err(DeliveryError::circuit_open(&self.name));
            }

            let outcome = match tokio::time::timeout(self.config.attempt_timeout, call(attempt)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(DeliveryError::timeout(self.config.attempt_timeout)),
            };

            match outcome {
                Ok(value) => {
                    self.record_success().await;
                    return Ok(value);
                },
                Err(error) if !error.is_retryable() => {
                    self.release_trial().await;
                    return Err(error);
                },
                Err(error) => {
                    self.record_failure().await;
                    last_error = Some(error);
                },
            }
        }

        let last_error = match last_error {
            Some(error) => error,
            None => DeliveryError::configuration("circuit breaker made no attempts"),
        };
        Err(DeliveryError::retries_exhausted(max_attempts, last_error))
    }

    /// Current state, applying a pending Open to Half-Open transition.
    pub async fn state(&self) -> CircuitState {
        let mut stats = self.stats.lock().await;
        self.refresh(&mut stats);
        stats.state
    }

    /// Snapshot of the breaker statistics.
    pub async fn stats(&self) -> CircuitStats {
        let mut stats = self.stats.lock().await;
        self.refresh(&mut stats);
        stats.clone()
    }

    /// Forces the circuit into `state`.
    ///
    /// Forcing Open restarts the reset window; forcing Closed clears the
    /// failure count.
    pub async fn force_state(&self, state: CircuitState) {
        let mut stats = self.stats.lock().await;
        let now = self.clock.now();
        info!(breaker = %self.name, from = %stats.state, to = %state, "circuit state forced");

        stats.state = state;
        stats.last_state_change = now;
        stats.trial_in_flight = false;

        match state {
            CircuitState::Open => stats.last_opened_at = Some(now),
            CircuitState::Closed => stats.consecutive_failures = 0,
            CircuitState::HalfOpen => {},
        }
    }

    /// Admits or rejects one attempt.
    async fn try_acquire(&self) -> bool {
        let mut stats = self.stats.lock().await;
        self.refresh(&mut stats);

        let admitted = match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen if stats.trial_in_flight => false,
            CircuitState::HalfOpen => {
                stats.trial_in_flight = true;
                true
            },
        };

        if !admitted {
            stats.rejected_attempts += 1;
        }
        admitted
    }

    async fn record_success(&self) {
        let mut stats = self.stats.lock().await;
        stats.total_attempts += 1;
        stats.consecutive_failures = 0;

        match stats.state {
            CircuitState::Closed => {},
            CircuitState::Open => {
                warn!(breaker = %self.name, "recorded success for open circuit");
            },
            CircuitState::HalfOpen => self.transition_to_closed(&mut stats),
        }
    }

    async fn record_failure(&self) {
        let mut stats = self.stats.lock().await;
        stats.total_attempts += 1;
        stats.failed_attempts += 1;
        stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);

        match stats.state {
            CircuitState::Closed => {
                if stats.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(&mut stats);
                }
            },
            CircuitState::Open => {},
            CircuitState::HalfOpen => self.transition_to_open(&mut stats),
        }
    }

    /// Returns an unused half-open trial.
    async fn release_trial(&self) {
        let mut stats = self.stats.lock().await;
        if stats.state == CircuitState::HalfOpen {
            stats.trial_in_flight = false;
        }
    }

    fn refresh(&self, stats: &mut CircuitStats) {
        if stats.state != CircuitState::Open {
            return;
        }

        let reset_due = stats.last_opened_at.map_or(true, |opened_at| {
            self.clock.now().saturating_duration_since(opened_at) >= self.config.reset_timeout
        });
        if reset_due {
            self.transition_to_half_open(stats);
        }
    }

    fn transition_to_open(&self, stats: &mut CircuitStats) {
        warn!(
            breaker = %self.name,
            consecutive_failures = stats.consecutive_failures,
            reset_timeout_ms = self.config.reset_timeout.as_millis(),
            "circuit breaker opening"
        );

        let now = self.clock.now();
        stats.state = CircuitState::Open;
        stats.last_opened_at = Some(now);
        stats.last_state_change = now;
        stats.trial_in_flight = false;
    }

    fn transition_to_half_open(&self, stats: &mut CircuitStats) {
        info!(breaker = %self.name, "circuit breaker transitioning to half-open");

        stats.state = CircuitState::HalfOpen;
        stats.last_state_change = self.clock.now();
        stats.trial_in_flight = false;
    }

    fn transition_to_closed(&self, stats: &mut CircuitStats) {
        info!(breaker = %self.name, "circuit breaker closing - target recovered");

        stats.state = CircuitState::Closed;
        stats.last_state_change = self.clock.now();
        stats.consecutive_failures = 0;
        stats.trial_in_flight = false;
    }
}
