use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are blocked until the cooldown passes.
    Open,
    /// One trial call is allowed; its outcome decides the next state.
    HalfOpen,
}

/// Point-in-time view of a breaker, for logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Position at the time of the snapshot.
    pub state: BreakerState,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
}

/// Consecutive-failure circuit breaker guarding one strategy.
///
/// All methods take `now` explicitly and never suspend, so a caller holding
/// a lock around one of them performs an atomic read-modify-write.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    failure_count: u32,
    next_try_at: Option<Instant>,
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the breaker for `cooldown`.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: BreakerState::Closed,
            failure_count: 0,
            next_try_at: None,
        }
    }

    /// Whether a call may go through at `now`.
    ///
    /// Once an open breaker's cooldown has passed, this flips it to
    /// half-open and grants exactly one trial. Further checks are refused
    /// until the trial reports back, or until another cooldown passes
    /// without a report.
    pub fn can_try(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open | BreakerState::HalfOpen => match self.next_try_at {
                Some(at) if now < at => false,
                _ => {
                    if self.state == BreakerState::Open {
                        info!(
                            failures = self.failure_count,
                            "Circuit breaker half-open, allowing trial call"
                        );
                    }
                    self.state = BreakerState::HalfOpen;
                    self.next_try_at = Some(now + self.cooldown);
                    true
                }
            },
        }
    }

    /// A call succeeded: back to closed with a clean count, from any state.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!(previous = ?self.state, "Circuit breaker closed");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.next_try_at = None;
    }

    /// A call failed at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count >= self.threshold {
            if self.state != BreakerState::Open {
                warn!(
                    failures = self.failure_count,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            self.state = BreakerState::Open;
            self.next_try_at = Some(now + self.cooldown);
        }
    }

    /// Current position.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Copy of the state for logs and stats.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(5_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(5_000);

    fn opened(now: Instant) -> CircuitBreaker {
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);
        for _ in 0..3 {
            breaker.record_failure(now);
        }
        breaker
    }

    #[test]
    fn test_starts_closed() {
        let mut breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_try(Instant::now()));
    }

    #[test]
    fn test_opens_at_threshold() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_try(now));

        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.failure_count(), 3);
        assert!(!breaker.can_try(now));
        assert!(!breaker.can_try(now + COOLDOWN - Duration::from_millis(1)));
    }

    #[test]
    fn test_half_open_grants_single_trial() {
        let now = Instant::now();
        let mut breaker = opened(now);

        let later = now + COOLDOWN;
        assert!(breaker.can_try(later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.can_try(later), "only one trial while half-open");
    }

    #[test]
    fn test_half_open_success_closes() {
        let now = Instant::now();
        let mut breaker = opened(now);
        assert!(breaker.can_try(now + COOLDOWN));

        breaker.record_success();
        assert_eq!(breaker.snapshot(), BreakerSnapshot {
            state: BreakerState::Closed,
            failure_count: 0,
        });
        assert!(breaker.can_try(now + COOLDOWN));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let now = Instant::now();
        let mut breaker = opened(now);
        let trial_at = now + COOLDOWN;
        assert!(breaker.can_try(trial_at));

        breaker.record_failure(trial_at);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.failure_count(), 4);
        assert!(!breaker.can_try(trial_at + COOLDOWN - Duration::from_millis(1)));
        assert!(breaker.can_try(trial_at + COOLDOWN));
    }

    #[test]
    fn test_unreported_trial_is_granted_again_after_cooldown() {
        let now = Instant::now();
        let mut breaker = opened(now);
        let trial_at = now + COOLDOWN;
        assert!(breaker.can_try(trial_at));
        assert!(!breaker.can_try(trial_at + Duration::from_millis(10)));
        assert!(breaker.can_try(trial_at + COOLDOWN));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(3, COOLDOWN);
        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }
}
