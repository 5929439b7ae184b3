//! Bounded linear backoff for socket reconnects.

use std::time::Duration;

use crate::config::ServerConfig;

/// Reconnect schedule: attempt `n` (1-based) waits `min(n * base, max_delay)`.
/// After `max_attempts` consecutive failures [`next_delay`] returns `None`
/// and the caller gives up.
///
/// [`next_delay`]: ReconnectPolicy::next_delay
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Step added per attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Consecutive attempts allowed.
    pub max_attempts: u32,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(5_000), 3)
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_max_ms),
            config.max_reconnect_attempts,
        )
    }

    /// Consume one attempt and return its delay, or `None` when the budget
    /// is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay.saturating_mul(self.attempt).min(self.max_delay))
    }

    /// Attempts consumed since the last [`reset`](Self::reset).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Called when a connection opens successfully.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly_then_stop() {
        let mut p = ReconnectPolicy::default();
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1_000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(3_000)));
        assert_eq!(p.next_delay(), None);
        assert!(p.is_exhausted());
    }

    #[test]
    fn delay_is_capped() {
        let mut p = ReconnectPolicy::new(Duration::from_millis(1_000), Duration::from_millis(5_000), 10);
        let delays: Vec<_> = std::iter::from_fn(|| p.next_delay()).collect();
        assert_eq!(delays.len(), 10);
        assert_eq!(delays[4], Duration::from_millis(5_000));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(5_000)));
    }

    #[test]
    fn reset_restores_budget() {
        let mut p = ReconnectPolicy::default();
        let _ = p.next_delay();
        let _ = p.next_delay();
        p.reset();
        assert_eq!(p.attempt(), 0);
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1_000)));
    }
}
