use std::sync::Arc;
use std::time::Duration;

use rand::random_range;

use crate::config::RestartConfig;

/// Decides whether a failed worker comes back, and when.
///
/// The default is [`NeverRestart`]: a worker that fails once stays down
/// and the pool shrinks monotonically. Any other policy is an explicit
/// opt-in through configuration.
pub trait RestartPolicy: Send + Sync {
    /// Delay before restart number `restarts + 1`, or `None` to stay down.
    fn next_delay(&self, restarts: u32) -> Option<Duration>;
}

/// Fail-fast: never restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRestart;

impl RestartPolicy for NeverRestart {
    fn next_delay(&self, _restarts: u32) -> Option<Duration> {
        None
    }
}

/// Exponential backoff: `initial * 2^n`, capped at `max`.
///
/// With jitter enabled the delay is drawn from `[d/2, d]` so workers
/// that failed together do not all come back on the same tick.
#[derive(Debug, Clone, Copy)]
pub struct BackoffRestart {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_restarts: Option<u32>,
    pub jitter: bool,
}

impl BackoffRestart {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_restarts: None,
            jitter: true,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn base_delay(&self, restarts: u32) -> Duration {
        let factor = 1u32.checked_shl(restarts.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl RestartPolicy for BackoffRestart {
    fn next_delay(&self, restarts: u32) -> Option<Duration> {
        if self.max_restarts.is_some_and(|max| restarts >= max) {
            return None;
        }

        let delay = self.base_delay(restarts);
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }

        let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
        Some(Duration::from_nanos(random_range(nanos / 2..=nanos)))
    }
}

/// Builds the policy selected in the configuration.
pub fn from_config(cfg: &RestartConfig) -> Arc<dyn RestartPolicy> {
    match *cfg {
        RestartConfig::Never => Arc::new(NeverRestart),
        RestartConfig::Backoff {
            initial_delay_ms,
            max_delay_ms,
            max_restarts,
        } => {
            let mut policy = BackoffRestart::new(
                Duration::from_millis(initial_delay_ms),
                Duration::from_millis(max_delay_ms),
            );
            policy.max_restarts = max_restarts;
            Arc::new(policy)
        }
    }
}
