//! Bounded exponential backoff, used uniformly by the output runner and any
//! transport-facing runner (§4.4).

use std::time::Duration;

use tokio::time::sleep;

use super::RunnerContext;

/// Static configuration for a retry helper.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
            multiplier: 2.0,
        }
    }
}

/// Tracks the current backoff state across a sequence of retries of one
/// operation.
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    next_delay: Duration,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryState {
            next_delay: policy.initial_delay,
            policy,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_retries
    }

    /// Sleeps for the current backoff delay, then advances it, unless the
    /// runner's stop signal fires first, in which case this returns early
    /// with `false` so the caller can abandon the retry loop on shutdown.
    pub async fn wait(&mut self, ctx: &RunnerContext) -> bool {
        self.attempt += 1;
        tokio::select! {
            biased;
            _ = ctx.stopped() => false,
            _ = sleep(self.next_delay) => {
                let scaled = self.next_delay.mul_f64(self.policy.multiplier);
                self.next_delay = scaled.min(self.policy.max_delay);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.policy.initial_delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackPool;
    use crate::router::Router;

    fn ctx() -> RunnerContext {
        let pool = PackPool::new(1);
        let router = Router::new(pool.clone(), 1);
        let handle = router.handle();
        RunnerContext::new(pool, handle)
    }

    #[tokio::test]
    async fn wait_advances_delay_and_counts_attempts() {
        let mut state = RetryState::new(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_retries: 3,
            multiplier: 2.0,
        });
        let c = ctx();
        assert!(state.wait(&c).await);
        assert_eq!(state.attempt(), 1);
        assert!(!state.exhausted());
        assert!(state.wait(&c).await);
        assert!(state.wait(&c).await);
        assert!(state.exhausted());
    }

    #[tokio::test]
    async fn stop_signal_cancels_wait() {
        let mut state = RetryState::new(RetryPolicy {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        });
        let c = ctx();
        c.request_stop();
        assert!(!state.wait(&c).await);
    }
}
