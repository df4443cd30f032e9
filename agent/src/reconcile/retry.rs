//! Cancellable fixed-interval retry

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Receiver side of the agent-wide shutdown flag
pub type ShutdownRx = watch::Receiver<bool>;

/// Resolves once shutdown has been requested.
///
/// Never resolves if the sender is gone without having requested it.
pub async fn shutdown_requested(shutdown: &mut ShutdownRx) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// How a retry loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The attempt with this 1-based number succeeded
    Succeeded { attempt: u32 },
    Exhausted,
    Cancelled,
}

/// Up to `attempts` tries, `interval` apart. Not exponential: the worst case
/// wait is bounded by `attempts * interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(6),
        }
    }
}

impl FixedRetry {
    /// Run `attempt` until it returns `true`, attempts run out, or shutdown is
    /// requested while waiting between attempts
    pub async fn run<F, Fut>(&self, shutdown: &mut ShutdownRx, mut attempt: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        for n in 1..=self.attempts {
            if *shutdown.borrow() {
                return RetryOutcome::Cancelled;
            }
            if attempt(n).await {
                return RetryOutcome::Succeeded { attempt: n };
            }
            if n == self.attempts {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(shutdown) => return RetryOutcome::Cancelled,
            }
        }
        RetryOutcome::Exhausted
    }
}
