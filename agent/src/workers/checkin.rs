//! Periodic checkin worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::checkin::adapter::CheckinAdapter;

/// Checkin worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between checkin cycles
    pub interval: Duration,

    /// Delay before the first cycle
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
        }
    }
}

/// Run the checkin worker
pub async fn run<S, F>(
    options: &Options,
    adapter: &CheckinAdapter,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Checkin worker starting...");

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Checkin worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
        wait = options.interval;

        match adapter.run_cycle().await {
            Ok(outcome) => debug!(
                "Checkin done: {} round(s), {} change(s) applied{}",
                outcome.rounds,
                outcome.applied,
                if outcome.capped { ", capped" } else { "" }
            ),
            Err(e) => error!("Checkin failed, retrying next tick: {}", e),
        }
    }
}
