//! Periodic log shipping worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::logship::LogFanout;
use crate::reconcile::reconciler::Reconciler;

/// Log shipper options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between shipments
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Run the log shipper worker
pub async fn run<S, F>(
    options: &Options,
    reconciler: &Reconciler,
    fanout: &LogFanout,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Log shipper starting with {} sink(s)...", fanout.len());

    // Each shipment covers the output since the previous one
    let mut since = Utc::now();
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Log shipper shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let until = Utc::now();
        let mut logs = reconciler.collect_logs(since, until).await;
        since = until;
        logs.retain(|_, app_logs| !app_logs.is_empty());
        if logs.is_empty() {
            debug!("No new application output");
            continue;
        }

        let delivered = fanout.send(&logs).await;
        debug!(
            "Shipped logs of {} app(s) to {}/{} sink(s)",
            logs.len(),
            delivered,
            fanout.len()
        );
    }
}
