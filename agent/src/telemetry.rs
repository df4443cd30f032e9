//! Host metrics collection

use std::sync::Mutex;

use sysinfo::{Networks, System};
use trainer_api::models::Metric;

/// Samples host-wide resource usage.
///
/// CPU usage is measured between consecutive calls, so the first sample
/// after construction reads close to zero.
pub struct HostSampler {
    inner: Mutex<(System, Networks)>,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            inner: Mutex::new((sys, Networks::new_with_refreshed_list())),
        }
    }

    pub fn sample(&self) -> Metric {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (sys, networks) = &mut *guard;
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        networks.refresh(true);

        Metric {
            cpu_usage_percent: sys.global_cpu_usage().round().max(0.0) as u64,
            memory_usage_bytes: sys.used_memory(),
            network_rx_bytes: networks
                .list()
                .values()
                .map(|data| data.total_received())
                .sum(),
        }
    }
}
