//! Metrics correlation
//!
//! Turns two consecutive raw resource samples into a single [`Metric`]. The
//! window is two samples wide and is not normalized over wall-clock time, so
//! the result only reads as a rate when the sampling interval is constant.

use serde::{Deserialize, Serialize};
use trainer_api::models::Metric;

use crate::errors::AgentError;

/// Raw cumulative counters for one instance at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Cumulative CPU time consumed by the instance
    pub cpu_total: u64,

    /// Cumulative CPU time of the whole system
    pub system_cpu_total: u64,

    /// Cores visible to the instance
    pub num_cores: u32,

    pub memory: u64,

    pub net_rx: u64,
}

/// Correlate two time-ordered samples
pub fn correlate(
    sample0: Option<&ResourceSample>,
    sample1: Option<&ResourceSample>,
) -> Result<Metric, AgentError> {
    let (sample0, sample1) = match (sample0, sample1) {
        (Some(s0), Some(s1)) => (s0, s1),
        (None, _) => return Err(AgentError::InvalidSamples("first sample is missing".to_string())),
        (_, None) => {
            return Err(AgentError::InvalidSamples("second sample is missing".to_string()))
        }
    };

    let cpu_delta = sample1.cpu_total as f64 - sample0.cpu_total as f64;
    let system_delta = sample1.system_cpu_total as f64 - sample0.system_cpu_total as f64;
    let num_cores = sample1.num_cores as u64;

    let cpu_usage_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
        let percent = (cpu_delta / system_delta) * num_cores as f64 * 100.0;
        (percent as u64).min(100 * num_cores)
    } else {
        0
    };

    Ok(Metric {
        cpu_usage_percent,
        memory_usage_bytes: average(sample0.memory, sample1.memory),
        network_rx_bytes: average(sample0.net_rx, sample1.net_rx),
    })
}

fn average(a: u64, b: u64) -> u64 {
    ((a as u128 + b as u128) / 2) as u64
}
