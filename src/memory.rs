//! Process memory watchdog.
//!
//! Samples RSS and swap from /proc/self/status on a fixed cadence and
//! publishes the pressure level on a watch channel the evaluation loop
//! consults between cycles.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use common::config::{LowMemoryAction, MemoryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Normal,
    /// Above `max_memory_usage`: shrink windows, drop caches.
    ReduceLoad,
    /// Above 1.1× the limit: skip the next non-critical batch.
    EmergencyCleanup,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub swap_bytes: u64,
}

/// Parse VmRSS/VmSwap out of /proc/self/status text.
fn parse_status(raw: &str) -> MemorySample {
    let mut sample = MemorySample::default();
    for line in raw.lines() {
        let kb = |l: &str| {
            l.split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v * 1024)
        };
        if line.starts_with("VmRSS:") {
            sample.rss_bytes = kb(line).unwrap_or(0);
        } else if line.starts_with("VmSwap:") {
            sample.swap_bytes = kb(line).unwrap_or(0);
        }
    }
    sample
}

pub fn sample_self() -> MemorySample {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(raw) => parse_status(&raw),
        Err(_) => MemorySample::default(),
    }
}

fn classify(sample: MemorySample, config: &MemoryConfig) -> MemoryPressure {
    let emergency_limit = (config.max_memory_usage as f64 * 1.1) as u64;
    let emergency = sample.rss_bytes > emergency_limit
        && config
            .low_memory_actions
            .contains(&LowMemoryAction::EmergencyCleanup);
    if emergency {
        return MemoryPressure::EmergencyCleanup;
    }
    let reduce = (sample.rss_bytes > config.max_memory_usage
        || sample.swap_bytes > config.max_swap_usage)
        && config
            .low_memory_actions
            .contains(&LowMemoryAction::ReduceLoad);
    if reduce {
        MemoryPressure::ReduceLoad
    } else {
        MemoryPressure::Normal
    }
}

/// Spawn the sampling task. The receiver always holds the latest
/// pressure level.
pub fn spawn_monitor(
    config: MemoryConfig,
) -> (watch::Receiver<MemoryPressure>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(MemoryPressure::Normal);
    let task = tokio::spawn(async move {
        let interval = Duration::from_secs(config.cleanup_interval_seconds.max(1));
        loop {
            let sample = sample_self();
            let pressure = classify(sample, &config);
            match pressure {
                MemoryPressure::Normal => {
                    debug!(rss = sample.rss_bytes, swap = sample.swap_bytes, "memory ok")
                }
                _ => warn!(
                    rss = sample.rss_bytes,
                    swap = sample.swap_bytes,
                    ?pressure,
                    "memory pressure"
                ),
            }
            if tx.send(pressure).is_err() {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    });
    (rx, task)
}
