//! Registry statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of registry activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Number of currently loaded models.
    pub loaded_count: usize,
    /// Successful loads, replacements included.
    pub load_count: u64,
    /// Loads that replaced an existing handle.
    pub replacement_count: u64,
    /// Handles removed by unload or clear.
    pub unload_count: u64,
    /// Prediction calls, failed ones included.
    pub prediction_count: u64,
    /// Failed load attempts.
    pub load_failures: u64,
    /// Failed prediction calls.
    pub prediction_failures: u64,
}

/// Cumulative counters updated without taking the registry lock.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub loads: AtomicU64,
    pub replacements: AtomicU64,
    pub unloads: AtomicU64,
    pub predictions: AtomicU64,
    pub load_failures: AtomicU64,
    pub prediction_failures: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, loaded_count: usize) -> RegistryStats {
        RegistryStats {
            loaded_count,
            load_count: self.loads.load(Ordering::Relaxed),
            replacement_count: self.replacements.load(Ordering::Relaxed),
            unload_count: self.unloads.load(Ordering::Relaxed),
            prediction_count: self.predictions.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            prediction_failures: self.prediction_failures.load(Ordering::Relaxed),
        }
    }
}
