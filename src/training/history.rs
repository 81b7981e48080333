//! Per-epoch metric history and the best-score accumulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metric history: one map of metric name to epoch mean per finished epoch.
///
/// Values recorded during an epoch are averaged when the epoch ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    epochs: Vec<BTreeMap<String, f64>>,
    #[serde(skip)]
    pending: BTreeMap<String, Vec<f64>>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of a metric within the current epoch.
    pub fn record(&mut self, name: &str, value: f64) {
        self.pending.entry(name.to_string()).or_default().push(value);
    }

    /// Close the current epoch, storing the mean of every recorded metric.
    pub fn end_epoch(&mut self) {
        let means = self
            .pending
            .iter()
            .map(|(name, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (name.clone(), mean)
            })
            .collect();
        self.epochs.push(means);
        self.pending.clear();
    }

    /// Number of finished epochs.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Mean of a metric in a finished epoch.
    pub fn get(&self, epoch: usize, name: &str) -> Option<f64> {
        self.epochs.get(epoch).and_then(|m| m.get(name)).copied()
    }

    /// Metrics of the last finished epoch.
    pub fn last(&self) -> Option<&BTreeMap<String, f64>> {
        self.epochs.last()
    }

    /// Per-epoch values of one metric as (epoch, value) pairs, 1-based.
    pub fn series(&self, name: &str) -> Vec<(f64, f64)> {
        self.epochs
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.get(name).map(|v| ((i + 1) as f64, *v)))
            .collect()
    }
}

/// Lowest validation loss seen across runs.
///
/// Threaded explicitly through every run by the caller; a tuning study keeps
/// one accumulator for all of its trials so only improving runs persist
/// artifacts.
#[derive(Debug, Clone, Copy)]
pub struct BestScore {
    lowest_val_loss: f64,
}

impl Default for BestScore {
    fn default() -> Self {
        Self {
            lowest_val_loss: f64::INFINITY,
        }
    }
}

impl BestScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a run's validation loss. Returns whether it improved the best.
    pub fn observe(&mut self, val_loss: f64) -> bool {
        if val_loss < self.lowest_val_loss {
            self.lowest_val_loss = val_loss;
            true
        } else {
            false
        }
    }

    pub fn lowest(&self) -> f64 {
        self.lowest_val_loss
    }
}
