//! In-memory telemetry with a shareable handle

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Telemetry, TelemetryRecord};
use crate::error::Result;
use crate::training::Figure;

/// Keeps every record in memory; clones share the same store
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    records: Arc<RwLock<Vec<TelemetryRecord>>>,
}

impl RecordingTelemetry {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.read().clone()
    }

    /// `(step, value)` points of one scalar series
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f64)> {
        self.records
            .read()
            .iter()
            .filter_map(|record| match record {
                TelemetryRecord::Scalar { tag: t, value, step } if t == tag => Some((*step, *value)),
                _ => None,
            })
            .collect()
    }

    /// Scalar records of every series
    pub fn scalar_count(&self) -> usize {
        self.count(|r| matches!(r, TelemetryRecord::Scalar { .. }))
    }

    /// Figure records
    pub fn figure_count(&self) -> usize {
        self.count(|r| matches!(r, TelemetryRecord::Figure { .. }))
    }

    /// Metrics of each hyperparameter snapshot, oldest first
    pub fn hparam_metrics(&self) -> Vec<BTreeMap<String, f64>> {
        self.records
            .read()
            .iter()
            .filter_map(|record| match record {
                TelemetryRecord::Hparams { metrics, .. } => Some(metrics.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.records.write().clear();
    }

    fn count(&self, pred: impl Fn(&TelemetryRecord) -> bool) -> usize {
        self.records.read().iter().filter(|r| pred(r)).count()
    }

    fn push(&self, record: TelemetryRecord) {
        self.records.write().push(record);
    }
}

impl Telemetry for RecordingTelemetry {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.push(TelemetryRecord::Scalar {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn log_figure(&mut self, tag: &str, figure: &Figure, step: usize) -> Result<()> {
        self.push(TelemetryRecord::figure(tag, figure, step, None));
        Ok(())
    }

    fn log_hparams(
        &mut self,
        hparams: &serde_json::Value,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.push(TelemetryRecord::Hparams {
            hparams: hparams.clone(),
            metrics: metrics.clone(),
        });
        Ok(())
    }
}
