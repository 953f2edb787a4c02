//! Best monitored value across validation epochs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::metrics::MetricsBundle;
use crate::config::{MonitorConfig, MonitorName};
use crate::error::Result;
use crate::telemetry::Telemetry;

/// Prefix of the metrics attached to hyperparameter snapshots
pub const BEST_PREFIX: &str = "best_metrics/";

/// Best value seen so far
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestState {
    /// `+inf` (min) or `0` (max) until the first improvement
    pub best_metric: f64,
}

/// Keeps [`BestState`] under a monitor and reports improvements
#[derive(Debug, Clone)]
pub struct BestMetricTracker {
    monitor: MonitorConfig,
    state: BestState,
    hparams: serde_json::Value,
}

impl BestMetricTracker {
    /// Fails with `Config` when the monitor is invalid
    pub fn new(monitor: MonitorConfig, hparams: serde_json::Value) -> Result<Self> {
        monitor.validate()?;
        Ok(Self {
            monitor,
            state: BestState {
                best_metric: monitor.mode.initial_best(),
            },
            hparams,
        })
    }

    /// Monitor in use
    pub fn monitor(&self) -> MonitorConfig {
        self.monitor
    }

    /// Current state
    pub fn state(&self) -> BestState {
        self.state
    }

    /// Best monitored value so far
    pub fn best_metric(&self) -> f64 {
        self.state.best_metric
    }

    /// Placeholder snapshot written before any validation epoch
    pub fn emit_initial(&self, telemetry: &mut dyn Telemetry) -> Result<()> {
        let metrics: BTreeMap<String, f64> = MonitorName::ALL
            .iter()
            .map(|name| {
                let value = match name {
                    MonitorName::Loss => f64::INFINITY,
                    _ => 0.0,
                };
                (format!("{BEST_PREFIX}{name}"), value)
            })
            .collect();
        telemetry.log_hparams(&self.hparams, &metrics)
    }

    /// Compare the monitored scalar against the best; true when it improved
    pub fn update(&mut self, metrics: &MetricsBundle, telemetry: &mut dyn Telemetry) -> Result<bool> {
        let value = metrics.get(self.monitor.name);
        if !self.monitor.mode.improves(value, self.state.best_metric) {
            return Ok(false);
        }

        info!(
            "New best {}: {:.6} (previous {:.6})",
            self.monitor.name, value, self.state.best_metric
        );
        self.state.best_metric = value;
        telemetry.log_hparams(&self.hparams, &metrics.scalars(BEST_PREFIX))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorMode;
    use crate::telemetry::{MockTelemetry, NullTelemetry, RecordingTelemetry};
    use crate::training::metrics::{ClassNames, ClassificationReport};
    use proptest::prelude::*;

    fn bundle(value: f64) -> MetricsBundle {
        let report = ClassificationReport::build(&ClassNames::default(), &[], &[], &[]);
        MetricsBundle {
            precision: value,
            recall: value,
            f1_score: value,
            loss: value,
            confusion_matrices: Vec::new(),
            report,
            num_samples: 0,
        }
    }

    fn tracker(mode: MonitorMode, name: MonitorName) -> BestMetricTracker {
        BestMetricTracker::new(MonitorConfig { mode, name }, serde_json::json!({})).unwrap()
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(tracker(MonitorMode::Min, MonitorName::Loss).best_metric(), f64::INFINITY);
        assert_eq!(tracker(MonitorMode::Max, MonitorName::Recall).best_metric(), 0.0);
    }

    #[test]
    fn test_mismatched_monitor_rejected() {
        let monitor = MonitorConfig {
            mode: MonitorMode::Max,
            name: MonitorName::Loss,
        };
        assert!(BestMetricTracker::new(monitor, serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_placeholder_snapshot() {
        let sink = RecordingTelemetry::new();
        let t = tracker(MonitorMode::Max, MonitorName::F1Score);
        t.emit_initial(&mut sink.clone()).unwrap();
        let snapshots = sink.hparam_metrics();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0]["best_metrics/loss"], f64::INFINITY);
        assert_eq!(snapshots[0]["best_metrics/precision"], 0.0);
        assert_eq!(snapshots[0]["best_metrics/recall"], 0.0);
        assert_eq!(snapshots[0]["best_metrics/f1_score"], 0.0);
    }

    #[test]
    fn test_equal_value_is_not_an_improvement() {
        let mut t = tracker(MonitorMode::Max, MonitorName::Precision);
        let mut sink = NullTelemetry;
        assert!(t.update(&bundle(0.5), &mut sink).unwrap());
        assert!(!t.update(&bundle(0.5), &mut sink).unwrap());
    }

    #[test]
    fn test_snapshot_only_on_improvement() {
        let mut telemetry = MockTelemetry::new();
        telemetry
            .expect_log_hparams()
            .withf(|_, metrics| metrics["best_metrics/loss"] == 0.4 && metrics.len() == 4)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut t = tracker(MonitorMode::Min, MonitorName::Loss);
        assert!(t.update(&bundle(0.4), &mut telemetry).unwrap());
        assert!(!t.update(&bundle(0.6), &mut telemetry).unwrap());
        assert_eq!(t.best_metric(), 0.4);
    }

    proptest! {
        #[test]
        fn prop_max_mode_tracks_running_maximum(values in proptest::collection::vec(0.0f64..1.0, 1..20)) {
            let mut t = tracker(MonitorMode::Max, MonitorName::F1Score);
            let mut sink = NullTelemetry;
            let mut running = 0.0f64;
            for v in &values {
                let updated = t.update(&bundle(*v), &mut sink).unwrap();
                prop_assert_eq!(updated, *v > running);
                running = running.max(*v);
            }
            prop_assert_eq!(t.best_metric(), running);
        }

        #[test]
        fn prop_min_mode_tracks_running_minimum(values in proptest::collection::vec(0.0f64..10.0, 1..20)) {
            let mut t = tracker(MonitorMode::Min, MonitorName::Loss);
            let mut sink = NullTelemetry;
            let mut running = f64::INFINITY;
            for v in &values {
                let updated = t.update(&bundle(*v), &mut sink).unwrap();
                prop_assert_eq!(updated, *v < running);
                running = running.min(*v);
            }
            prop_assert_eq!(t.best_metric(), running);
        }
    }
}
