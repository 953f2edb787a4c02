//! Telemetry sinks for scalar, figure and hyperparameter records
//!
//! The training core never persists anything itself; every record goes
//! through the [`Telemetry`] trait. This module provides in-memory, JSON
//! lines, tracing and null sinks plus a fan-out hub.

pub mod jsonl;
pub mod recording;

pub use jsonl::JsonlTelemetry;
pub use recording::RecordingTelemetry;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::training::Figure;

/// Receiver of training records
#[cfg_attr(test, mockall::automock)]
pub trait Telemetry {
    /// Named scalar at a step
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    /// Named composite image at a step
    fn log_figure(&mut self, tag: &str, figure: &Figure, step: usize) -> Result<()>;

    /// Hyperparameter snapshot with associated metrics
    fn log_hparams(
        &mut self,
        hparams: &serde_json::Value,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()>;
}

/// One record as stored by the recording and JSONL sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// Scalar time-series point
    Scalar {
        /// Series name, e.g. `precision/val`
        tag: String,
        /// Value
        value: f64,
        /// Step
        step: usize,
    },
    /// Composite image
    Figure {
        /// Figure name, e.g. `confusion matrix/val`
        tag: String,
        /// Step
        step: usize,
        /// Pixel width
        width: u32,
        /// Pixel height
        height: u32,
        /// Panel titles in grid order
        panel_titles: Vec<String>,
        /// Where the PNG was written, if anywhere
        path: Option<PathBuf>,
    },
    /// Hyperparameters plus metrics
    Hparams {
        /// Configuration snapshot
        hparams: serde_json::Value,
        /// Metrics keyed by name
        metrics: BTreeMap<String, f64>,
    },
}

impl TelemetryRecord {
    pub(crate) fn figure(tag: &str, figure: &Figure, step: usize, path: Option<PathBuf>) -> Self {
        TelemetryRecord::Figure {
            tag: tag.to_string(),
            step,
            width: figure.image.width(),
            height: figure.image.height(),
            panel_titles: figure.panel_titles.clone(),
            path,
        }
    }
}

/// Sink that mirrors records into the log
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        debug!(tag, value, step, "scalar");
        Ok(())
    }

    fn log_figure(&mut self, tag: &str, figure: &Figure, step: usize) -> Result<()> {
        debug!(
            tag,
            step,
            width = figure.image.width(),
            height = figure.image.height(),
            "figure"
        );
        Ok(())
    }

    fn log_hparams(
        &mut self,
        _hparams: &serde_json::Value,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        info!(?metrics, "hparams snapshot");
        Ok(())
    }
}

/// Sink that drops everything; used on non-zero ranks
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn log_scalar(&mut self, _tag: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }

    fn log_figure(&mut self, _tag: &str, _figure: &Figure, _step: usize) -> Result<()> {
        Ok(())
    }

    fn log_hparams(
        &mut self,
        _hparams: &serde_json::Value,
        _metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Fans every record out to several sinks
///
/// A failing sink is logged and counted; the others still receive the record.
#[derive(Default)]
pub struct TelemetryHub {
    sinks: Vec<Box<dyn Telemetry>>,
    failures: u64,
}

impl TelemetryHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with_sink(mut self, sink: Box<dyn Telemetry>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Registered sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are registered
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sink failures so far
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn dispatch(&mut self, mut send: impl FnMut(&mut dyn Telemetry) -> Result<()>) {
        for sink in &mut self.sinks {
            if let Err(e) = send(sink.as_mut()) {
                warn!("Telemetry sink failed: {}", e);
                self.failures += 1;
            }
        }
    }
}

impl Telemetry for TelemetryHub {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.dispatch(|sink| sink.log_scalar(tag, value, step));
        Ok(())
    }

    fn log_figure(&mut self, tag: &str, figure: &Figure, step: usize) -> Result<()> {
        self.dispatch(|sink| sink.log_figure(tag, figure, step));
        Ok(())
    }

    fn log_hparams(
        &mut self,
        hparams: &serde_json::Value,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.dispatch(|sink| sink.log_hparams(hparams, metrics));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_hub_fans_out() {
        let first = RecordingTelemetry::new();
        let second = RecordingTelemetry::new();
        let mut hub = TelemetryHub::new()
            .with_sink(Box::new(first.clone()))
            .with_sink(Box::new(second.clone()));
        hub.log_scalar("loss/train", 0.5, 3).unwrap();
        assert_eq!(first.scalars("loss/train"), vec![(3, 0.5)]);
        assert_eq!(second.scalars("loss/train"), vec![(3, 0.5)]);
    }

    #[test]
    fn test_hub_survives_failing_sink() {
        let mut failing = MockTelemetry::new();
        failing
            .expect_log_scalar()
            .times(1)
            .returning(|_, _, _| Err(Error::invalid_state("disk full")));
        let healthy = RecordingTelemetry::new();
        let mut hub = TelemetryHub::new()
            .with_sink(Box::new(failing))
            .with_sink(Box::new(healthy.clone()));

        assert!(hub.log_scalar("precision/val", 0.9, 1).is_ok());
        assert_eq!(hub.failures(), 1);
        assert_eq!(healthy.scalar_count(), 1);
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = TelemetryRecord::Scalar {
            tag: "recall/test".to_string(),
            value: 0.25,
            step: 7,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "scalar");
        assert_eq!(json["tag"], "recall/test");
    }
}
