//! BigEarth Select - epoch aggregation and best-model tracking for
//! multi-label classifiers
//!
//! This crate turns per-batch model outputs into epoch-level micro-averaged
//! metrics, keeps track of the best validation epoch under a configurable
//! monitor, and reports classification reports and confusion-matrix grids
//! through pluggable telemetry sinks.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod models;
pub mod telemetry;
pub mod training;

// Re-exports
pub use config::{Config, MonitorConfig, MonitorMode, MonitorName, OptimizerConfig};
pub use data::{Batch, DataSource, InMemoryDataSource, SyntheticDataSource};
pub use error::{Error, Result};
pub use models::Classifier;
pub use telemetry::{
    JsonlTelemetry, NullTelemetry, RecordingTelemetry, Telemetry, TelemetryHub, TracingTelemetry,
};
pub use training::{
    BestMetricTracker, ClassNames, ConfiguredOptimizer, MetricsBundle, Phase, TrainingController,
    TrainingEvent,
};
