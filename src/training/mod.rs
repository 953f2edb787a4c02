//! Training-loop core for multi-label classifiers
//!
//! This module provides the per-batch step, the epoch-end aggregation into
//! micro-averaged metrics, the diagnostic reporter, the best-metric tracker
//! and the controller that sequences them across train, validation and test
//! phases.
//!
//! # Main Components
//!
//! - **StepExecutor**: forward pass plus binary cross-entropy for one batch
//! - **EpochAggregator**: reduces a phase buffer into a [`MetricsBundle`]
//! - **DiagnosticReporter**: scalar records, text report and confusion grid
//! - **BestMetricTracker**: best monitored value across validation epochs
//! - **TrainingController**: phase state machine wiring the above together
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bigearth_select::training::{TrainingController, Phase};
//!
//! let mut controller = TrainingController::new(&config, class_names, model, telemetry)?;
//! controller.fit(&mut data_source)?;
//! controller.test(&mut data_source)?;
//! ```

pub mod controller;
pub mod figure;
pub mod metrics;
pub mod optimizers;
pub mod reporter;
pub mod step;
pub mod tracker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use controller::{FitSummary, TrainingController, TrainingEvent};
pub use figure::{ConfusionGrid, Figure};
pub use metrics::{
    ClassNames, ClassReport, ClassificationReport, ConfusionMatrix, EpochAggregator,
    MetricsBundle, PhaseBuffer,
};
pub use optimizers::ConfiguredOptimizer;
pub use reporter::DiagnosticReporter;
pub use step::{StepExecutor, StepOutput};
pub use tracker::{BestMetricTracker, BestState};

/// Logical pass over one dataset partition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Training pass
    Train,
    /// Validation pass
    #[serde(rename = "val")]
    Validate,
    /// Held-out test pass
    Test,
}

impl Phase {
    /// Split tag used in record names
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validate => "val",
            Phase::Test => "test",
        }
    }

    /// Whether per-batch losses are reported as they happen
    pub fn logs_step_loss(&self) -> bool {
        matches!(self, Phase::Train | Phase::Validate)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
