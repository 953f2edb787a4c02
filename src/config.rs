//! Configuration structures for a training run

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Metric used to pick the best validation epoch
    pub monitor: MonitorConfig,
    /// Optimizer selection
    pub optimizer: OptimizerConfig,
    /// Model architecture
    pub model: ModelConfig,
    /// Loop settings
    pub trainer: TrainerConfig,
    /// Aggregation and figure settings
    pub evaluation: EvaluationConfig,
    /// Logging and telemetry output
    pub logging: LoggingConfig,
    /// Synthetic data used by the CLI
    pub data: DataConfig,
}

impl Config {
    /// Load configuration from a JSON or YAML file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_yaml_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without validating it
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse YAML configuration: {e}")))
    }

    /// Parse a JSON document without validating it
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse JSON configuration: {e}")))
    }

    /// Save configuration to a JSON or YAML file, chosen by extension
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => serde_yaml::to_string(self)
                .map_err(|e| Error::config(format!("Failed to serialize configuration: {e}")))?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        self.optimizer.validate()?;

        if self.model.input_dim() == 0 {
            return Err(Error::config("Model input dimension must be > 0"));
        }

        if self.trainer.max_epochs == 0 {
            return Err(Error::config("trainer.max_epochs must be > 0"));
        }

        if !(0.0..1.0).contains(&self.evaluation.threshold) {
            return Err(Error::config("evaluation.threshold must be in [0, 1)"));
        }

        if self.evaluation.grid_cols == 0 || self.evaluation.cell_px == 0 {
            return Err(Error::config("evaluation grid columns and cell size must be > 0"));
        }

        if self.data.input_dim != self.model.input_dim() {
            return Err(Error::config(format!(
                "data.input_dim ({}) must match the model input dimension ({})",
                self.data.input_dim,
                self.model.input_dim()
            )));
        }

        if self.data.batch_size == 0 || self.data.num_classes == 0 {
            return Err(Error::config("data.batch_size and data.num_classes must be > 0"));
        }

        if !self.data.class_names.is_empty() && self.data.class_names.len() != self.data.num_classes {
            return Err(Error::config(format!(
                "data.class_names has {} entries but data.num_classes is {}",
                self.data.class_names.len(),
                self.data.num_classes
            )));
        }

        Ok(())
    }

    /// Snapshot used as the hyperparameter half of best-metric records
    pub fn hparams(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Comparison direction for the monitored metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Lower is better
    Min,
    /// Higher is better
    Max,
}

impl MonitorMode {
    /// Starting best value before any validation epoch
    pub fn initial_best(&self) -> f64 {
        match self {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max => 0.0,
        }
    }

    /// Whether `candidate` strictly improves on `best`
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        match self {
            MonitorMode::Min => candidate < best,
            MonitorMode::Max => candidate > best,
        }
    }
}

/// Scalar fields of a metrics bundle that can be monitored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MonitorName {
    /// Mean per-batch loss
    Loss,
    /// Micro-averaged precision
    Precision,
    /// Micro-averaged recall
    Recall,
    /// Micro-averaged F1
    F1Score,
}

impl MonitorName {
    /// All monitorable scalars, in record order
    pub const ALL: [MonitorName; 4] = [
        MonitorName::Loss,
        MonitorName::Precision,
        MonitorName::Recall,
        MonitorName::F1Score,
    ];

    /// Key used in records and configs
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorName::Loss => "loss",
            MonitorName::Precision => "precision",
            MonitorName::Recall => "recall",
            MonitorName::F1Score => "f1_score",
        }
    }

    /// Direction that makes sense for this metric
    pub fn natural_mode(&self) -> MonitorMode {
        match self {
            MonitorName::Loss => MonitorMode::Min,
            _ => MonitorMode::Max,
        }
    }
}

impl fmt::Display for MonitorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-model monitor configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Comparison direction
    pub mode: MonitorMode,
    /// Monitored scalar
    pub name: MonitorName,
}

impl MonitorConfig {
    /// Reject pairings that would track the worst value as "best"
    pub fn validate(&self) -> Result<()> {
        if self.mode != self.name.natural_mode() {
            return Err(Error::config(format!(
                "monitor mode {:?} does not fit metric '{}' (expected {:?})",
                self.mode,
                self.name,
                self.name.natural_mode()
            )));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: MonitorMode::Min,
            name: MonitorName::Loss,
        }
    }
}

/// Supported optimizers, each with its own parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum OptimizerConfig {
    /// Adam (AdamW with zero weight decay)
    Adam {
        /// Learning rate
        lr: f64,
    },
    /// Plain stochastic gradient descent
    Sgd {
        /// Learning rate
        lr: f64,
    },
}

impl OptimizerConfig {
    /// Learning rate of the selected optimizer
    pub fn lr(&self) -> f64 {
        match self {
            OptimizerConfig::Adam { lr } | OptimizerConfig::Sgd { lr } => *lr,
        }
    }

    /// Learning rate must be a positive finite number
    pub fn validate(&self) -> Result<()> {
        let lr = self.lr();
        if !lr.is_finite() || lr <= 0.0 {
            return Err(Error::config(format!("optimizer.lr must be positive, got {lr}")));
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam { lr: 1e-3 }
    }
}

/// Model architecture
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelConfig {
    /// Single linear layer producing one logit per class
    Linear {
        /// Input feature count
        input_dim: usize,
    },
    /// Multi-layer perceptron with ReLU between layers
    Mlp {
        /// Input feature count
        input_dim: usize,
        /// Hidden layer widths
        hidden_dims: Vec<usize>,
    },
}

impl ModelConfig {
    /// Input feature count
    pub fn input_dim(&self) -> usize {
        match self {
            ModelConfig::Linear { input_dim } | ModelConfig::Mlp { input_dim, .. } => *input_dim,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Mlp {
            input_dim: 16,
            hidden_dims: vec![32],
        }
    }
}

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of train/validate epochs
    pub max_epochs: usize,
    /// Validation batches run as a sanity check before training (0 disables)
    pub num_sanity_val_steps: usize,
    /// Seed for weight init and synthetic data
    pub seed: u64,
    /// Process rank; only rank 0 reports and tracks
    pub rank: usize,
    /// Compute device
    pub device: DeviceType,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            num_sanity_val_steps: 2,
            seed: 42,
            rank: 0,
            device: DeviceType::Cpu,
        }
    }
}

/// Device types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// CPU device
    Cpu,
    /// CUDA GPU
    Cuda,
    /// Metal (Apple Silicon)
    Metal,
}

impl DeviceType {
    /// Open the candle device
    pub fn device(&self) -> Result<candle_core::Device> {
        Ok(match self {
            DeviceType::Cpu => candle_core::Device::Cpu,
            DeviceType::Cuda => candle_core::Device::new_cuda(0)?,
            DeviceType::Metal => candle_core::Device::new_metal(0)?,
        })
    }
}

/// Aggregation and figure settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Probability above which a label counts as predicted
    pub threshold: f64,
    /// Rows in the confusion-matrix grid (grown if too few for all classes)
    pub grid_rows: usize,
    /// Columns in the confusion-matrix grid
    pub grid_cols: usize,
    /// Pixel size of one confusion-matrix cell
    pub cell_px: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            grid_rows: 9,
            grid_cols: 5,
            cell_px: 24,
        }
    }
}

/// Logging and telemetry output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset
    pub level: String,
    /// Emit logs as JSON lines
    pub json: bool,
    /// Directory for JSONL telemetry and figure PNGs
    pub output_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            output_dir: None,
        }
    }
}

/// Synthetic multi-label data used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Class names; generated as `class_{i}` when empty
    pub class_names: Vec<String>,
    /// Number of labels
    pub num_classes: usize,
    /// Input feature count
    pub input_dim: usize,
    /// Training samples
    pub train_samples: usize,
    /// Validation samples
    pub val_samples: usize,
    /// Test samples
    pub test_samples: usize,
    /// Samples per batch
    pub batch_size: usize,
    /// Probability of flipping each generated label
    pub label_noise: f64,
}

impl DataConfig {
    /// Configured class names, or generated ones
    pub fn resolved_class_names(&self) -> Vec<String> {
        if self.class_names.is_empty() {
            (0..self.num_classes).map(|i| format!("class_{i}")).collect()
        } else {
            self.class_names.clone()
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            class_names: Vec::new(),
            num_classes: 6,
            input_dim: 16,
            train_samples: 512,
            val_samples: 128,
            test_samples: 128,
            batch_size: 32,
            label_noise: 0.05,
        }
    }
}
