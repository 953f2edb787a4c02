//! Optimizer selected once from configuration
//!
//! `candle_nn::Optimizer` is not object safe, so the configured choice is a
//! closed enum that forwards to the concrete optimizer.

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap, SGD};
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::error::Result;

/// Optimizer built from an [`OptimizerConfig`]
pub enum ConfiguredOptimizer {
    /// Adam, as AdamW with zero weight decay
    Adam(AdamW),
    /// Plain SGD
    Sgd(SGD),
}

impl ConfiguredOptimizer {
    /// Build the configured optimizer over every variable in `var_map`
    pub fn from_config(config: &OptimizerConfig, var_map: &VarMap) -> Result<Self> {
        config.validate()?;
        let vars = var_map.all_vars();
        debug!(parameters = vars.len(), lr = config.lr(), "building optimizer");
        Ok(match config {
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                ConfiguredOptimizer::Adam(AdamW::new(vars, params)?)
            }
            OptimizerConfig::Sgd { lr } => ConfiguredOptimizer::Sgd(SGD::new(vars, *lr)?),
        })
    }

    /// Optimizer name as written in configs
    pub fn name(&self) -> &'static str {
        match self {
            ConfiguredOptimizer::Adam(_) => "adam",
            ConfiguredOptimizer::Sgd(_) => "sgd",
        }
    }

    /// Backpropagate `loss` and update the parameters
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            ConfiguredOptimizer::Adam(opt) => opt.backward_step(loss)?,
            ConfiguredOptimizer::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        match self {
            ConfiguredOptimizer::Adam(opt) => opt.learning_rate(),
            ConfiguredOptimizer::Sgd(opt) => opt.learning_rate(),
        }
    }
}
