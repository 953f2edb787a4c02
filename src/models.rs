//! Multi-label classifiers built from a [`ModelConfig`]

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Stack of linear layers with ReLU between them, one output logit per class
#[derive(Debug, Clone)]
pub struct Classifier {
    layers: Vec<Linear>,
}

impl Classifier {
    /// Build the layers described by `config` under `vb`
    pub fn new(config: &ModelConfig, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::config("Model needs at least one output class"));
        }
        let hidden: &[usize] = match config {
            ModelConfig::Linear { .. } => &[],
            ModelConfig::Mlp { hidden_dims, .. } => hidden_dims,
        };
        if hidden.contains(&0) {
            return Err(Error::config("Hidden layer widths must be > 0"));
        }

        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut in_dim = config.input_dim();
        for (i, &out_dim) in hidden.iter().chain(std::iter::once(&num_classes)).enumerate() {
            layers.push(linear(in_dim, out_dim, vb.pp(format!("layer_{i}")))?);
            in_dim = out_dim;
        }
        debug!(layers = layers.len(), num_classes, "built classifier");
        Ok(Self { layers })
    }

    /// Linear layers, input first
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl Module for Classifier {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len().saturating_sub(1);
        let mut xs = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }
}
