//! Single-batch forward pass and loss

use candle_core::{DType, Tensor};
use candle_nn::Module;
use tracing::instrument;

use crate::error::{Error, Result};

/// Result of one forward pass
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Scalar mean loss for the batch
    pub loss: Tensor,
    /// Binary label matrix `[batch, num_classes]`
    pub targets: Tensor,
    /// Raw model outputs `[batch, num_classes]`
    pub logits: Tensor,
}

impl StepOutput {
    /// Loss as a host float
    pub fn loss_value(&self) -> Result<f64> {
        Ok(self.loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
    }

    /// Samples in the batch
    pub fn batch_size(&self) -> usize {
        self.logits.dims().first().copied().unwrap_or(0)
    }

    /// Logit columns
    pub fn num_classes(&self) -> usize {
        self.logits.dims().get(1).copied().unwrap_or(0)
    }
}

/// Runs the model and the multi-label loss for one batch
pub struct StepExecutor {
    model: Box<dyn Module>,
}

impl StepExecutor {
    /// Wrap a model producing one logit per class
    pub fn new(model: Box<dyn Module>) -> Self {
        Self { model }
    }

    /// Forward `inputs` and score the logits against `targets`
    #[instrument(level = "trace", skip_all)]
    pub fn run(&self, inputs: &Tensor, targets: &Tensor) -> Result<StepOutput> {
        let (rows, cols) = match targets.dims() {
            [rows, cols] => (*rows, *cols),
            dims => {
                return Err(Error::shape_mismatch(format!(
                    "targets must be [batch, num_classes], got {dims:?}"
                )))
            }
        };

        let input_rows = inputs.dims().first().copied().unwrap_or(0);
        if input_rows != rows {
            return Err(Error::shape_mismatch(format!(
                "inputs hold {input_rows} samples but targets hold {rows}"
            )));
        }

        let logits = self.model.forward(inputs)?;
        if logits.dims() != [rows, cols] {
            return Err(Error::shape_mismatch(format!(
                "model produced logits {:?} for targets [{rows}, {cols}]",
                logits.dims()
            )));
        }

        let loss = bce_with_logits(&logits, targets)?;
        Ok(StepOutput {
            loss,
            targets: targets.clone(),
            logits,
        })
    }
}

/// Mean binary cross-entropy over every (sample, class) logit
///
/// Uses `max(x, 0) - x * t + ln(1 + exp(-|x|))`, which stays finite for
/// large magnitude logits.
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let targets = targets.to_dtype(logits.dtype())?;
    let positive_part = logits.relu()?;
    let logit_target = (logits * &targets)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = ((positive_part - logit_target)? + softplus)?.mean_all()?;
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn identity_executor() -> StepExecutor {
        StepExecutor::new(Box::new(candle_nn::func(|xs: &Tensor| Ok(xs.clone()))))
    }

    #[test]
    fn test_zero_logits_give_ln2() {
        let logits = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        let loss = bce_with_logits(&logits, &targets).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        assert_relative_eq!(value as f64, std::f64::consts::LN_2, epsilon = 1e-6);
    }

    #[test]
    fn test_bce_matches_reference() {
        let logits = Tensor::new(&[[2.0f32, -1.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[1u8, 0]], &Device::Cpu).unwrap();
        let value = bce_with_logits(&logits, &targets)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap() as f64;
        let expected = ((1.0 + (-2.0f64).exp()).ln() + (1.0 + (-1.0f64).exp()).ln()) / 2.0;
        assert_relative_eq!(value, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let logits = Tensor::new(&[[500.0f32, -500.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[0.0f32, 1.0]], &Device::Cpu).unwrap();
        let value = bce_with_logits(&logits, &targets).unwrap().to_scalar::<f32>().unwrap();
        assert!(value.is_finite());
        assert_relative_eq!(value, 500.0, epsilon = 1e-3);
    }

    #[test]
    fn test_run_returns_logits_and_targets() {
        let executor = identity_executor();
        let inputs = Tensor::new(&[[1.0f32, -1.0], [0.5, 0.5]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[1.0f32, 0.0], [1.0, 1.0]], &Device::Cpu).unwrap();
        let output = executor.run(&inputs, &targets).unwrap();
        assert_eq!(output.batch_size(), 2);
        assert_eq!(output.num_classes(), 2);
        assert!(output.loss_value().unwrap() > 0.0);
    }

    #[test]
    fn test_batch_size_mismatch() {
        let executor = identity_executor();
        let inputs = Tensor::zeros((3, 2), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let err = executor.run(&inputs, &targets).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_logit_width_mismatch() {
        let executor = identity_executor();
        let inputs = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let err = executor.run(&inputs, &targets).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_rank_one_targets_rejected() {
        let executor = identity_executor();
        let inputs = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::zeros(4, DType::F32, &Device::Cpu).unwrap();
        assert!(executor.run(&inputs, &targets).unwrap_err().is_shape_mismatch());
    }
}
