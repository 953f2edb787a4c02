//! Epoch-end reduction of buffered step outputs

use candle_core::{DType, Tensor};
use tracing::{debug, instrument};

use super::{f1, ratio, ClassNames, ClassificationReport, ConfusionMatrix, MetricsBundle, PhaseBuffer};
use crate::error::{Error, Result};

/// Probability above which a label counts as predicted
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Reduces a phase buffer into micro-averaged metrics
#[derive(Debug, Clone)]
pub struct EpochAggregator {
    class_names: ClassNames,
    threshold: f64,
}

impl EpochAggregator {
    /// Aggregator for the given label set at the default threshold
    pub fn new(class_names: ClassNames) -> Self {
        Self {
            class_names,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Override the sigmoid decision threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Label set the report is built against
    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    /// Reduce every buffered batch into one [`MetricsBundle`]
    #[instrument(level = "debug", skip_all, fields(batches = buffer.len()))]
    pub fn reduce(&self, buffer: PhaseBuffer) -> Result<MetricsBundle> {
        if buffer.is_empty() {
            return Err(Error::EmptyPhase);
        }

        let num_classes = self.class_names.len();
        let mut predictions = Vec::with_capacity(buffer.len());
        let mut targets = Vec::with_capacity(buffer.len());
        let mut loss_sum = 0.0;

        for output in buffer.iter() {
            let width = output.num_classes();
            if width != num_classes {
                return Err(Error::shape_mismatch(format!(
                    "{num_classes} class names for a model producing {width} outputs"
                )));
            }
            if output.targets.dims() != output.logits.dims() {
                return Err(Error::shape_mismatch(format!(
                    "targets {:?} do not match logits {:?}",
                    output.targets.dims(),
                    output.logits.dims()
                )));
            }
            let probabilities = candle_nn::ops::sigmoid(&output.logits)?;
            predictions.push(probabilities.gt(self.threshold)?);
            targets.push(output.targets.to_dtype(DType::F32)?.gt(0.5)?);
            loss_sum += output.loss_value()?;
        }

        let predictions = to_bool_rows(&Tensor::cat(&predictions, 0)?)?;
        let targets = to_bool_rows(&Tensor::cat(&targets, 0)?)?;

        let mut matrices = vec![ConfusionMatrix::default(); num_classes];
        for (target_row, predicted_row) in targets.iter().zip(&predictions) {
            for (cm, (&t, &p)) in matrices.iter_mut().zip(target_row.iter().zip(predicted_row)) {
                cm.record(t, p);
            }
        }

        // micro averaging: pool the counts before taking ratios
        let mut pooled = ConfusionMatrix::default();
        for cm in &matrices {
            pooled += *cm;
        }
        let precision = ratio(pooled.true_positives, pooled.true_positives + pooled.false_positives);
        let recall = ratio(pooled.true_positives, pooled.support());
        let f1_score = f1(precision, recall);

        // each batch counts once regardless of its size
        let loss = loss_sum / buffer.len() as f64;

        let report = ClassificationReport::build(&self.class_names, &matrices, &targets, &predictions);
        debug!(
            samples = targets.len(),
            precision, recall, f1_score, loss, "aggregated epoch metrics"
        );

        Ok(MetricsBundle {
            precision,
            recall,
            f1_score,
            loss,
            confusion_matrices: matrices,
            report,
            num_samples: targets.len(),
        })
    }
}

fn to_bool_rows(mask: &Tensor) -> Result<Vec<Vec<bool>>> {
    Ok(mask
        .to_vec2::<u8>()?
        .into_iter()
        .map(|row| row.into_iter().map(|v| v != 0).collect())
        .collect())
}
