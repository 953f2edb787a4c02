//! Scalar records, text report and confusion grid for a finished phase

use std::fmt::Write;

use tracing::info;

use super::figure::ConfusionGrid;
use super::metrics::{ClassNames, MetricsBundle};
use super::Phase;
use crate::config::{EvaluationConfig, MonitorName};
use crate::error::Result;
use crate::telemetry::Telemetry;

/// Turns a [`MetricsBundle`] into telemetry records and log output
#[derive(Debug, Clone)]
pub struct DiagnosticReporter {
    grid_rows: usize,
    grid_cols: usize,
    cell_px: u32,
}

impl Default for DiagnosticReporter {
    fn default() -> Self {
        Self::from_config(&EvaluationConfig::default())
    }
}

impl DiagnosticReporter {
    /// Grid layout and cell size from the evaluation settings
    pub fn from_config(config: &EvaluationConfig) -> Self {
        Self {
            grid_rows: config.grid_rows,
            grid_cols: config.grid_cols,
            cell_px: config.cell_px,
        }
    }

    /// Report one phase-epoch
    pub fn emit(
        &self,
        metrics: &MetricsBundle,
        class_names: &ClassNames,
        split: Phase,
        step: usize,
        epoch: usize,
        telemetry: &mut dyn Telemetry,
    ) -> Result<()> {
        // a mismatched label set fails here, before anything is recorded
        let figure = ConfusionGrid::new(
            class_names,
            &metrics.confusion_matrices,
            self.grid_rows,
            self.grid_cols,
        )?
        .render(self.cell_px);

        for name in [MonitorName::Precision, MonitorName::Recall, MonitorName::F1Score] {
            telemetry.log_scalar(&format!("{name}/{split}"), metrics.get(name), step)?;
        }
        telemetry.log_scalar(&format!("loss/{split}_epoch"), metrics.loss, step)?;

        info!("{}", text_block(metrics, class_names, split, epoch));

        telemetry.log_figure(&format!("confusion matrix/{split}"), &figure, step)
    }
}

/// Report and per-class matrix dump as one block of text
pub fn text_block(
    metrics: &MetricsBundle,
    class_names: &ClassNames,
    split: Phase,
    epoch: usize,
) -> String {
    let mut block = format!(
        "{split} epoch: {epoch}\n{}\n{split} Confusion matrices:\n",
        metrics.report
    );
    for (name, cm) in class_names.iter().zip(&metrics.confusion_matrices) {
        // writing to a String cannot fail
        let _ = writeln!(block, "{name}:\n{cm}");
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{MockTelemetry, RecordingTelemetry, TelemetryRecord};
    use crate::training::metrics::{ClassificationReport, ConfusionMatrix};

    fn bundle(names: &ClassNames) -> MetricsBundle {
        let matrices = vec![
            ConfusionMatrix {
                true_negatives: 2,
                false_positives: 0,
                false_negatives: 1,
                true_positives: 1,
            };
            names.len()
        ];
        MetricsBundle {
            precision: 1.0,
            recall: 0.5,
            f1_score: 2.0 / 3.0,
            loss: 0.7,
            report: ClassificationReport::build(names, &matrices, &[], &[]),
            confusion_matrices: matrices,
            num_samples: 4,
        }
    }

    #[test]
    fn test_emits_scalars_and_one_figure() {
        let names = ClassNames::from(&["Urban fabric", "Arable land", "Marine waters"][..]);
        let sink = RecordingTelemetry::new();
        DiagnosticReporter::default()
            .emit(&bundle(&names), &names, Phase::Validate, 17, 3, &mut sink.clone())
            .unwrap();

        assert_eq!(sink.scalars("precision/val"), vec![(17, 1.0)]);
        assert_eq!(sink.scalars("recall/val"), vec![(17, 0.5)]);
        assert_eq!(sink.scalars("f1_score/val").len(), 1);
        assert_eq!(sink.scalars("loss/val_epoch"), vec![(17, 0.7)]);
        assert_eq!(sink.figure_count(), 1);

        let figure = sink
            .records()
            .into_iter()
            .find_map(|r| match r {
                TelemetryRecord::Figure { tag, panel_titles, .. } => Some((tag, panel_titles)),
                _ => None,
            })
            .unwrap();
        assert_eq!(figure.0, "confusion matrix/val");
        assert_eq!(figure.1.len(), 3);
    }

    #[test]
    fn test_grid_shape_from_config() {
        let names = ClassNames::from(&["a", "b"][..]);
        let config = EvaluationConfig {
            grid_rows: 1,
            grid_cols: 2,
            cell_px: 2,
            ..Default::default()
        };
        let mut telemetry = MockTelemetry::new();
        telemetry.expect_log_scalar().times(4).returning(|_, _, _| Ok(()));
        telemetry
            .expect_log_figure()
            .withf(|tag, figure, step| {
                tag == "confusion matrix/test" && *step == 0 && figure.rows == 1 && figure.cols == 2
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        DiagnosticReporter::from_config(&config)
            .emit(&bundle(&names), &names, Phase::Test, 0, 0, &mut telemetry)
            .unwrap();
    }

    #[test]
    fn test_name_count_mismatch_records_nothing() {
        let names = ClassNames::from(&["a", "b"][..]);
        let metrics = bundle(&names);
        let fewer = ClassNames::from(&["a"][..]);
        let sink = RecordingTelemetry::new();
        let err = DiagnosticReporter::default()
            .emit(&metrics, &fewer, Phase::Train, 0, 0, &mut sink.clone())
            .unwrap_err();
        assert!(err.is_shape_mismatch());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_text_block_holds_report_and_every_matrix() {
        let names = ClassNames::from(&["Urban fabric", "Arable land"][..]);
        let metrics = bundle(&names);
        let block = text_block(&metrics, &names, Phase::Validate, 4);
        assert!(block.starts_with("val epoch: 4\n"));
        assert!(block.contains(&metrics.report.to_string()));
        assert!(block.contains("val Confusion matrices:"));
        assert!(block.contains("Urban fabric:\n"));
        assert!(block.contains("Arable land:\n"));
        assert!(block.contains(&metrics.confusion_matrices[1].to_string()));
    }
}
