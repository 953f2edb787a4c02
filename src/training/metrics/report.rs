//! Per-class classification report

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{f1, ratio, ClassNames, ConfusionMatrix};

const DIGITS: usize = 2;
const HEADERS: [&str; 4] = ["precision", "recall", "f1-score", "support"];

/// One row of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// Class name or average label
    pub name: String,
    /// Precision
    pub precision: f64,
    /// Recall
    pub recall: f64,
    /// F1 score
    pub f1_score: f64,
    /// Positive samples
    pub support: u64,
}

impl ClassReport {
    fn from_matrix(name: &str, cm: &ConfusionMatrix) -> Self {
        Self {
            name: name.to_string(),
            precision: cm.precision(),
            recall: cm.recall(),
            f1_score: cm.f1_score(),
            support: cm.support(),
        }
    }
}

/// Per-class precision/recall/F1/support plus the usual averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// One row per class, in class order
    pub classes: Vec<ClassReport>,
    /// Counts pooled over every (sample, class) pair
    pub micro_avg: ClassReport,
    /// Unweighted mean of the class rows
    pub macro_avg: ClassReport,
    /// Class rows weighted by support
    pub weighted_avg: ClassReport,
    /// Mean of per-sample scores
    pub samples_avg: ClassReport,
}

impl ClassificationReport {
    /// Build from per-class matrices and the row-wise label/prediction sets
    ///
    /// `targets` and `predictions` are `[samples][classes]`; the caller has
    /// already checked that every width matches `class_names`.
    pub fn build(
        class_names: &ClassNames,
        matrices: &[ConfusionMatrix],
        targets: &[Vec<bool>],
        predictions: &[Vec<bool>],
    ) -> Self {
        let classes: Vec<ClassReport> = class_names
            .iter()
            .zip(matrices)
            .map(|(name, cm)| ClassReport::from_matrix(name, cm))
            .collect();

        let mut pooled = ConfusionMatrix::default();
        for cm in matrices {
            pooled += *cm;
        }
        let total_support = pooled.support();
        let micro_avg = ClassReport::from_matrix("micro avg", &pooled);

        let n = classes.len().max(1) as f64;
        let macro_avg = ClassReport {
            name: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1_score: classes.iter().map(|c| c.f1_score).sum::<f64>() / n,
            support: total_support,
        };

        let weighted = |field: fn(&ClassReport) -> f64| {
            if total_support == 0 {
                0.0
            } else {
                classes
                    .iter()
                    .map(|c| field(c) * c.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            }
        };
        let weighted_avg = ClassReport {
            name: "weighted avg".to_string(),
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1_score: weighted(|c| c.f1_score),
            support: total_support,
        };

        let samples_avg = samples_average(targets, predictions, total_support);

        Self {
            classes,
            micro_avg,
            macro_avg,
            weighted_avg,
            samples_avg,
        }
    }

    fn name_width(&self) -> usize {
        self.classes
            .iter()
            .map(|c| c.name.chars().count())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0)
    }
}

fn samples_average(targets: &[Vec<bool>], predictions: &[Vec<bool>], support: u64) -> ClassReport {
    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1_sum = 0.0;
    for (target_row, predicted_row) in targets.iter().zip(predictions) {
        let mut hits = 0u64;
        let mut actual = 0u64;
        let mut predicted = 0u64;
        for (&t, &p) in target_row.iter().zip(predicted_row) {
            hits += u64::from(t && p);
            actual += u64::from(t);
            predicted += u64::from(p);
        }
        let p = ratio(hits, predicted);
        let r = ratio(hits, actual);
        precision += p;
        recall += r;
        f1_sum += f1(p, r);
    }
    let n = targets.len().max(1) as f64;
    ClassReport {
        name: "samples avg".to_string(),
        precision: precision / n,
        recall: recall / n,
        f1_score: f1_sum / n,
        support,
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &ClassReport, width: usize) -> fmt::Result {
    let digits = DIGITS;
    write!(f, "{:>width$} ", row.name)?;
    for value in [row.precision, row.recall, row.f1_score] {
        write!(f, " {value:>9.digits$}")?;
    }
    writeln!(f, " {:>9}", row.support)
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.name_width();
        write!(f, "{:>width$} ", "")?;
        for header in HEADERS {
            write!(f, " {header:>9}")?;
        }
        writeln!(f)?;
        writeln!(f)?;
        for row in &self.classes {
            write_row(f, row, width)?;
        }
        writeln!(f)?;
        for row in [&self.micro_avg, &self.macro_avg, &self.weighted_avg, &self.samples_avg] {
            write_row(f, row, width)?;
        }
        Ok(())
    }
}
