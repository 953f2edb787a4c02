//! JSON lines telemetry with PNG figures

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{Telemetry, TelemetryRecord};
use crate::error::Result;
use crate::training::Figure;

/// File holding one JSON object per record
pub const RECORDS_FILE: &str = "telemetry.jsonl";

/// Directory for figure PNGs, relative to the output directory
pub const FIGURES_DIR: &str = "figures";

#[derive(Serialize)]
struct Line<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Appends records to `<dir>/telemetry.jsonl` and figures to `<dir>/figures/`
pub struct JsonlTelemetry {
    output_dir: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlTelemetry {
    /// Open (or create) the output directory
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(output_dir.join(FIGURES_DIR))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join(RECORDS_FILE))?;
        info!("Writing telemetry to {}", output_dir.display());
        Ok(Self {
            output_dir,
            writer: BufWriter::new(file),
        })
    }

    /// Directory records are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write(&mut self, record: &TelemetryRecord) -> Result<()> {
        let line = Line {
            timestamp: Utc::now(),
            record,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// File-name-safe form of a record tag
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

impl Telemetry for JsonlTelemetry {
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.write(&TelemetryRecord::Scalar {
            tag: tag.to_string(),
            value,
            step,
        })
    }

    fn log_figure(&mut self, tag: &str, figure: &Figure, step: usize) -> Result<()> {
        let path = self
            .output_dir
            .join(FIGURES_DIR)
            .join(format!("{}_{:08}.png", sanitize(tag), step));
        std::fs::write(&path, figure.to_png()?)?;
        self.write(&TelemetryRecord::figure(tag, figure, step, Some(path)))
    }

    fn log_hparams(
        &mut self,
        hparams: &serde_json::Value,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.write(&TelemetryRecord::Hparams {
            hparams: hparams.clone(),
            metrics: metrics.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::{ClassNames, ConfusionMatrix};
    use crate::training::ConfusionGrid;
    use tempfile::TempDir;

    fn read_lines(dir: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(dir.join(RECORDS_FILE))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_scalars_and_hparams_are_appended() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlTelemetry::new(dir.path()).unwrap();
        sink.log_scalar("f1_score/val", 0.75, 12).unwrap();
        let metrics: BTreeMap<String, f64> = [
            ("best_metrics/loss".to_string(), f64::INFINITY),
            ("best_metrics/f1_score".to_string(), 0.0),
        ]
        .into();
        sink.log_hparams(&serde_json::json!({"monitor": "loss"}), &metrics).unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "scalar");
        assert_eq!(lines[0]["step"], 12);
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["kind"], "hparams");
        // non-finite values have no JSON form
        assert!(lines[1]["metrics"]["best_metrics/loss"].is_null());
    }

    #[test]
    fn test_figures_written_as_png() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlTelemetry::new(dir.path()).unwrap();
        let names = ClassNames::new(vec!["a".to_string(), "b".to_string()]);
        let figure = ConfusionGrid::new(&names, &[ConfusionMatrix::default(); 2], 1, 2)
            .unwrap()
            .render(2);
        sink.log_figure("confusion matrix/val", &figure, 40).unwrap();

        let png = dir.path().join(FIGURES_DIR).join("confusion_matrix_val_00000040.png");
        assert!(png.exists());
        let lines = read_lines(dir.path());
        assert_eq!(lines[0]["kind"], "figure");
        assert_eq!(lines[0]["panel_titles"][1], "b");
    }
}
