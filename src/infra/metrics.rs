// ============================================================
// Layer 6: Metrics Logger
// ============================================================
// Appends one CSV row per epoch next to the saved experiment.
//
// Output file: <savepath>/<id>.csv
//
// Example CSV output:
//   epoch,learning_rate,train_ppl,valid_ppl,mean_grad_norm,improved
//   1,0.050000,812.403300,463.118200,4.210000,1
//   2,0.049875,401.992100,389.541700,3.870000,1
//   3,0.049750,330.120400,391.002300,3.650000,0
//
// How to read the metrics:
//   - valid_ppl should fall with train_ppl; a rising valid_ppl
//     while train_ppl keeps falling means overfitting
//   - improved=1 marks the epochs whose model was saved
//   - mean_grad_norm is empty when clipping is disabled
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::experiment::EpochMetrics;

const HEADER: &str = "epoch,learning_rate,train_ppl,valid_ppl,mean_grad_norm,improved";

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Start `<dir>/<id>.csv` with a header row. An existing file for
    /// the same id is replaced, matching the experiment file it
    /// belongs to.
    pub fn new(dir: impl AsRef<Path>, id: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join(format!("{id}.csv"));
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create metrics file '{}'", csv_path.display()))?;
        writeln!(f, "{HEADER}")?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics, improved: bool) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(f, "{}", Self::row(m, improved))?;

        tracing::debug!(
            "Logged epoch {} metrics: train_ppl={:.3}, valid_ppl={:.3}",
            m.epoch,
            m.train_ppl,
            m.valid_ppl,
        );
        Ok(())
    }

    fn row(m: &EpochMetrics, improved: bool) -> String {
        format!(
            "{},{:.6},{:.6},{:.6},{},{}",
            m.epoch,
            m.learning_rate,
            m.train_ppl,
            m.valid_ppl,
            m.mean_grad_norm.map(|n| format!("{n:.6}")).unwrap_or_default(),
            u8::from(improved),
        )
    }

    #[cfg(test)]
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, mean_grad_norm: Option<f64>) -> EpochMetrics {
        EpochMetrics { epoch, learning_rate: 0.05, train_ppl: 120.5, valid_ppl: 110.25, mean_grad_norm }
    }

    #[test]
    fn test_row_format() {
        assert_eq!(
            MetricsLogger::row(&metrics(3, Some(2.5)), true),
            "3,0.050000,120.500000,110.250000,2.500000,1"
        );
        assert_eq!(
            MetricsLogger::row(&metrics(4, None), false),
            "4,0.050000,120.500000,110.250000,,0"
        );
    }

    #[test]
    fn test_header_then_rows() {
        let tmp    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(tmp.path().join("out"), "run").unwrap();
        logger.log(&metrics(1, None), true).unwrap();
        logger.log(&metrics(2, None), false).unwrap();

        let text  = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[2].starts_with("2,"));
    }

    #[test]
    fn test_new_run_replaces_old_rows() {
        let tmp = tempfile::tempdir().unwrap();
        MetricsLogger::new(tmp.path(), "run").unwrap().log(&metrics(1, None), true).unwrap();
        let fresh = MetricsLogger::new(tmp.path(), "run").unwrap();
        assert_eq!(fs::read_to_string(fresh.csv_path()).unwrap().lines().count(), 1);
    }
}
