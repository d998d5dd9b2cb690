// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per expert epoch:
//
//   expert,epoch,lr,train_loss,test_loss
//   0,1,0.010000,2.301200,2.297400
//   0,2,0.010000,2.104400,
//   ...
//
// test_loss is left empty when test evaluation is disabled.
// Output file: {save_dir}/metrics.csv, appended across runs.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::ml::trainer::EpochStats;

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "expert,epoch,lr,train_loss,test_loss")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    /// Append the row for `stats` (epoch written 1-based).
    pub fn log(&self, expert: usize, stats: &EpochStats) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        let test_loss = stats.test_loss.map(|l| format!("{l:.6}")).unwrap_or_default();
        writeln!(
            f,
            "{},{},{:.6},{:.6},{}",
            expert,
            stats.epoch + 1,
            stats.lr,
            stats.train_loss,
            test_loss,
        )?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(0, &EpochStats { epoch: 0, lr: 0.01, train_loss: 2.5, test_loss: Some(2.25) }).unwrap();
        logger.log(1, &EpochStats { epoch: 4, lr: 0.001, train_loss: 1.0, test_loss: None }).unwrap();

        // reopening keeps the existing rows and header
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let text = fs::read_to_string(&logger.csv_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "expert,epoch,lr,train_loss,test_loss",
            "0,1,0.010000,2.500000,2.250000",
            "1,5,0.001000,1.000000,",
        ]);
    }
}
