// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one row per (split, epoch) to a CSV file in the
// checkpoint directory.
//
// Output file: ckpt/metrics.csv
//
//   split,epoch,loss,accuracy
//   train,1,1.842113,0.312500
//   dev,1,1.530027,0.437500
//   ...
//   test,0,1.377501,0.515625
//
// The test row is written once after training, with epoch 0.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Train => "train",
            Self::Dev   => "dev",
            Self::Test  => "test",
        })
    }
}

/// One row of metrics for one split of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub split: Split,

    /// Starts at 1; 0 for the final test evaluation
    pub epoch: usize,

    /// Loss summed per example, divided by the number of examples
    pub loss: f64,

    /// Fraction of examples counted correct, in [0.0, 1.0]
    pub accuracy: f64,
}

impl EpochMetrics {
    pub fn new(split: Split, epoch: usize, loss: f64, accuracy: f64) -> Self {
        Self { split, epoch, loss, accuracy }
    }

    /// Strictly better accuracy than the best so far (none yet
    /// counts as worse than anything).
    pub fn improves_on(&self, best_accuracy: Option<f64>) -> bool {
        best_accuracy.map_or(true, |best| self.accuracy > best)
    }
}

/// Appends epoch metrics to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "split,epoch,loss,accuracy")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;
        writeln!(f, "{},{},{:.6},{:.6}", m.split, m.epoch, m.loss, m.accuracy)?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
