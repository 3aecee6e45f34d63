// ============================================================
// Layer 4 — Dataset Readers ("preprocessors")
// ============================================================
// Turns a dataset file into a Vec<Instance>. Two on-disk
// formats are supported:
//
//   .jsonl — one JSON object per line
//            {"sentence": "a gorgeous film", "label": 1}
//   .tsv   — a header row naming the fields, then one
//            tab-separated record per line
//
// If the user doesn't pick a reader explicitly, the file
// extension decides.
//
// Reference: serde_json documentation
//            Rust Book §9 (Error Handling)

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::instance::Instance;
use crate::domain::traits::InstanceSource;

// ─── PreprocessorKind ─────────────────────────────────────────────────────────
/// The supported dataset formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessorKind {
    Jsonl,
    Tsv,
}

impl PreprocessorKind {
    /// Pick a reader from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") => Ok(Self::Jsonl),
            Some("tsv")   => Ok(Self::Tsv),
            other => bail!(
                "cannot infer a preprocessor for '{}' (extension {:?}); pass --preprocessor",
                path.display(),
                other
            ),
        }
    }

    /// Build the reader for `path`.
    pub fn reader(self, path: impl Into<PathBuf>) -> Box<dyn InstanceSource> {
        match self {
            Self::Jsonl => Box::new(JsonlReader::new(path)),
            Self::Tsv   => Box::new(TsvReader::new(path)),
        }
    }
}

impl FromStr for PreprocessorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(Self::Jsonl),
            "tsv"   => Ok(Self::Tsv),
            other => bail!("unknown preprocessor '{other}' (expected jsonl or tsv)"),
        }
    }
}

impl fmt::Display for PreprocessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jsonl => f.write_str("jsonl"),
            Self::Tsv   => f.write_str("tsv"),
        }
    }
}

// ─── JsonlReader ──────────────────────────────────────────────────────────────
/// Reads one JSON object per non-empty line.
pub struct JsonlReader {
    path: PathBuf,
}

impl JsonlReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InstanceSource for JsonlReader {
    fn read_all(&self) -> Result<Vec<Instance>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read '{}'", self.path.display()))?;

        let mut instances = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let obj: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
                .with_context(|| {
                    format!("{}:{}: not a JSON object", self.path.display(), lineno + 1)
                })?;

            let mut instance = Instance::new();
            for (key, value) in obj {
                // Templates only ever splice text, so scalars are
                // stringified the way they'd print.
                let text = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null      => String::new(),
                    other                        => other.to_string(),
                };
                instance.insert(key, text);
            }
            instances.push(instance);
        }

        tracing::debug!("Read {} instances from '{}'", instances.len(), self.path.display());
        Ok(instances)
    }
}

// ─── TsvReader ────────────────────────────────────────────────────────────────
/// Reads tab-separated records; the first line holds the field names.
pub struct TsvReader {
    path: PathBuf,
}

impl TsvReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InstanceSource for TsvReader {
    fn read_all(&self) -> Result<Vec<Instance>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read '{}'", self.path.display()))?;

        let mut lines = text.lines().enumerate();
        let header: Vec<&str> = match lines.next() {
            Some((_, h)) => h.split('\t').map(str::trim).collect(),
            None => return Ok(Vec::new()),
        };

        let mut instances = Vec::new();
        for (lineno, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() != header.len() {
                bail!(
                    "{}:{}: expected {} columns, found {}",
                    self.path.display(),
                    lineno + 1,
                    header.len(),
                    cols.len()
                );
            }
            let mut instance = Instance::new();
            for (name, value) in header.iter().zip(cols) {
                instance.insert(*name, value);
            }
            instances.push(instance);
        }

        tracing::debug!("Read {} instances from '{}'", instances.len(), self.path.display());
        Ok(instances)
    }
}
