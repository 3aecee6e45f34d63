// ============================================================
// Layer 3 — Strategy Enums
// ============================================================
// Every "which algorithm?" choice the user makes on the command
// line is a closed enum here rather than a free-form string.
// That way an unknown name is rejected once, at parse time,
// and every `match` downstream is checked for exhaustiveness.
//
//   DecodingStrategy   — order in which predict slots are filled
//   EvaluationStrategy — how a batch is scored
//   FinetuneMode       — which weights the optimiser may touch
//
// Reference: Rust Book §6 (Enums and Pattern Matching)

use std::{fmt, str::FromStr};

use anyhow::bail;
use serde::{Deserialize, Serialize};

// ─── DecodingStrategy ─────────────────────────────────────────────────────────
/// Policy for resolving the predict positions of a cloze template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodingStrategy {
    /// All predictions made from a single forward pass.
    Parallel,
    /// Predictions committed left to right, one per forward pass.
    Monotonic,
    /// Predictions committed in order of model confidence.
    Iterative,
}

impl DecodingStrategy {
    pub const ALL: [DecodingStrategy; 3] = [Self::Parallel, Self::Monotonic, Self::Iterative];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel  => "parallel",
            Self::Monotonic => "monotonic",
            Self::Iterative => "iterative",
        }
    }
}

impl FromStr for DecodingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel"  => Ok(Self::Parallel),
            "monotonic" => Ok(Self::Monotonic),
            "iterative" => Ok(Self::Iterative),
            other => bail!(
                "unknown decoding strategy '{other}' (expected one of: parallel, monotonic, iterative)"
            ),
        }
    }
}

impl fmt::Display for DecodingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── EvaluationStrategy ───────────────────────────────────────────────────────
/// How each batch is turned into a loss and a correct-count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationStrategy {
    /// Generative tasks: decoded tokens must equal the label exactly.
    ExactMatch,
    /// Classification over the fixed set of label-map tokens.
    MultipleChoice,
}

impl FromStr for EvaluationStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact-match"     => Ok(Self::ExactMatch),
            "multiple-choice" => Ok(Self::MultipleChoice),
            other => bail!(
                "unknown evaluation strategy '{other}' (expected exact-match or multiple-choice)"
            ),
        }
    }
}

impl fmt::Display for EvaluationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactMatch     => f.write_str("exact-match"),
            Self::MultipleChoice => f.write_str("multiple-choice"),
        }
    }
}

// ─── FinetuneMode ─────────────────────────────────────────────────────────────
/// Which parameters, besides the triggers, receive optimiser updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinetuneMode {
    /// Only the trigger embeddings are tuned.
    #[default]
    Trigger,
    /// Triggers plus the MLM head.
    Partial,
    /// Triggers plus every encoder weight.
    All,
}

impl FromStr for FinetuneMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trigger" => Ok(Self::Trigger),
            "partial" => Ok(Self::Partial),
            "all"     => Ok(Self::All),
            other => bail!("unknown finetune mode '{other}' (expected trigger, partial or all)"),
        }
    }
}

impl fmt::Display for FinetuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Partial => f.write_str("partial"),
            Self::All     => f.write_str("all"),
        }
    }
}
