// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `predict`, and all
// their configurable flags.
//
// Strategy flags parse straight into the domain enums through
// their FromStr impls, so an unknown name is rejected here,
// before any file is read.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::collections::BTreeMap;

use clap::{Args, Subcommand};

use crate::application::predict_use_case::PredictRequest;
use crate::application::train_use_case::{parse_label_map, TrainConfig};
use crate::data::preprocessor::PreprocessorKind;
use crate::domain::strategy::{DecodingStrategy, EvaluationStrategy, FinetuneMode};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Learn continuous trigger embeddings for a prompt template
    Train(TrainArgs),

    /// Decode a labelled dataset with a trained checkpoint
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory holding tokenizer.json (and optionally config.json
    /// and model.mpk.gz) of the underlying masked language model
    #[arg(long)]
    pub model_name: String,

    /// Training data (.jsonl or .tsv)
    #[arg(long)]
    pub train: String,

    /// Development data, used to pick the best checkpoint
    #[arg(long)]
    pub dev: String,

    /// Test data, evaluated once with the best checkpoint
    #[arg(long)]
    pub test: String,

    /// Where the checkpoint, tokenizer, config and metrics go
    #[arg(long, default_value = "ckpt")]
    pub ckpt_dir: String,

    /// Prompt template, e.g. "[CLS] {sentence} [T] [T] [P] . [SEP]"
    #[arg(long)]
    pub template: String,

    /// JSON object mapping label values to verbalizer tokens
    #[arg(long, value_parser = parse_label_map)]
    pub label_map: Option<BTreeMap<String, String>>,

    /// Vocabulary tokens whose embeddings initialise the triggers
    #[arg(long, num_args = 1..)]
    pub initial_trigger: Option<Vec<String>>,

    /// Name of the instance field holding the label
    #[arg(long, default_value = "label")]
    pub label_field: String,

    /// Treat the template's [P] run as a fixed-width slot and pad
    /// shorter labels
    #[arg(long)]
    pub add_padding: bool,

    /// Dataset reader: jsonl or tsv (default: from the extension)
    #[arg(long)]
    pub preprocessor: Option<PreprocessorKind>,

    /// exact-match or multiple-choice
    #[arg(long)]
    pub evaluation_strategy: EvaluationStrategy,

    /// parallel, monotonic or iterative (required for exact-match)
    #[arg(long)]
    pub decoding_strategy: Option<DecodingStrategy>,

    /// trigger, partial (adds the MLM head) or all
    #[arg(long, default_value = "trigger")]
    pub finetune_mode: FinetuneMode,

    /// Batch size
    #[arg(long, default_value_t = 32)]
    pub bsz: usize,

    /// Batches whose gradients are summed before each update
    #[arg(long, default_value_t = 1)]
    pub accumulation_steps: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Learning rate of the trigger vectors
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Learning rate of the fine-tuned encoder weights (default: --lr)
    #[arg(long)]
    pub finetune_lr: Option<f64>,

    #[arg(long)]
    pub disable_dropout: bool,

    /// Gradient norm clipping threshold
    #[arg(long)]
    pub clip: Option<f64>,

    /// Randomly keep at most this many train and dev instances
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, default_value_t = 1234)]
    pub seed: u64,

    /// Ignore an existing checkpoint instead of resuming from it
    #[arg(short = 'f', long)]
    pub force_overwrite: bool,

    /// Silence per-batch progress
    #[arg(long)]
    pub quiet: bool,

    /// Delete the checkpoint once training finishes
    #[arg(long)]
    pub tmp: bool,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            model_name:          a.model_name,
            train:               a.train,
            dev:                 a.dev,
            test:                a.test,
            ckpt_dir:            a.ckpt_dir,
            template:            a.template,
            label_map:           a.label_map,
            initial_trigger:     a.initial_trigger,
            label_field:         a.label_field,
            add_padding:         a.add_padding,
            preprocessor:        a.preprocessor,
            evaluation_strategy: a.evaluation_strategy,
            decoding_strategy:   a.decoding_strategy,
            finetune_mode:       a.finetune_mode,
            bsz:                 a.bsz,
            accumulation_steps:  a.accumulation_steps,
            epochs:              a.epochs,
            lr:                  a.lr,
            finetune_lr:         a.finetune_lr,
            disable_dropout:     a.disable_dropout,
            clip:                a.clip,
            limit:               a.limit,
            seed:                a.seed,
            force_overwrite:     a.force_overwrite,
            quiet:               a.quiet,
            tmp:                 a.tmp,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Checkpoint directory written by `train`
    #[arg(long, default_value = "ckpt")]
    pub ckpt_dir: String,

    /// Labelled dataset to decode
    #[arg(long)]
    pub data: String,

    #[arg(long)]
    pub preprocessor: Option<PreprocessorKind>,

    #[arg(long, default_value_t = 32)]
    pub bsz: usize,

    /// Overrides the strategy saved with the checkpoint
    #[arg(long)]
    pub decoding_strategy: Option<DecodingStrategy>,
}

impl From<PredictArgs> for PredictRequest {
    fn from(a: PredictArgs) -> Self {
        PredictRequest {
            ckpt_dir:          a.ckpt_dir,
            data:              a.data,
            preprocessor:      a.preprocessor,
            bsz:               a.bsz,
            decoding_strategy: a.decoding_strategy,
        }
    }
}
