// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the flag combination  (Layer 2)
//   Step 2: Load the tokenizer             (Layer 6 - infra)
//   Step 3: Build the templatizer          (Layer 4 - data)
//   Step 4: Build the evaluator            (Layer 5 - ml)
//   Step 5: Load train/dev/test datasets   (Layer 4 - data)
//   Step 6: Save configs                   (Layer 6 - infra)
//   Step 7: Run training loop              (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{collections::BTreeMap, path::Path};

use anyhow::{bail, ensure, Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::data::{
    dataset::{load_trigger_dataset, TriggerDataset},
    preprocessor::PreprocessorKind,
    templatizer::Templatizer,
};
use crate::domain::strategy::{DecodingStrategy, EvaluationStrategy, FinetuneMode};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    model_dir::ModelDir,
    tokenizer_store::SpecialTokenIds,
};
use crate::ml::{
    evaluator::Evaluator,
    trainer::{run_training, TrainingSetup, TrainingSummary},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings for a training run. Saved next to the checkpoint
// so `predict` can rebuild the same templatizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model_name:          String,
    pub train:               String,
    pub dev:                 String,
    pub test:                String,
    pub ckpt_dir:            String,
    pub template:            String,
    pub label_map:           Option<BTreeMap<String, String>>,
    pub initial_trigger:     Option<Vec<String>>,
    pub label_field:         String,
    pub add_padding:         bool,
    pub preprocessor:        Option<PreprocessorKind>,
    pub evaluation_strategy: EvaluationStrategy,
    pub decoding_strategy:   Option<DecodingStrategy>,
    pub finetune_mode:       FinetuneMode,
    pub bsz:                 usize,
    pub accumulation_steps:  usize,
    pub epochs:              usize,
    pub lr:                  f64,
    pub finetune_lr:         Option<f64>,
    pub disable_dropout:     bool,
    pub clip:                Option<f64>,
    pub limit:               Option<usize>,
    pub seed:                u64,
    pub force_overwrite:     bool,
    pub quiet:               bool,
    pub tmp:                 bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_name:          "bert-base-cased".to_string(),
            train:               "data/train.jsonl".to_string(),
            dev:                 "data/dev.jsonl".to_string(),
            test:                "data/test.jsonl".to_string(),
            ckpt_dir:            "ckpt".to_string(),
            template:            "[CLS] {sentence} [T] [T] [T] [P] . [SEP]".to_string(),
            label_map:           None,
            initial_trigger:     None,
            label_field:         "label".to_string(),
            add_padding:         false,
            preprocessor:        None,
            evaluation_strategy: EvaluationStrategy::MultipleChoice,
            decoding_strategy:   None,
            finetune_mode:       FinetuneMode::Trigger,
            bsz:                 32,
            accumulation_steps:  1,
            epochs:              10,
            lr:                  1e-4,
            finetune_lr:         None,
            disable_dropout:     false,
            clip:                None,
            limit:               None,
            seed:                1234,
            force_overwrite:     false,
            quiet:               false,
            tmp:                 false,
        }
    }
}

impl TrainConfig {
    /// Reject flag combinations the evaluators can't serve.
    pub fn validate(&self) -> Result<()> {
        match self.evaluation_strategy {
            EvaluationStrategy::ExactMatch if self.decoding_strategy.is_none() => {
                bail!("--evaluation-strategy exact-match requires --decoding-strategy")
            }
            EvaluationStrategy::MultipleChoice if self.label_map.is_none() => {
                bail!("--evaluation-strategy multiple-choice requires --label-map")
            }
            _ => {}
        }
        ensure!(self.bsz > 0, "--bsz must be positive");
        ensure!(self.accumulation_steps > 0, "--accumulation-steps must be positive");
        ensure!(self.lr > 0.0, "--lr must be positive");
        Ok(())
    }

    /// The templatizer this run's datasets go through.
    pub fn templatizer(&self, tokenizer: Tokenizer, ids: SpecialTokenIds) -> Result<Templatizer> {
        Templatizer::new(
            self.template.clone(),
            tokenizer,
            ids,
            self.label_field.clone(),
            self.label_map.clone(),
            self.add_padding,
        )
    }
}

/// Parse a `--label-map` JSON object such as `{"0": "terrible", "1": "great"}`.
pub fn parse_label_map(json: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(json).with_context(|| format!("--label-map is not a JSON object of strings: {json}"))
}

/// Vocabulary ids of the `--initial-trigger` tokens; one per trigger slot.
pub fn resolve_initial_trigger(
    tokenizer:    &Tokenizer,
    tokens:       &[String],
    num_triggers: usize,
) -> Result<Vec<u32>> {
    ensure!(
        tokens.len() == num_triggers,
        "--initial-trigger has {} tokens but the template has {num_triggers} trigger slots",
        tokens.len()
    );
    tokens
        .iter()
        .map(|t| {
            tokenizer
                .token_to_id(t)
                .with_context(|| format!("Initial trigger token '{t}' is not in the vocabulary"))
        })
        .collect()
}

/// Train, dev and test datasets. `--limit` caps train and dev;
/// test is always evaluated in full.
pub fn load_splits(
    cfg:         &TrainConfig,
    templatizer: &Templatizer,
) -> Result<(TriggerDataset, TriggerDataset, TriggerDataset)> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let train = load_trigger_dataset(Path::new(&cfg.train), templatizer, cfg.preprocessor, cfg.limit, &mut rng)?;
    let dev   = load_trigger_dataset(Path::new(&cfg.dev),   templatizer, cfg.preprocessor, cfg.limit, &mut rng)?;
    let test  = load_trigger_dataset(Path::new(&cfg.test),  templatizer, cfg.preprocessor, None, &mut rng)?;
    tracing::info!(
        "Datasets: {} train, {} dev, {} test",
        train.sample_count(), dev.sample_count(), test.sample_count()
    );
    Ok((train, dev, test))
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingSummary> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;
        tracing::debug!("Training config: {:?}", cfg);

        // ── Step 2: Tokenizer and encoder config ──────────────────────────────
        let model_dir = ModelDir::new(&cfg.model_name);
        let (tokenizer, ids) = model_dir.load_tokenizer()?;
        let encoder_config = model_dir.encoder_config(&tokenizer, ids)?;

        // ── Step 3: Templatizer ───────────────────────────────────────────────
        let templatizer = cfg
            .templatizer(tokenizer.clone(), ids)?
            .with_max_len(encoder_config.max_position_embeddings);
        let num_triggers = templatizer.num_trigger_tokens();
        let initial_trigger = cfg
            .initial_trigger
            .as_deref()
            .map(|tokens| resolve_initial_trigger(&tokenizer, tokens, num_triggers))
            .transpose()?;

        // ── Step 4: Evaluator ─────────────────────────────────────────────────
        let evaluator = Evaluator::new(
            cfg.evaluation_strategy,
            cfg.decoding_strategy,
            cfg.label_map.as_ref(),
            &tokenizer,
        )?;

        // ── Step 5: Datasets ──────────────────────────────────────────────────
        let (train, dev, test) = load_splits(cfg, &templatizer)?;

        // ── Step 6: Save configs for prediction ───────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.ckpt_dir);
        ckpt.save_config(cfg)?;
        ckpt.save_encoder_config(&encoder_config)?;
        let metrics = MetricsLogger::new(&cfg.ckpt_dir)?;

        // ── Step 7: Run training loop (Layer 5) ───────────────────────────────
        let setup = TrainingSetup {
            model_dir: &model_dir,
            encoder_config,
            tokenizer: &tokenizer,
            pad_token_id: ids.pad,
            num_triggers,
            initial_trigger,
            evaluator,
            train,
            dev,
            test,
        };
        run_training(cfg, setup, ckpt, metrics)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::test_support::prompt_tokenizer;
    use std::io::Write;

    #[test]
    fn test_exact_match_requires_decoding_strategy() {
        let cfg = TrainConfig { evaluation_strategy: EvaluationStrategy::ExactMatch, ..TrainConfig::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("--decoding-strategy"));

        let cfg = TrainConfig { decoding_strategy: Some(DecodingStrategy::Iterative), ..cfg };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_multiple_choice_requires_label_map() {
        let cfg = TrainConfig::default();
        assert!(cfg.validate().unwrap_err().to_string().contains("--label-map"));

        let cfg = TrainConfig { label_map: Some(parse_label_map(r#"{"0": "bad"}"#).unwrap()), ..cfg };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_label_map() {
        let map = parse_label_map(r#"{"0": "terrible", "1": "great"}"#).unwrap();
        assert_eq!(map.get("1").map(String::as_str), Some("great"));
        assert!(parse_label_map("[1, 2]").is_err());
    }

    #[test]
    fn test_resolve_initial_trigger() {
        let (tok, _) = prompt_tokenizer(&["the", "film"]);
        let tokens = vec!["the".to_string(), "film".to_string()];
        let ids = resolve_initial_trigger(&tok, &tokens, 2).unwrap();
        assert_eq!(ids, vec![tok.token_to_id("the").unwrap(), tok.token_to_id("film").unwrap()]);

        assert!(resolve_initial_trigger(&tok, &tokens, 3).is_err());
        assert!(resolve_initial_trigger(&tok, &["zebra".to_string()], 1).is_err());
    }

    #[test]
    fn test_config_serialises_strategies_by_name() {
        let cfg = TrainConfig {
            decoding_strategy: Some(DecodingStrategy::Monotonic),
            finetune_mode: FinetuneMode::Partial,
            ..TrainConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""decoding_strategy":"monotonic""#));
        assert!(json.contains(r#""evaluation_strategy":"multiple-choice""#));
        assert!(json.contains(r#""finetune_mode":"partial""#));
    }

    #[test]
    fn test_limit_caps_train_and_dev_but_not_test() {
        let dir = tempfile::tempdir().unwrap();
        let split = |name: &str| {
            let path = dir.path().join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "sentence\tlabel").unwrap();
            for i in 0..10 {
                writeln!(file, "a good film\t{}", i % 2).unwrap();
            }
            path.to_string_lossy().into_owned()
        };
        let cfg = TrainConfig {
            train:     split("train.tsv"),
            dev:       split("dev.tsv"),
            test:      split("test.tsv"),
            template:  "[CLS] {sentence} [T] [P] [SEP]".to_string(),
            label_map: Some(parse_label_map(r#"{"0": "bad", "1": "good"}"#).unwrap()),
            limit:     Some(3),
            ..TrainConfig::default()
        };
        let (tok, ids) = prompt_tokenizer(&["a", "good", "bad", "film"]);
        let templatizer = cfg.templatizer(tok, ids).unwrap();

        let (train, dev, test) = load_splits(&cfg, &templatizer).unwrap();
        assert_eq!(
            (train.sample_count(), dev.sample_count(), test.sample_count()),
            (3, 3, 10)
        );
    }
}
