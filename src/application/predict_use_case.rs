// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Decodes a labelled dataset with a trained checkpoint:
//
//   1. Load train_config.json, encoder_config.json and
//      tokenizer.json from --ckpt-dir
//   2. Rebuild the templatizer the run used, with the same
//      length limit
//   3. Templatize the dataset
//   4. Decode every batch and render the predicted spans
//
// The decoding strategy defaults to the one the run trained
// with, then to parallel.

use std::path::Path;

use anyhow::Result;
use burn::data::dataloader::DataLoaderBuilder;
use rand::{rngs::StdRng, SeedableRng};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::TriggerBatcher,
    dataset::load_trigger_dataset,
    preprocessor::PreprocessorKind,
    templatizer::Templatizer,
};
use crate::domain::strategy::DecodingStrategy;
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::model::MlmEncoderConfig;
use crate::ml::predictor::{InferBackend, Predictor};

pub struct PredictRequest {
    pub ckpt_dir:          String,
    pub data:              String,
    pub preprocessor:      Option<PreprocessorKind>,
    pub bsz:               usize,
    pub decoding_strategy: Option<DecodingStrategy>,
}

/// One decoded instance.
#[derive(Debug, Clone)]
pub struct PredictedSpan {
    pub predicted: String,
    pub gold:      String,
    pub exact:     bool,
}

#[derive(Debug, Clone)]
pub struct PredictReport {
    pub spans:    Vec<PredictedSpan>,
    pub strategy: DecodingStrategy,
}

impl PredictReport {
    pub fn correct(&self) -> usize {
        self.spans.iter().filter(|s| s.exact).count()
    }

    pub fn accuracy(&self) -> f64 {
        if self.spans.is_empty() { 0.0 } else { self.correct() as f64 / self.spans.len() as f64 }
    }
}

/// Everything `train` left in the checkpoint directory except the
/// weights, with the templatizer rebuilt from it.
pub struct SavedRun {
    pub config:         TrainConfig,
    pub encoder_config: MlmEncoderConfig,
    pub templatizer:    Templatizer,
}

impl SavedRun {
    pub fn load(ckpt: &CheckpointManager) -> Result<Self> {
        let config         = ckpt.load_config()?;
        let encoder_config = ckpt.load_encoder_config()?;
        let (tokenizer, ids) = TokenizerStore::new(ckpt.dir()).load()?;
        let templatizer = config
            .templatizer(tokenizer, ids)?
            .with_max_len(encoder_config.max_position_embeddings);
        Ok(Self { config, encoder_config, templatizer })
    }
}

pub struct PredictUseCase {
    request: PredictRequest,
}

impl PredictUseCase {
    pub fn new(request: PredictRequest) -> Self {
        Self { request }
    }

    pub fn execute(&self) -> Result<PredictReport> {
        let req = &self.request;
        anyhow::ensure!(req.bsz > 0, "--bsz must be positive");

        let ckpt = CheckpointManager::new(&req.ckpt_dir);
        let SavedRun { config: cfg, encoder_config, templatizer } = SavedRun::load(&ckpt)?;
        let tokenizer = templatizer.tokenizer();
        let ids       = templatizer.special_ids();

        let strategy = req
            .decoding_strategy
            .or(cfg.decoding_strategy)
            .unwrap_or(DecodingStrategy::Parallel);
        tracing::info!("Decoding '{}' with the {} strategy", req.data, strategy);

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let preprocessor = req.preprocessor.or(cfg.preprocessor);
        let dataset = load_trigger_dataset(Path::new(&req.data), &templatizer, preprocessor, None, &mut rng)?;

        let device = burn::backend::wgpu::WgpuDevice::default();
        let predictor = Predictor::<InferBackend>::from_checkpoint(
            &ckpt, &encoder_config, templatizer.num_trigger_tokens(), strategy, &device,
        )?;

        let loader = DataLoaderBuilder::new(TriggerBatcher::<InferBackend>::new(device.clone(), ids.pad))
            .batch_size(req.bsz)
            .num_workers(1)
            .build(dataset);

        let mut spans = Vec::new();
        for batch in loader.iter() {
            for row in predictor.predict(batch)? {
                let render = |tokens: &[u32]| {
                    tokenizer
                        .decode(tokens, true)
                        .map_err(|e| anyhow::anyhow!("Decode: {e}"))
                };
                spans.push(PredictedSpan {
                    predicted: render(&row.tokens)?,
                    gold:      render(&row.gold)?,
                    exact:     row.is_exact(),
                });
            }
        }
        Ok(PredictReport { spans, strategy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::test_support::prompt_tokenizer;
    use std::io::Write;

    fn span(exact: bool) -> PredictedSpan {
        PredictedSpan { predicted: "a".into(), gold: "a".into(), exact }
    }

    #[test]
    fn test_report_accuracy() {
        let report = PredictReport { spans: vec![span(true), span(false), span(true), span(true)], strategy: DecodingStrategy::Parallel };
        assert_eq!(report.correct(), 3);
        assert_eq!(report.accuracy(), 0.75);

        let empty = PredictReport { spans: vec![], strategy: DecodingStrategy::Parallel };
        assert_eq!(empty.accuracy(), 0.0);
    }

    #[test]
    fn test_saved_run_skips_instances_longer_than_the_model() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        let cfg = TrainConfig {
            template:  "[CLS] {sentence} [T] [P] [SEP]".to_string(),
            label_map: Some([("1", "good")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..TrainConfig::default()
        };
        ckpt.save_config(&cfg).unwrap();
        ckpt.save_encoder_config(&MlmEncoderConfig::new(12).with_max_position_embeddings(6)).unwrap();
        let (tok, _) = prompt_tokenizer(&["a", "good", "film"]);
        TokenizerStore::new(dir.path()).save(&tok).unwrap();

        let data = dir.path().join("data.jsonl");
        let mut file = std::fs::File::create(&data).unwrap();
        writeln!(file, r#"{{"sentence": "a film", "label": "1"}}"#).unwrap();
        writeln!(file, r#"{{"sentence": "a good good good film", "label": "1"}}"#).unwrap();

        let run = SavedRun::load(&ckpt).unwrap();
        assert_eq!(run.encoder_config.max_position_embeddings, 6);
        let mut rng = StdRng::seed_from_u64(0);
        let dataset = load_trigger_dataset(&data, &run.templatizer, None, None, &mut rng).unwrap();
        assert_eq!(dataset.sample_count(), 1);
    }
}
