// ============================================================
// Layer 5 — Predictor
// ============================================================
// Rebuilds a trained PromptedMlm from a checkpoint directory
// and decodes batches with it.

use anyhow::Result;
use burn::prelude::*;

use crate::data::{batcher::TriggerBatch, templatizer::IGNORE_INDEX};
use crate::domain::strategy::DecodingStrategy;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::decoder::decode;
use crate::ml::model::{MlmEncoderConfig, PromptedMlm};
use crate::ml::readback::to_i64_vec;

pub type InferBackend = burn::backend::Wgpu;

/// Decoded tokens of one row, in predict-slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPrediction {
    pub tokens: Vec<u32>,
    pub gold:   Vec<u32>,
}

impl RowPrediction {
    pub fn is_exact(&self) -> bool {
        self.tokens == self.gold
    }
}

pub struct Predictor<B: Backend> {
    model:    PromptedMlm<B>,
    strategy: DecodingStrategy,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: PromptedMlm<B>, strategy: DecodingStrategy) -> Self {
        Self { model, strategy }
    }

    /// Build the model `config` describes (dropout off) and load
    /// the checkpoint's weights into it.
    pub fn from_checkpoint(
        ckpt:         &CheckpointManager,
        config:       &MlmEncoderConfig,
        num_triggers: usize,
        strategy:     DecodingStrategy,
        device:       &B::Device,
    ) -> Result<Self> {
        let encoder = config.clone().with_dropout(0.0).init::<B>(device);
        let model   = ckpt.load_model(PromptedMlm::new(encoder, num_triggers, device), device)?;
        Ok(Self::new(model, strategy))
    }

    pub fn predict(&self, batch: TriggerBatch<B>) -> Result<Vec<RowPrediction>> {
        let seq_len = batch.inputs.seq_len().max(1);
        let decoded = decode(&self.model, batch.inputs, self.strategy)?;
        let predicted = to_i64_vec(decoded.predictions)?;
        let gold      = to_i64_vec(batch.labels)?;

        let rows = predicted
            .chunks(seq_len)
            .zip(gold.chunks(seq_len))
            .map(|(p, g)| RowPrediction {
                tokens: p.iter().filter(|&&t| t != IGNORE_INDEX).map(|&t| t as u32).collect(),
                gold:   g.iter().filter(|&&t| t != IGNORE_INDEX).map(|&t| t as u32).collect(),
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::TriggerBatcher;
    use crate::data::templatizer::TemplatizedInstance;
    use crate::ml::model::MlmEncoderConfig;
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = burn::backend::NdArray;

    fn batch() -> TriggerBatch<TestBackend> {
        let item = |gold: i64| TemplatizedInstance {
            input_ids:      vec![2, 4, 4, 3],
            token_type_ids: vec![0; 4],
            trigger_mask:   vec![false, true, false, false],
            predict_mask:   vec![false, false, true, false],
            labels:         vec![IGNORE_INDEX, IGNORE_INDEX, gold, IGNORE_INDEX],
        };
        TriggerBatcher::<TestBackend>::new(Default::default(), 0).batch(vec![item(7), item(8)])
    }

    #[test]
    fn test_rows_hold_one_token_per_predict_slot() {
        let device = Default::default();
        let config = MlmEncoderConfig::new(12)
            .with_max_position_embeddings(8)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16)
            .with_dropout(0.0);
        let model = PromptedMlm::new(config.init::<TestBackend>(&device), 1, &device);

        let rows = Predictor::new(model, DecodingStrategy::Iterative).predict(batch()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].gold, vec![7]);
        assert_eq!(rows[1].gold, vec![8]);
        assert!(rows.iter().all(|r| r.tokens.len() == 1 && (r.tokens[0] as usize) < 12));
    }

    #[test]
    fn test_from_checkpoint_restores_saved_model() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path());
        let device = Default::default();
        let config = MlmEncoderConfig::new(12)
            .with_max_position_embeddings(8)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16);
        ckpt.save_encoder_config(&config).unwrap();
        ckpt.save_model(&PromptedMlm::new(config.init::<TestBackend>(&device), 1, &device)).unwrap();

        let config = ckpt.load_encoder_config().unwrap();
        let predictor = Predictor::<TestBackend>::from_checkpoint(&ckpt, &config, 1, DecodingStrategy::Parallel, &device).unwrap();
        assert_eq!(predictor.predict(batch()).unwrap().len(), 2);
    }

    #[test]
    fn test_row_exactness() {
        let row = RowPrediction { tokens: vec![5, 6], gold: vec![5, 6] };
        assert!(row.is_exact());
        assert!(!RowPrediction { tokens: vec![5], gold: vec![6] }.is_exact());
    }
}
