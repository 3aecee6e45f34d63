// ============================================================
// Layer 6 — Pretrained Model Directory
// ============================================================
// `--model-name` points at a local directory describing the
// underlying masked language model:
//
//   bert-mini/
//     tokenizer.json   ← required (HuggingFace format)
//     config.json      ← MlmEncoderConfig; optional
//     model.mpk.gz     ← MlmEncoder weights (half precision,
//                        gzipped MessagePack); optional
//
// Missing optional files fall back to defaults with a warning,
// which is handy for smoke runs but won't learn much.

use anyhow::{Context, Result};
use std::path::PathBuf;
use burn::{
    config::Config,
    prelude::*,
    record::Recorder,
};
use tokenizers::Tokenizer;

use crate::infra::checkpoint::{ModelRecorder, MODEL_FILE, MODEL_STEM};
use crate::infra::tokenizer_store::{embedding_vocab_size, SpecialTokenIds, TokenizerStore};
use crate::ml::model::{MlmEncoder, MlmEncoderConfig};

pub struct ModelDir {
    dir: PathBuf,
}

impl ModelDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load_tokenizer(&self) -> Result<(Tokenizer, SpecialTokenIds)> {
        TokenizerStore::new(&self.dir)
            .load()
            .with_context(|| format!("Model directory '{}' has no usable tokenizer", self.dir.display()))
    }

    /// Read `config.json`, or build a default config covering the
    /// tokenizer's vocabulary. The [T]/[P] placeholders are left
    /// out of the count: they never reach the embedding table.
    pub fn encoder_config(&self, tokenizer: &Tokenizer, ids: SpecialTokenIds) -> Result<MlmEncoderConfig> {
        let vocab_size = embedding_vocab_size(tokenizer, ids);
        let path = self.dir.join("config.json");
        if !path.exists() {
            tracing::warn!(
                "No config.json in '{}'; using default encoder sized to vocab {vocab_size}",
                self.dir.display()
            );
            return Ok(MlmEncoderConfig::new(vocab_size));
        }
        let config = MlmEncoderConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read encoder config '{}': {e}", path.display()))?;
        anyhow::ensure!(
            config.vocab_size >= vocab_size,
            "Encoder vocabulary ({}) is smaller than the tokenizer's ({vocab_size})",
            config.vocab_size
        );
        Ok(config)
    }

    /// Build the encoder and load pretrained weights when present.
    pub fn load_encoder<B: Backend>(
        &self,
        config: &MlmEncoderConfig,
        device: &B::Device,
    ) -> Result<MlmEncoder<B>> {
        let encoder = config.init::<B>(device);
        let stem = self.dir.join(MODEL_STEM);
        if !self.dir.join(MODEL_FILE).exists() {
            tracing::warn!(
                "No pretrained weights in '{}'; encoder is randomly initialised",
                self.dir.display()
            );
            return Ok(encoder);
        }
        let record = ModelRecorder::new()
            .load(stem.clone(), device)
            .with_context(|| format!("Cannot load pretrained weights '{}'", stem.display()))?;
        tracing::info!("Loaded pretrained encoder from '{}'", self.dir.display());
        Ok(encoder.load_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::test_support::word_level_tokenizer;
    use crate::ml::readback::to_f32_vec;

    type TestBackend = burn::backend::NdArray;

    fn small(config: MlmEncoderConfig) -> MlmEncoderConfig {
        config
            .with_max_position_embeddings(8)
            .with_d_model(8)
            .with_num_heads(2)
            .with_num_layers(1)
            .with_d_ff(16)
    }

    #[test]
    fn test_defaults_when_optional_files_missing() {
        let dir = tempfile::tempdir().unwrap();
        word_level_tokenizer(&["great"]).save(dir.path().join("tokenizer.json"), false).unwrap();

        let model_dir = ModelDir::new(dir.path());
        let (tok, ids) = model_dir.load_tokenizer().unwrap();
        let config = model_dir.encoder_config(&tok, ids).unwrap();
        // 5 specials + "great"; [T] and [P] get no embedding rows
        assert_eq!(config.vocab_size, 6);
        assert!(ids.trigger >= 6 && ids.predict >= 6);

        let encoder = model_dir.load_encoder::<TestBackend>(&small(config), &Default::default()).unwrap();
        assert_eq!(encoder.hidden_size(), 8);
    }

    #[test]
    fn test_reads_config_json() {
        let dir = tempfile::tempdir().unwrap();
        word_level_tokenizer(&["great", "terrible"]).save(dir.path().join("tokenizer.json"), false).unwrap();
        let model_dir = ModelDir::new(dir.path());
        let (tok, ids) = model_dir.load_tokenizer().unwrap();

        MlmEncoderConfig::new(50).with_d_model(16).save(dir.path().join("config.json")).unwrap();
        let config = model_dir.encoder_config(&tok, ids).unwrap();
        assert_eq!((config.vocab_size, config.d_model), (50, 16));

        MlmEncoderConfig::new(6).save(dir.path().join("config.json")).unwrap();
        assert!(model_dir.encoder_config(&tok, ids).is_err());
    }

    #[test]
    fn test_config_sized_to_base_tokenizer_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        word_level_tokenizer(&["great", "terrible"]).save(dir.path().join("tokenizer.json"), false).unwrap();
        MlmEncoderConfig::new(7).save(dir.path().join("config.json")).unwrap();

        let model_dir = ModelDir::new(dir.path());
        let (tok, ids) = model_dir.load_tokenizer().unwrap();
        assert_eq!(model_dir.encoder_config(&tok, ids).unwrap().vocab_size, 7);
    }

    #[test]
    fn test_loads_pretrained_weights() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = small(MlmEncoderConfig::new(10));
        let pretrained = config.init::<TestBackend>(&device);
        ModelRecorder::new()
            .record(pretrained.clone().into_record(), dir.path().join(MODEL_STEM))
            .unwrap();
        assert!(dir.path().join(MODEL_FILE).exists());

        let loaded = ModelDir::new(dir.path()).load_encoder::<TestBackend>(&config, &device).unwrap();
        let loaded = to_f32_vec(loaded.word_embedding.weight.val()).unwrap();
        let saved  = to_f32_vec(pretrained.word_embedding.weight.val()).unwrap();
        // half precision on disk
        assert!(loaded.iter().zip(&saved).all(|(a, b)| (a - b).abs() < 1e-2));
    }

    #[test]
    fn test_missing_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelDir::new(dir.path()).load_tokenizer().is_err());
    }
}
