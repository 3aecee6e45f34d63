// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores the prompted model as half-precision,
// gzipped MessagePack.
//
// What lives in the checkpoint directory:
//
//   ckpt/
//     model.mpk.gz        ← the best PromptedMlm so far
//                           (trigger vectors + encoder weights)
//     train_config.json   ← the TrainConfig of the run
//     encoder_config.json ← MlmEncoderConfig, to rebuild the model
//     tokenizer.json      ← written by TokenizerStore
//     metrics.csv         ← written by MetricsLogger
//
// Only the best checkpoint is kept: each save overwrites the
// previous one, and `--tmp` removes it once training ends.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    config::Config,
    prelude::*,
    record::{HalfPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::{MlmEncoderConfig, PromptedMlm};

/// Writes `<stem>.mpk.gz`; used for checkpoints and pretrained
/// encoder weights alike.
pub type ModelRecorder = NamedMpkGzFileRecorder<HalfPrecisionSettings>;

pub const MODEL_STEM: &str = "model";
pub const MODEL_FILE: &str = "model.mpk.gz";

const CONFIG_FILE:  &str = "train_config.json";
const ENCODER_FILE: &str = "encoder_config.json";

/// Manages saving and loading of the checkpoint in one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// The directory is only created on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", self.dir.display()))
    }

    /// The recorder appends `.mpk.gz` to this path.
    fn model_stem(&self) -> PathBuf {
        self.dir.join(MODEL_STEM)
    }

    pub fn model_file(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn has_model(&self) -> bool {
        self.model_file().exists()
    }

    /// Overwrite the checkpoint with `model`.
    pub fn save_model<B: Backend>(&self, model: &PromptedMlm<B>) -> Result<()> {
        self.ensure_dir()?;
        let path = self.model_stem();
        ModelRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint to '{}'", self.model_file().display());
        Ok(())
    }

    /// Load the checkpoint into `model`. The architecture (trigger
    /// count, encoder config) must match the one that was saved.
    pub fn load_model<B: Backend>(
        &self,
        model:  PromptedMlm<B>,
        device: &B::Device,
    ) -> Result<PromptedMlm<B>> {
        let path = self.model_stem();
        let record = ModelRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?",
                    path.display())
            })?;
        tracing::info!("Loaded checkpoint from '{}'", self.model_file().display());
        Ok(model.load_record(record))
    }

    pub fn remove_model(&self) -> Result<()> {
        let path = self.model_file();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Cannot remove checkpoint '{}'", path.display()))?;
            tracing::info!("Removed checkpoint '{}'", path.display());
        }
        Ok(())
    }

    pub fn save_encoder_config(&self, config: &MlmEncoderConfig) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(ENCODER_FILE);
        config
            .save(&path)
            .with_context(|| format!("Cannot write encoder config to '{}'", path.display()))
    }

    pub fn load_encoder_config(&self) -> Result<MlmEncoderConfig> {
        let path = self.dir.join(ENCODER_FILE);
        MlmEncoderConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read encoder config '{}': {e}", path.display()))
    }

    /// Save the training configuration so `predict` can rebuild
    /// the templatizer and the model.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        self.ensure_dir()?;
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!(
                    "Cannot read config from '{}'. \
                     Make sure you have run 'train' before 'predict'.",
                    path.display()
                )
            })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed training config '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::readback::to_f32_vec;

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_config_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        let mut cfg = TrainConfig::default();
        cfg.template = "[CLS] {sentence} [T] [P] [SEP]".to_string();
        cfg.limit    = Some(16);

        ckpt.save_config(&cfg).unwrap();
        let loaded = ckpt.load_config().unwrap();
        assert_eq!(loaded.template, cfg.template);
        assert_eq!(loaded.limit, Some(16));
        assert_eq!(loaded.evaluation_strategy, cfg.evaluation_strategy);
    }

    #[test]
    fn test_encoder_config_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        ckpt.save_encoder_config(&MlmEncoderConfig::new(42).with_num_layers(2)).unwrap();
        let loaded = ckpt.load_encoder_config().unwrap();
        assert_eq!((loaded.vocab_size, loaded.num_layers), (42, 2));
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointManager::new(dir.path()).load_config().unwrap_err();
        assert!(err.to_string().contains("train_config.json"));
    }

    #[test]
    fn test_model_save_load_remove() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path());
        let device = Default::default();
        let config = MlmEncoderConfig::new(10)
            .with_max_position_embeddings(8)
            .with_d_model(4)
            .with_num_heads(1)
            .with_num_layers(1)
            .with_d_ff(8);

        let saved = PromptedMlm::new(config.init::<TestBackend>(&device), 2, &device);
        assert!(!ckpt.has_model());
        ckpt.save_model(&saved).unwrap();
        assert!(ckpt.has_model());

        let fresh  = PromptedMlm::new(config.init::<TestBackend>(&device), 2, &device);
        let loaded = ckpt.load_model(fresh, &device).unwrap();
        // the recorder stores half precision
        let loaded = to_f32_vec(loaded.triggers.val()).unwrap();
        let saved  = to_f32_vec(saved.triggers.val()).unwrap();
        assert_eq!(loaded.len(), saved.len());
        assert!(loaded.iter().zip(&saved).all(|(a, b)| (a - b).abs() < 1e-2));

        ckpt.remove_model().unwrap();
        assert!(!ckpt.has_model());
    }

    #[test]
    fn test_saved_model_file_is_the_one_checked_for() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path());
        let device = Default::default();
        let config = MlmEncoderConfig::new(6)
            .with_max_position_embeddings(4)
            .with_d_model(4)
            .with_num_heads(1)
            .with_num_layers(1)
            .with_d_ff(4);
        ckpt.save_model(&PromptedMlm::new(config.init::<TestBackend>(&device), 1, &device)).unwrap();

        let files: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec![MODEL_FILE.to_string()]);
        assert_eq!(ckpt.model_file(), dir.path().join(MODEL_FILE));
    }

    #[test]
    fn test_directory_created_on_first_save_only() {
        let root = tempfile::tempdir().unwrap();
        let dir  = root.path().join("ckpt");
        let ckpt = CheckpointManager::new(&dir);
        assert!(!dir.exists());
        assert!(ckpt.load_config().is_err());
        assert!(!dir.exists());

        ckpt.save_config(&TrainConfig::default()).unwrap();
        assert!(dir.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_unwritable_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        let err = CheckpointManager::new(&file).save_config(&TrainConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Cannot create checkpoint directory"));
    }
}
