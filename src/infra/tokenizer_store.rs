// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the MLM's tokenizer.json, registers the two prompt
// placeholders as special tokens, and writes the extended
// tokenizer next to the checkpoint so `predict` sees exactly
// the vocabulary that training used.
//
//   [T] — a trigger slot; its embedding is replaced by a
//         learned continuous vector in the forward pass
//   [P] — a predict slot; the model must fill it in
//
// Neither placeholder ever reaches the embedding table: the
// templatizer swaps both for the mask token id, so the
// encoder's vocabulary doesn't need to grow.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokenizers::{AddedToken, Tokenizer};

pub const TRIGGER_TOKEN: &str = "[T]";
pub const PREDICT_TOKEN: &str = "[P]";

const MASK_CANDIDATES: [&str; 2] = ["[MASK]", "<mask>"];
const PAD_CANDIDATES:  [&str; 2] = ["[PAD]", "<pad>"];

/// Ids of the tokens the prompt pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    pub trigger: u32,
    pub predict: u32,
    pub mask:    u32,
    pub pad:     u32,
}

impl SpecialTokenIds {
    /// Look the ids up in a tokenizer that already has [T]/[P] registered.
    pub fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let lookup = |candidates: &[&str], what: &str| -> Result<u32> {
            candidates
                .iter()
                .find_map(|t| tokenizer.token_to_id(t))
                .with_context(|| format!("Tokenizer has no {what} token (tried {candidates:?})"))
        };
        Ok(Self {
            trigger: lookup(&[TRIGGER_TOKEN], "trigger")?,
            predict: lookup(&[PREDICT_TOKEN], "predict")?,
            mask:    lookup(&MASK_CANDIDATES, "mask")?,
            pad:     lookup(&PAD_CANDIDATES, "padding")?,
        })
    }
}

/// Add [T] and [P] as special tokens. Safe to call on a tokenizer
/// that already has them.
pub fn register_prompt_tokens(tokenizer: &mut Tokenizer) -> Result<SpecialTokenIds> {
    let added = tokenizer.add_special_tokens(&[
        AddedToken::from(TRIGGER_TOKEN, true),
        AddedToken::from(PREDICT_TOKEN, true),
    ]);
    tracing::debug!("Registered {} prompt placeholder token(s)", added);
    SpecialTokenIds::resolve(tokenizer)
}

/// Rows the encoder's embedding table needs: one past the highest
/// id other than the [T]/[P] placeholders.
pub fn embedding_vocab_size(tokenizer: &Tokenizer, ids: SpecialTokenIds) -> usize {
    tokenizer
        .get_vocab(true)
        .into_values()
        .filter(|&id| id != ids.trigger && id != ids.predict)
        .max()
        .map_or(0, |id| id as usize + 1)
}

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("tokenizer.json")
    }

    /// Load `tokenizer.json` from the directory with the prompt
    /// placeholders registered.
    pub fn load(&self) -> Result<(Tokenizer, SpecialTokenIds)> {
        let path = self.path();
        let mut tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;
        let ids = register_prompt_tokens(&mut tokenizer)?;
        tracing::info!(
            "Loaded tokenizer from '{}' (vocab {} incl. added tokens)",
            path.display(),
            tokenizer.get_vocab_size(true)
        );
        Ok((tokenizer, ids))
    }

    /// Write the tokenizer into this directory.
    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer to '{}': {}", path.display(), e))?;
        tracing::debug!("Saved tokenizer to '{}'", path.display());
        Ok(())
    }
}

// ─── Test Fixtures ────────────────────────────────────────────────────────────
// A tiny word-level tokenizer in HuggingFace JSON format, shared
// by the unit tests of the data and ml layers.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub const SPECIALS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

    pub fn word_level_tokenizer(words: &[&str]) -> Tokenizer {
        let mut vocab = serde_json::Map::new();
        let mut added = Vec::new();
        for (id, tok) in SPECIALS.iter().enumerate() {
            vocab.insert(tok.to_string(), serde_json::json!(id));
            added.push(serde_json::json!({
                "id": id, "content": tok, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            }));
        }
        for (i, w) in words.iter().enumerate() {
            vocab.insert(w.to_string(), serde_json::json!(SPECIALS.len() + i));
        }

        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added,
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        });
        Tokenizer::from_bytes(serde_json::to_vec(&json).unwrap()).unwrap()
    }

    pub fn prompt_tokenizer(words: &[&str]) -> (Tokenizer, SpecialTokenIds) {
        let mut tok = word_level_tokenizer(words);
        let ids = register_prompt_tokens(&mut tok).unwrap();
        (tok, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut tok = word_level_tokenizer(&["great", "terrible"]);
        let first  = register_prompt_tokens(&mut tok).unwrap();
        let second = register_prompt_tokens(&mut tok).unwrap();
        assert_eq!(first, second);
        assert_ne!(first.trigger, first.predict);
        assert_eq!(first.mask, tok.token_to_id("[MASK]").unwrap());
        assert_eq!(first.pad, 0);
    }

    #[test]
    fn test_embedding_vocab_size_leaves_out_placeholders() {
        let (tok, ids) = prompt_tokenizer(&["great", "terrible"]);
        assert_eq!(embedding_vocab_size(&tok, ids), SPECIALS.len() + 2);
        assert!(ids.trigger as usize >= SPECIALS.len() + 2);
        assert!(ids.predict as usize >= SPECIALS.len() + 2);
    }

    #[test]
    fn test_save_and_load_keep_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let (tok, ids) = prompt_tokenizer(&["great"]);
        let store = TokenizerStore::new(dir.path());
        store.save(&tok).unwrap();
        assert!(store.path().exists());

        let (_, loaded_ids) = store.load().unwrap();
        assert_eq!(loaded_ids, ids);
    }
}
