// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the file-system concerns that don't belong in any
// specific business layer:
//
//   model_dir.rs       — The pretrained MLM on disk
//                        tokenizer.json, config.json and
//                        encoder weights under --model-name.
//
//   tokenizer_store.rs — Tokenizer persistence
//                        Loads a tokenizer.json, registers the
//                        [T]/[P] placeholders, and writes the
//                        result next to the checkpoint so
//                        training and prediction agree.
//
//   checkpoint.rs      — Saving and loading the prompted model
//                        Uses a half-precision, gzipped Burn
//                        recorder for the weights and
//                        serde_json for TrainConfig.
//
//   metrics.rs         — Per-epoch metrics in a CSV file.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Pretrained encoder directory (--model-name)
pub mod model_dir;

/// Tokenizer loading, placeholder registration, saving
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
