// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The model and everything that runs it.
//
// What's in this layer:
//
//   model.rs     — The masked language model and the
//                  trigger-augmented forward pass:
//                  • word / position / segment embeddings
//                  • transformer encoder blocks (GELU FFN)
//                  • MLM head (dense → GELU → norm → vocab)
//                  • learned trigger vectors spliced into the
//                    embeddings at every [T] slot
//                  • masked-LM loss
//
//   decoder.rs   — Fills predict slots: parallel, monotonic
//                  or iterative
//
//   evaluator.rs — Exact-match and multiple-choice scoring
//
//   trainer.rs   — The training loop: AdamW with parameter
//                  groups, gradient accumulation, dev-based
//                  checkpointing, final test evaluation
//
//   predictor.rs — Loads a checkpoint and decodes batches
//
//   readback.rs  — Tensor → host Vec helpers
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Devlin et al. (2019) BERT
//            Liu et al. (2021) GPT Understands, Too

/// Encoder, prompted model, trigger-augmented forward pass
pub mod model;

/// Masked-position decoding strategies
pub mod decoder;

/// Loss + correct-count per batch
pub mod evaluator;

/// Full training loop with dev selection and checkpointing
pub mod trainer;

/// Checkpoint-backed batch decoding
pub mod predictor;

/// Host readback of tensor contents
pub mod readback;
