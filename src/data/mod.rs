// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a dataset file to device-ready batches.
//
//   .jsonl / .tsv file
//       │
//       ▼
//   JsonlReader / TsvReader  → Vec<Instance>
//       │
//       ▼
//   Templatizer              → token ids + trigger/predict masks + labels
//       │
//       ▼
//   limit_samples            → optional random subset
//       │
//       ▼
//   TriggerDataset           → implements Burn's Dataset trait
//       │
//       ▼
//   TriggerBatcher           → pads and stacks into ModelInputs
//       │
//       ▼
//   DataLoader               → feeds batches to the trainer
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Dataset file readers (jsonl, tsv)
pub mod preprocessor;

/// Prompt template → token sequences and masks
pub mod templatizer;

/// Random subsampling for --limit
pub mod sampler;

/// Implements Burn's Dataset trait for templatized instances
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
