// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing what the tool works with:
//
//   instance.rs  — one raw dataset record (field name → text)
//   strategy.rs  — the closed sets of decoding / evaluation /
//                  fine-tuning choices the user can pick from
//   traits.rs    — abstractions the data layer implements
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

// A raw dataset record before templatizing
pub mod instance;

// Decoding, evaluation and fine-tuning strategy enums
pub mod strategy;

// Core abstractions (traits) that other layers implement
pub mod traits;
