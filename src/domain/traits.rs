// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The data layer reads datasets in several on-disk formats.
// The application layer only sees InstanceSource and works
// with any of them without changes.
//
// Implementations:
//   - JsonlReader → one JSON object per line
//   - TsvReader   → tab-separated values with a header row
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::instance::Instance;

// ─── InstanceSource ───────────────────────────────────────────────────────────
/// Any component that can produce raw dataset records.
pub trait InstanceSource {
    /// Read every record from this source, in file order.
    fn read_all(&self) -> Result<Vec<Instance>>;
}
