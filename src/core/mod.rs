//! Core derivation modules

pub mod derive;
pub mod formula;
pub mod lock;
pub mod mask;
pub mod writer;

// Re-export main types
pub use derive::{DerivationParams, DerivationReport, IndexDeriver};
pub use formula::{Product, ProductArray, ProductSpec, StorageType, PRODUCT_TABLE, SCALE_FACTOR};
pub use lock::{FileLockBackend, LockBackend, LockGuard, LockSentinel};
pub use mask::apply_quality_mask;
pub use writer::{TileSource, TileWriter, WriteJob, WriteOutcome};
