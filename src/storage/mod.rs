pub mod collection;
pub mod engine;
pub mod memory;
pub mod persistence;

pub use collection::Collection;
pub use engine::{DocumentStore, ReplaceOutcome, StoredDocument};
pub use memory::MemoryStore;
pub use persistence::{DEFAULT_CHECKPOINT_EVERY, DurabilityMode};
