//! Memory tiers, vector index and persistence backends for memtier.

pub mod file_backend;
pub mod in_memory;
pub mod tiered;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::JsonlKv;
pub use in_memory::InMemoryKv;
pub use tiered::{StorePolicy, SweepReport, TierStats, TieredStore};
pub use vector::{InMemoryVectorIndex, SearchHit, VectorIndex, VectorRecord, cosine_similarity};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKv;
