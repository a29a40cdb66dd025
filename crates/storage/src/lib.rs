//! Persistent storage for conversation memories.
//!
//! One Postgres table (`conversations`) with a pgvector embedding
//! column. The save path is transactional: either the row and its
//! vector are both visible, or neither is.

pub mod backup;
mod schema;
mod store;

pub use backup::BackupWriter;
pub use store::MemoryStore;
