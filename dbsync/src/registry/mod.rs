//! Durable per-table sync checkpoints.
//!
//! Checkpoints live in the target database alongside the replicated tables,
//! in the `meta_last_sync_times` table, so that a load and its checkpoint are
//! visible to the same readers. The registry is the single source of truth
//! for where each table's tail sync should resume.

mod base;
mod memory;
mod postgres;

pub use base::{Checkpoint, CheckpointUpdate, TableRegistry, REGISTRY_TABLE_NAME};
pub use memory::MemoryRegistry;
pub use postgres::PostgresRegistry;
