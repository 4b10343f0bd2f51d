//! Durable storage adapters: Postgres plus in-memory test doubles.

pub mod checkpoint;
pub mod memory;
pub mod postgres;
pub mod store;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, PostgresCheckpointStore};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{Store, TradeClose};
