//! Storage Backends
//!
//! The [`StorageEngine`] contract plus an in-memory and a PostgreSQL implementation.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
