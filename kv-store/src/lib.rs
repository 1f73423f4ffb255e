//! Persistent key-value store for serde values.
//!
//! Entries live in named buckets, each an independent ordered keyspace, inside a single
//! RocksDB database. Values are encoded with a tagged [`Codec`] and decoded into whatever type
//! the caller asks for at the call site.
//!
//! Only one handle may have a database open at a time. Writes are serialized through single
//! write transactions, reads run against snapshots.

pub mod codec;
pub mod engine;
pub mod error;
pub mod metrics_consts;
pub mod store;

pub use codec::Codec;
pub use error::{Result, StoreError};
pub use store::{KvStore, StoreConfig};
