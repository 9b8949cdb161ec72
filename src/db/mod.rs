//! The `Db` trait (C10): this crate's abstraction over the Redis-like
//! key/value store, standing in for `swss-common`'s `Table`/`SubscriberStateTable`.
//!
//! `MemoryDb` follows the same shape as the teacher's `StateManager`: a shared
//! `Arc<RwLock<_>>` holds the readable snapshot, and writes fan out to
//! subscriber channels rather than being observed via polling.

mod memory;
#[cfg(feature = "redis-backend")]
mod redis_backend;

pub use memory::MemoryDb;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisDb;

use flume::Receiver;

/// Kind of change carried by a [`DbNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOp {
    Set,
    Del,
}

/// One field-level change published to subscribers of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbNotification {
    pub key: String,
    pub field: String,
    pub value: Option<String>,
    pub op: DbOp,
}

/// The table/subscriber abstraction the rest of the daemon is coded against.
///
/// A real backend (Redis via `swss-common`-equivalent semantics) would
/// implement this over a network client; `MemoryDb` implements it entirely
/// in-process so the core logic is fully testable without a live database.
pub trait Db: Send + Sync {
    fn hset(&self, table: &str, key: &str, field: &str, value: &str);
    fn hget(&self, table: &str, key: &str, field: &str) -> Option<String>;
    fn hdel(&self, table: &str, key: &str, field: &str);
    /// All keys currently present in `table` (i.e. with at least one field set).
    fn keys(&self, table: &str) -> Vec<String>;
    /// Subscribe to every `hset`/`hdel` against `table`, present and future.
    fn subscribe(&self, table: &str) -> Receiver<DbNotification>;
}
