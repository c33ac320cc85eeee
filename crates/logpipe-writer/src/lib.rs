//! Transactional sinks for logpipe
//!
//! The batch writer only needs "begin, execute, commit or rollback". This
//! crate defines that seam and ships two implementations: PostgreSQL through
//! a sqlx pool, and an in-memory sink used by tests and local runs.

mod error;
mod memory;
mod postgres;
mod sink;

pub use error::{ErrorCode, Result, SinkError};
pub use memory::MemorySink;
pub use postgres::PostgresSink;
pub use sink::{SinkTransaction, TransactionalSink};
