//! Transactional sink seam between the batch writer and the store.

use async_trait::async_trait;
use logpipe_core::Param;

use crate::error::Result;

/// A store that can open transactions.
#[async_trait]
pub trait TransactionalSink: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>>;
}

/// An open transaction. Dropping it without `commit` must not persist
/// anything.
#[async_trait]
pub trait SinkTransaction: Send {
    /// Execute one statement with positional parameters; returns rows affected.
    async fn execute(&mut self, statement: &str, params: &[Param<'_>]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
