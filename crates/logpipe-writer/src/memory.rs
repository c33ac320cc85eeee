// In-memory transactional sink
//
// Rows are staged per transaction and only become visible on commit, so a
// rollback (explicit or by drop) leaves the table untouched. Failures can be
// injected to exercise the writer's error paths.

use std::sync::Arc;

use async_trait::async_trait;
use logpipe_core::{LogRecord, Param};
use parking_lot::Mutex;

use crate::error::{Result, SinkError};
use crate::sink::{SinkTransaction, TransactionalSink};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<LogRecord>,
    begun: usize,
    committed: usize,
    rolled_back: usize,
    fail_begin: usize,
    fail_commit: usize,
    fail_on_message: Option<String>,
}

/// Sink that keeps committed rows in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows in commit order.
    pub fn rows(&self) -> Vec<LogRecord> {
        self.state.lock().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn transactions_begun(&self) -> usize {
        self.state.lock().begun
    }

    pub fn transactions_committed(&self) -> usize {
        self.state.lock().committed
    }

    pub fn transactions_rolled_back(&self) -> usize {
        self.state.lock().rolled_back
    }

    /// Fail the next `count` calls to `begin`.
    pub fn fail_next_begins(&self, count: usize) {
        self.state.lock().fail_begin = count;
    }

    /// Fail the next `count` commits.
    pub fn fail_next_commits(&self, count: usize) {
        self.state.lock().fail_commit = count;
    }

    /// Fail any insert whose message equals `message`, like a constraint
    /// violation on a poison row.
    pub fn fail_on_message(&self, message: impl Into<String>) {
        self.state.lock().fail_on_message = Some(message.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_begin = 0;
        state.fail_commit = 0;
        state.fail_on_message = None;
    }
}

#[async_trait]
impl TransactionalSink for MemorySink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let mut state = self.state.lock();
        if state.fail_begin > 0 {
            state.fail_begin -= 1;
            return Err(SinkError::begin("injected begin failure"));
        }
        state.begun += 1;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<LogRecord>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &str, params: &[Param<'_>]) -> Result<u64> {
        if !statement.starts_with("INSERT INTO logs") {
            return Err(SinkError::execute(format!(
                "unsupported statement: {}",
                statement
            )));
        }
        let record = LogRecord::from_params(params)
            .ok_or_else(|| SinkError::execute("parameter shape does not match logs columns"))?;

        let poisoned = self.state.lock().fail_on_message.as_deref() == Some(record.message());
        if poisoned {
            return Err(SinkError::execute(format!(
                "injected failure for message {:?}",
                record.message()
            )));
        }

        self.staged.push(record);
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { state, staged } = *self;
        let mut state = state.lock();
        if state.fail_commit > 0 {
            state.fail_commit -= 1;
            return Err(SinkError::commit("injected commit failure"));
        }
        state.committed += 1;
        state.rows.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.lock().rolled_back += 1;
        Ok(())
    }
}
