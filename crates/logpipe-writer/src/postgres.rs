// PostgreSQL sink backed by a sqlx connection pool
//
// The pool is the only place that knows about connections; the batch writer
// sees begin/execute/commit/rollback and nothing else.

use async_trait::async_trait;
use logpipe_config::DatabaseConfig;
use logpipe_core::{Param, SCHEMA_STATEMENTS};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

use crate::error::{Result, SinkError};
use crate::sink::{SinkTransaction, TransactionalSink};

#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Create the connection pool and verify the store is reachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| SinkError::connect(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Create the `logs` table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| SinkError::schema(first_line(statement), e.to_string()))?;
        }
        info!("Schema bootstrap complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TransactionalSink for PostgresSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkError::begin(e.to_string()))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SinkTransaction for PostgresTransaction {
    async fn execute(&mut self, statement: &str, params: &[Param<'_>]) -> Result<u64> {
        let mut query = sqlx::query(statement);
        for param in params {
            query = match *param {
                Param::Text(value) => query.bind(value),
                Param::Json(value) => query.bind(Json(value)),
            };
        }

        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| SinkError::execute(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| SinkError::commit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolling back transaction");
        self.tx
            .rollback()
            .await
            .map_err(|e| SinkError::rollback(e.to_string()))
    }
}

fn first_line(statement: &str) -> &str {
    statement
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end_matches('(')
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line_summarises_ddl() {
        assert_eq!(
            first_line(SCHEMA_STATEMENTS[0]),
            "CREATE TABLE IF NOT EXISTS logs"
        );
        assert_eq!(
            first_line(SCHEMA_STATEMENTS[1]),
            "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp)"
        );
    }
}
