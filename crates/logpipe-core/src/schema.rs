// Storage schema for the `logs` table
//
// The insert shape is fixed; the DDL is idempotent so it can run on every
// startup.

pub const LOGS_TABLE: &str = "logs";

/// Columns written per record, in parameter order.
pub const LOG_COLUMNS: [&str; 9] = [
    "level",
    "message",
    "service",
    "environment",
    "hostname",
    "ip_address",
    "user_id",
    "request_id",
    "metadata",
];

/// Width of the `level` column, in characters.
pub const MAX_LEVEL_LEN: usize = 10;

pub const INSERT_LOG_SQL: &str = "INSERT INTO logs (level, message, service, environment, hostname, ip_address, user_id, request_id, metadata) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";

pub const CREATE_LOGS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id SERIAL PRIMARY KEY,
    level VARCHAR(10) NOT NULL,
    message TEXT NOT NULL,
    timestamp TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    service VARCHAR(100),
    environment VARCHAR(50),
    hostname VARCHAR(255),
    ip_address VARCHAR(45),
    user_id VARCHAR(100),
    request_id VARCHAR(100),
    metadata JSONB,
    created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
)"#;

/// DDL applied in order by the schema bootstrap.
pub const SCHEMA_STATEMENTS: [&str; 4] = [
    CREATE_LOGS_TABLE_SQL,
    "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level)",
    "CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lists_every_column_once() {
        let columns = format!("({})", LOG_COLUMNS.join(", "));
        assert!(INSERT_LOG_SQL.contains(&columns));
        for i in 1..=LOG_COLUMNS.len() {
            assert!(INSERT_LOG_SQL.contains(&format!("${}", i)));
        }
        assert!(!INSERT_LOG_SQL.contains("$10"));
    }

    #[test]
    fn test_schema_creates_table_and_indexes() {
        assert!(SCHEMA_STATEMENTS[0].contains("CREATE TABLE IF NOT EXISTS logs"));
        assert!(SCHEMA_STATEMENTS[0].contains("metadata JSONB"));
        for column in ["timestamp", "level", "service"] {
            assert!(SCHEMA_STATEMENTS
                .iter()
                .any(|stmt| stmt.contains(&format!("ON logs({})", column))));
        }
    }
}
