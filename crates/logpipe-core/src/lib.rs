// logpipe-core - Pure record logic
//
// Everything that turns broker payload bytes into rows ready for the
// relational store. No I/O, no async, no runtime dependencies.

pub mod decode;
pub mod record;
pub mod schema;

pub use decode::{decode, decode_with_path, parse_plain_text, DecodePath};
pub use record::{LogRecord, LogRecordBuilder, Param};
pub use schema::{INSERT_LOG_SQL, LOG_COLUMNS, LOGS_TABLE, MAX_LEVEL_LEN, SCHEMA_STATEMENTS};
