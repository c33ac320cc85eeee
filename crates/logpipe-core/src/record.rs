//! The log record as it travels from the broker to the `logs` table.

use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_LEVEL: &str = "INFO";
pub const DEFAULT_SERVICE: &str = "unknown";
pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_HOSTNAME: &str = "unknown";
pub const DEFAULT_IP_ADDRESS: &str = "unknown";

/// One decoded log entry, ready for persistence.
///
/// Every field is populated: defaults are applied when the record is built,
/// never at insert time. The record is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    level: String,
    message: String,
    service: String,
    environment: String,
    hostname: String,
    ip_address: String,
    user_id: String,
    request_id: String,
    metadata: Value,
}

/// Bound parameter for a sink statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param<'a> {
    Text(&'a str),
    Json(&'a Value),
}

impl LogRecord {
    /// Start building a record with the given message; every other field
    /// starts at its default.
    pub fn builder(message: impl Into<String>) -> LogRecordBuilder {
        LogRecordBuilder::new(message)
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Parameters in `LOG_COLUMNS` order, matching `INSERT_LOG_SQL`.
    pub fn params(&self) -> [Param<'_>; 9] {
        [
            Param::Text(&self.level),
            Param::Text(&self.message),
            Param::Text(&self.service),
            Param::Text(&self.environment),
            Param::Text(&self.hostname),
            Param::Text(&self.ip_address),
            Param::Text(&self.user_id),
            Param::Text(&self.request_id),
            Param::Json(&self.metadata),
        ]
    }

    /// Rebuild a record from insert parameters in `LOG_COLUMNS` order.
    ///
    /// Returns `None` when the shape does not match. Used by sinks that keep
    /// rows in memory.
    pub fn from_params(params: &[Param<'_>]) -> Option<Self> {
        let [Param::Text(level), Param::Text(message), Param::Text(service), Param::Text(environment), Param::Text(hostname), Param::Text(ip_address), Param::Text(user_id), Param::Text(request_id), Param::Json(metadata)] =
            params
        else {
            return None;
        };

        Some(Self {
            level: level.to_string(),
            message: message.to_string(),
            service: service.to_string(),
            environment: environment.to_string(),
            hostname: hostname.to_string(),
            ip_address: ip_address.to_string(),
            user_id: user_id.to_string(),
            request_id: request_id.to_string(),
            metadata: (*metadata).clone(),
        })
    }
}

/// Builder that applies the documented defaults.
///
/// Empty `level` falls back to `INFO`; metadata that is not a JSON object
/// falls back to `{}`.
#[derive(Debug, Clone)]
pub struct LogRecordBuilder {
    record: LogRecord,
}

impl LogRecordBuilder {
    fn new(message: impl Into<String>) -> Self {
        Self {
            record: LogRecord {
                level: DEFAULT_LEVEL.to_string(),
                message: message.into(),
                service: DEFAULT_SERVICE.to_string(),
                environment: DEFAULT_ENVIRONMENT.to_string(),
                hostname: DEFAULT_HOSTNAME.to_string(),
                ip_address: DEFAULT_IP_ADDRESS.to_string(),
                user_id: String::new(),
                request_id: String::new(),
                metadata: Value::Object(Map::new()),
            },
        }
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        let level = level.into();
        if !level.is_empty() {
            self.record.level = level;
        }
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.record.service = service.into();
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.record.environment = environment.into();
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.record.hostname = hostname.into();
        self
    }

    pub fn ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.record.ip_address = ip_address.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.record.user_id = user_id.into();
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.record.request_id = request_id.into();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        if metadata.is_object() {
            self.record.metadata = metadata;
        }
        self
    }

    pub fn build(self) -> LogRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let record = LogRecord::builder("hello").build();
        assert_eq!(record.level(), "INFO");
        assert_eq!(record.message(), "hello");
        assert_eq!(record.service(), "unknown");
        assert_eq!(record.environment(), "production");
        assert_eq!(record.hostname(), "unknown");
        assert_eq!(record.ip_address(), "unknown");
        assert_eq!(record.user_id(), "");
        assert_eq!(record.request_id(), "");
        assert_eq!(record.metadata(), &json!({}));
    }

    #[test]
    fn test_builder_ignores_empty_level_and_non_object_metadata() {
        let record = LogRecord::builder("m")
            .level("")
            .metadata(json!([1, 2, 3]))
            .build();
        assert_eq!(record.level(), "INFO");
        assert_eq!(record.metadata(), &json!({}));
    }

    #[test]
    fn test_params_follow_column_order() {
        let record = LogRecord::builder("boom")
            .level("ERROR")
            .service("billing")
            .request_id("req-1")
            .metadata(json!({"attempt": 3}))
            .build();

        let params = record.params();
        assert_eq!(params[0], Param::Text("ERROR"));
        assert_eq!(params[1], Param::Text("boom"));
        assert_eq!(params[2], Param::Text("billing"));
        assert_eq!(params[7], Param::Text("req-1"));
        assert_eq!(params[8], Param::Json(&json!({"attempt": 3})));

        assert_eq!(LogRecord::from_params(&params), Some(record));
    }

    #[test]
    fn test_from_params_rejects_wrong_shape() {
        assert_eq!(LogRecord::from_params(&[Param::Text("x")]), None);
    }
}
