// Payload decoding
//
// Structured JSON first, plain-text heuristics second. Decoding never fails:
// whatever arrives on the queue becomes a LogRecord.

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::record::LogRecord;
use crate::schema::MAX_LEVEL_LEN;

/// Which decoder produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    Structured,
    PlainText,
}

impl DecodePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodePath::Structured => "structured",
            DecodePath::PlainText => "plain_text",
        }
    }
}

/// JSON wire shape. `message` is the only required key.
#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    level: Option<String>,
    message: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, alias = "ipAddress")]
    ip_address: Option<String>,
    #[serde(default, alias = "userId")]
    user_id: Option<String>,
    #[serde(default, alias = "requestId")]
    request_id: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl From<WireRecord> for LogRecord {
    fn from(wire: WireRecord) -> Self {
        let mut builder = LogRecord::builder(wire.message);
        if let Some(level) = wire.level {
            builder = builder.level(level);
        }
        if let Some(service) = wire.service {
            builder = builder.service(service);
        }
        if let Some(environment) = wire.environment {
            builder = builder.environment(environment);
        }
        if let Some(hostname) = wire.hostname {
            builder = builder.hostname(hostname);
        }
        if let Some(ip_address) = wire.ip_address {
            builder = builder.ip_address(ip_address);
        }
        if let Some(user_id) = wire.user_id {
            builder = builder.user_id(user_id);
        }
        if let Some(request_id) = wire.request_id {
            builder = builder.request_id(request_id);
        }
        if let Some(metadata) = wire.metadata {
            builder = builder.metadata(metadata);
        }
        builder.build()
    }
}

/// Decode a broker payload into a record.
pub fn decode(payload: &[u8]) -> LogRecord {
    decode_with_path(payload).0
}

/// Decode a broker payload, reporting which path produced the record.
///
/// Payloads that look like JSON objects but fail structured decoding are
/// logged at WARN before taking the plain-text path.
pub fn decode_with_path(payload: &[u8]) -> (LogRecord, DecodePath) {
    match serde_json::from_slice::<WireRecord>(payload) {
        Ok(wire) => (wire.into(), DecodePath::Structured),
        Err(err) => {
            let text = String::from_utf8_lossy(payload);
            if looks_like_json_object(&text) {
                warn!(
                    error = %err,
                    payload_len = payload.len(),
                    "JSON-looking payload failed structured decode; falling back to plain text"
                );
                counter!("logpipe.decode.fallback", 1, "reason" => "invalid_json");
            } else {
                debug!(payload_len = payload.len(), "decoding payload as plain text");
                counter!("logpipe.decode.fallback", 1, "reason" => "plain_text");
            }
            (parse_plain_text(&text), DecodePath::PlainText)
        }
    }
}

/// Best-effort parse of a plain-text log line.
///
/// `[LEVEL] rest` yields level `LEVEL` and the trimmed remainder as message,
/// as long as `LEVEL` fits in [`MAX_LEVEL_LEN`] characters. Anything else
/// keeps the whole text as the message at level `INFO`.
pub fn parse_plain_text(text: &str) -> LogRecord {
    if let Some((level, rest)) = split_level_token(text) {
        return LogRecord::builder(rest.trim()).level(level).build();
    }
    LogRecord::builder(text).build()
}

fn split_level_token(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('[')?;
    let end = inner.find(']')?;
    let level = &inner[..end];
    // Longer tokens would not fit the level column.
    if level.is_empty() || level.chars().count() > MAX_LEVEL_LEN {
        return None;
    }
    Some((level, &inner[end + 1..]))
}

fn looks_like_json_object(text: &str) -> bool {
    text.trim_start().starts_with('{')
}
