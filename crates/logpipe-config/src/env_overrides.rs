use super::{LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "LOGPIPE_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the LOGPIPE_ prefix
    /// Used for the conventional RABBITMQ_URL / DATABASE_URL variables
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Batch configuration
    if let Some(val) = get_env_parsed::<usize, _>(env, "BATCH_MAX_ROWS")? {
        config.batch.max_rows = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "BATCH_FLUSH_INTERVAL_SECS")? {
        config.batch.flush_interval_secs = val;
    }
    if let Some(val) = get_env_parsed::<usize, _>(env, "BATCH_CHANNEL_CAPACITY")? {
        config.batch.channel_capacity = val;
    }

    // Broker configuration; the conventional RABBITMQ_URL is the fallback
    if let Some(url) = env.get("BROKER_URL").or_else(|| env.get_raw("RABBITMQ_URL")) {
        config.broker.url = url;
    }
    if let Some(queue) = env.get("BROKER_QUEUE") {
        config.broker.queue = queue;
    }
    if let Some(val) = get_env_bool(env, "BROKER_DURABLE")? {
        config.broker.durable = val;
    }
    if let Some(val) = get_env_parsed::<u16, _>(env, "BROKER_PREFETCH")? {
        config.broker.prefetch = val;
    }
    if let Some(val) = get_env_parsed::<u16, _>(env, "BROKER_HEARTBEAT_SECS")? {
        config.broker.heartbeat_secs = val;
    }
    if let Some(name) = env.get("BROKER_CONNECTION_NAME") {
        config.broker.connection_name = name;
    }
    if let Some(val) = get_env_parsed::<u32, _>(env, "BROKER_CONNECT_ATTEMPTS")? {
        config.broker.connect_attempts = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "BROKER_CONNECT_BACKOFF_SECS")? {
        config.broker.connect_backoff_secs = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "BROKER_MAX_RECONNECT_BACKOFF_SECS")? {
        config.broker.max_reconnect_backoff_secs = val;
    }

    // Database configuration; the conventional DATABASE_URL is the fallback
    if let Some(url) = env.get("DATABASE_URL").or_else(|| env.get_raw("DATABASE_URL")) {
        config.database.url = url;
    }
    if let Some(val) = get_env_parsed::<u32, _>(env, "DATABASE_MAX_CONNECTIONS")? {
        config.database.max_connections = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "DATABASE_ACQUIRE_TIMEOUT_SECS")? {
        config.database.acquire_timeout_secs = val;
    }
    if let Some(val) = get_env_bool(env, "DATABASE_RUN_MIGRATIONS")? {
        config.database.run_migrations = val;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.server.log_format = format
            .parse::<LogFormat>()
            .context("Invalid LOGPIPE_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val.parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapEnv {
        prefixed: HashMap<String, String>,
        raw: HashMap<String, String>,
    }

    impl MapEnv {
        fn with(mut self, key: &str, value: &str) -> Self {
            self.prefixed.insert(key.to_string(), value.to_string());
            self
        }

        fn with_raw(mut self, key: &str, value: &str) -> Self {
            self.raw.insert(key.to_string(), value.to_string());
            self
        }
    }

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.prefixed.get(key).cloned()
        }

        fn get_raw(&self, key: &str) -> Option<String> {
            self.raw.get(key).cloned()
        }
    }

    #[test]
    fn test_prefixed_overrides_apply() {
        let env = MapEnv::default()
            .with("BATCH_MAX_ROWS", "250")
            .with("BATCH_FLUSH_INTERVAL_SECS", "2")
            .with("BROKER_QUEUE", "audit")
            .with("BROKER_PREFETCH", "10")
            .with("DATABASE_RUN_MIGRATIONS", "false")
            .with("LOG_FORMAT", "json");

        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.batch.max_rows, 250);
        assert_eq!(config.batch.flush_interval_secs, 2);
        assert_eq!(config.broker.queue, "audit");
        assert_eq!(config.broker.prefetch, 10);
        assert!(!config.database.run_migrations);
        assert_eq!(config.server.log_format, LogFormat::Json);
    }

    #[test]
    fn test_raw_urls_are_fallbacks() {
        let env = MapEnv::default()
            .with_raw("RABBITMQ_URL", "amqp://raw")
            .with_raw("DATABASE_URL", "postgres://raw");
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.broker.url, "amqp://raw");
        assert_eq!(config.database.url, "postgres://raw");

        let env = env
            .with("BROKER_URL", "amqp://prefixed")
            .with("DATABASE_URL", "postgres://prefixed");
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.broker.url, "amqp://prefixed");
        assert_eq!(config.database.url, "postgres://prefixed");
    }

    #[test]
    fn test_invalid_number_is_reported_with_key() {
        let env = MapEnv::default().with("BATCH_MAX_ROWS", "lots");
        let mut config = RuntimeConfig::default();
        let err = apply_env_overrides(&mut config, &env).unwrap_err();
        assert!(err.to_string().contains("LOGPIPE_BATCH_MAX_ROWS"));
    }
}
