// Process initialisation helpers

use logpipe_batch::BatchConfig;
use logpipe_config::{LogFormat, RuntimeConfig, ServerConfig};
use logpipe_consumer::ConsumerOptions;

/// Install the global tracing subscriber from `server.log_level` and
/// `server.log_format`. A subscriber that is already installed wins.
pub(crate) fn init_tracing(server: &ServerConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match server.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

pub fn batch_config(config: &RuntimeConfig) -> BatchConfig {
    BatchConfig {
        max_rows: config.batch.max_rows,
        flush_interval: config.batch.flush_interval(),
        channel_capacity: config.batch.channel_capacity,
    }
}

pub fn consumer_options(config: &RuntimeConfig) -> ConsumerOptions {
    ConsumerOptions::from_config(&config.broker)
}
