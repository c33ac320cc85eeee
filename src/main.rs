use anyhow::{Context, Result};
use clap::Parser;
use logpipe_config::{LogFormat, RuntimeConfig};
use std::path::PathBuf;

/// Consume log messages from a broker queue and write them to PostgreSQL in batches
#[derive(Parser)]
#[command(name = "logpipe")]
#[command(version)]
#[command(about = "Consume log messages from a broker queue and write them to PostgreSQL in batches", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// AMQP broker URL (overrides config file and environment)
    #[arg(long, value_name = "URL")]
    broker_url: Option<String>,

    /// PostgreSQL connection URL (overrides config file and environment)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Queue to consume from
    #[arg(short, long, value_name = "NAME")]
    queue: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log output format: text or json
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Do not create the logs table and indexes at startup
    #[arg(long)]
    skip_migrations: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    apply_cli_overrides(&mut config, cli);

    logpipe_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: Cli) {
    if let Some(url) = cli.broker_url {
        config.broker.url = url;
    }

    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    if let Some(queue) = cli.queue {
        config.broker.queue = queue;
    }

    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }

    if let Some(format) = cli.log_format {
        config.server.log_format = format;
    }

    if cli.skip_migrations {
        config.database.run_migrations = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win() {
        let cli = Cli::parse_from([
            "logpipe",
            "--broker-url",
            "amqp://rabbit:5672",
            "--database-url",
            "postgres://db/logs",
            "--queue",
            "audit",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--skip-migrations",
        ]);

        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, cli);

        assert_eq!(config.broker.url, "amqp://rabbit:5672");
        assert_eq!(config.database.url, "postgres://db/logs");
        assert_eq!(config.broker.queue, "audit");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert!(!config.database.run_migrations);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::parse_from(["logpipe"]);
        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, cli);

        assert_eq!(config.broker.queue, "logs");
        assert!(config.database.run_migrations);
    }
}
