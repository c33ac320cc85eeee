// logpipe service wiring
//
// Connects the store, bootstraps the schema, starts the batch writer and runs
// the resilient consumer until Ctrl+C or SIGTERM. On shutdown the consumer
// closes its session first, then the writer drains and flushes.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use logpipe_batch::{BatchConfig, BatchWriter, WriterStats};
use logpipe_config::RuntimeConfig;
use logpipe_consumer::{AmqpBroker, Broker, ConsumerError, ConsumerOptions, ResilientConsumer};
use logpipe_writer::{PostgresSink, TransactionalSink};
use tokio::signal;
use tracing::{error, info};

mod init;

pub use init::{batch_config, consumer_options};

/// Graceful shutdown handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Run consumer and writer against the given collaborators until `shutdown`
/// resolves or the consumer gives up. The writer is always drained before
/// returning.
pub async fn run_pipeline<B, F>(
    broker: B,
    sink: Arc<dyn TransactionalSink>,
    batch: BatchConfig,
    options: ConsumerOptions,
    shutdown: F,
) -> std::result::Result<WriterStats, ConsumerError>
where
    B: Broker,
    F: Future<Output = ()> + Send,
{
    let writer = BatchWriter::spawn(batch, sink);
    let mut consumer = ResilientConsumer::new(broker, options);

    let consumed = consumer.start(writer.submitter(), shutdown).await;
    let stats = writer.shutdown().await;

    info!(
        sessions = consumer.generation(),
        flushes = stats.flushes,
        rows_written = stats.rows_written,
        failed_flushes = stats.failed_flushes,
        rows_dropped = stats.rows_dropped,
        "Pipeline stopped"
    );

    consumed.map(|()| stats)
}

/// Entry point with a fully resolved configuration
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init::init_tracing(&config.server);
    config.validate().context("Invalid configuration")?;

    info!(
        queue = %config.broker.queue,
        max_rows = config.batch.max_rows,
        flush_interval_secs = config.batch.flush_interval_secs,
        "Starting logpipe"
    );

    let sink = PostgresSink::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.database.run_migrations {
        sink.ensure_schema()
            .await
            .context("Failed to bootstrap logs schema")?;
    } else {
        info!("Schema bootstrap disabled");
    }

    let broker = AmqpBroker::from_config(&config.broker);
    let outcome = run_pipeline(
        broker,
        Arc::new(sink.clone()),
        batch_config(&config),
        consumer_options(&config),
        shutdown_signal(),
    )
    .await;

    sink.close().await;

    outcome.context("Consumer stopped")?;
    info!("Shutdown complete");
    Ok(())
}
