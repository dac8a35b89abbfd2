//! Migrator control server binary.

use std::sync::Arc;

use clap::Parser;
use migrator_core::notifier::channel;
use migrator_core::{
    start_consumer, ChannelNotifier, FixConsumer, JsonRecord, Scheduler, SledPool, StorageConfig,
};
use migrator_server::{create_router, AppState, Args, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Parse command line args
    let args = Args::parse();
    let config = ServerConfig::from(&args);

    info!(
        listen = %config.listen_addr,
        table = %config.table,
        src = %config.src_path.display(),
        dst = %config.dst_path.display(),
        "Starting migrator server"
    );

    // Open both stores
    let src = Arc::new(SledPool::open(StorageConfig::new(&config.src_path))?);
    let dst = Arc::new(SledPool::open(StorageConfig::new(&config.dst_path))?);
    if src.was_recovered() || dst.was_recovered() {
        info!(
            src_recovered = src.was_recovered(),
            dst_recovered = dst.was_recovered(),
            "Recovered existing stores"
        );
    }

    // Event bus and fixer
    let shutdown = CancellationToken::new();
    let (tx, rx) = channel(config.bus_buffer);
    let notifier = Arc::new(ChannelNotifier::with_topic(config.topic.clone(), tx));
    info!(topic = notifier.topic(), buffer = config.bus_buffer, "Inconsistency bus ready");
    let consumer = FixConsumer::<JsonRecord>::new(rx, src.clone(), dst.clone(), config.table.clone())
        .with_topic(config.topic.clone());
    let consumer_task = start_consumer(consumer, shutdown.clone());

    // Scheduler
    let scheduler = Arc::new(Scheduler::<JsonRecord>::new(
        src.clone(),
        dst.clone(),
        config.table.clone(),
        notifier,
        config.scheduler.clone(),
    ));

    let state = AppState::new(scheduler.clone(), config.clone());
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Migrator listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    scheduler.shutdown().await;
    shutdown.cancel();
    if let Err(err) = consumer_task.await {
        warn!(error = %err, "fix consumer task failed");
    }
    src.flush()?;
    dst.flush()?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
