use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use deferq::bus::{NoopPublisher, Publisher, RabbitMq};
use deferq::config;
use deferq::storage::TaskStore;
use deferq::ticker::Ticker;

#[derive(Parser, Debug)]
#[command(name = "deferq", about = "Delayed-delivery broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server
    Start {
        /// Path to config file
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start { config } => start(config).await,
    }
}

async fn start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = config::load(config_path.as_deref()).context("error loading config")?;
    init_tracing(&cfg.observability.logging.level)?;

    let store = Arc::new(
        TaskStore::open(&cfg.persistence.path, cfg.scheduler.branching_factor)
            .context("error opening task store")?,
    );
    tracing::info!(
        scheduled = store.scheduled_count().await,
        path = %cfg.persistence.path.display(),
        "task store ready"
    );

    let shutdown = CancellationToken::new();
    let mut bus = None;

    let publisher: Arc<dyn Publisher> = if let Some(rabbit_cfg) = cfg.rabbitmq.clone() {
        let rabbit = Arc::new(
            RabbitMq::connect(rabbit_cfg)
                .await
                .context("error connecting to rabbitmq")?,
        );
        rabbit
            .consume(store.clone(), shutdown.clone())
            .await
            .context("error consuming rabbitmq")?;

        bus = Some(rabbit.clone());
        rabbit
    } else {
        tracing::info!("rabbitmq not configured, running with an idle tick loop");
        Arc::new(NoopPublisher)
    };

    // the tick loop always runs, so tasks recovered from a previous run
    // still fire at or after their due time
    let ticker = Ticker::new(
        store.clone(),
        publisher,
        Duration::from_millis(cfg.scheduler.tick_interval_ms),
        shutdown.clone(),
    );
    tokio::spawn(ticker.run());

    tracing::info!("starting server");
    tokio::signal::ctrl_c()
        .await
        .context("error waiting for shutdown signal")?;

    tracing::info!("shutting down");
    shutdown.cancel();
    if let Some(bus) = bus {
        bus.close().await;
    }

    Ok(())
}

/// Builds the subscriber from the configured level; an invalid level is a
/// configuration error and aborts startup.
fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .with_context(|| format!("invalid observability.logging.level: {level}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
