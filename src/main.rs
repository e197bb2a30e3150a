use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use decor_marketplace as marketplace;
use decor_marketplace::{
    clock::SystemClock,
    db::DbConfig,
    events::{EventHandler, EventSender, LoggingEventHandler},
    jobs::{JobRegistry, JobScheduler},
    notifications::EventNotifier,
    services::ServiceFactory,
};

/// Runs the marketplace expiry sweeps.
#[derive(Debug, Parser)]
#[command(name = "decor-scheduler", version, about)]
struct Cli {
    /// Run every job once and exit instead of scheduling them
    #[arg(long)]
    once: bool,

    /// Print the job reports of a `--once` run as JSON
    #[arg(long, requires = "once")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = marketplace::config::load_config().context("failed to load configuration")?;
    marketplace::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = marketplace::db::establish_connection(&DbConfig::from(&cfg))
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_create_schema {
        marketplace::db::create_schema(&db_pool)
            .await
            .context("failed to create the schema")?;
    }
    let db_arc = Arc::new(db_pool);

    let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
    let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LoggingEventHandler)];
    let event_worker = tokio::spawn(marketplace::events::process_events(event_rx, handlers));

    let notifier = Arc::new(EventNotifier::new(event_sender.clone()));
    let factory = ServiceFactory::new(
        db_arc,
        Arc::new(SystemClock),
        notifier,
        Some(event_sender),
        cfg.booking.clone(),
    );

    let scheduler = JobScheduler::with_standard_jobs(&factory, &cfg.jobs, JobRegistry::new());

    if cli.once {
        let reports = scheduler.run_all_once().await;
        let failed = reports.iter().filter(|r| !r.is_clean()).count();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        info!(jobs = reports.len(), failed, "One-off run finished");
        drop(factory);
        drop(scheduler);
        if let Err(e) = event_worker.await {
            warn!(error = %e, "Event worker ended abnormally");
        }
        return Ok(());
    }

    let handles = scheduler.spawn();
    info!(
        jobs = handles.len(),
        environment = %cfg.environment,
        "decor-scheduler started"
    );

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
