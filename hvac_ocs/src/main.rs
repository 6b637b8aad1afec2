mod commands;
mod config;
mod errors;
mod health;
mod room;
mod scheduler;
mod store;

use anyhow::Result;
use room::RoomStore;
use scheduler::SchedulerHandle;
use std::sync::Arc;
use store::{CsvPersistence, RoomPersistence};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::Cli::parse_and_build_config()?;

    let file_appender = tracing_appender::rolling::daily(&cfg.log_dir, "hvac_ocs.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hvac_ocs=info".parse().unwrap())
                .add_directive("hvac_protocol=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .compact()
        .init();

    info!(
        max_service = cfg.max_service,
        time_scale = cfg.time_scale,
        mode = %cfg.initial_mode,
        "HVAC scheduler starting"
    );

    let store = Arc::new(RoomStore::new());
    store.seed(&cfg.room_ids, cfg.initial_mode);

    let persistence: Arc<dyn RoomPersistence> = Arc::new(CsvPersistence::new(cfg.log_dir.clone()));
    let initial_mode = cfg.initial_mode;
    let handle = SchedulerHandle::new(store, persistence, Arc::new(cfg), initial_mode);

    let tick_task = scheduler::tick::spawn_tick(handle.clone());
    let health_task = health::spawn_heartbeat(handle.clone());
    let command_task = commands::stdin::spawn_command_loop(handle.clone());

    info!("scheduler running, reading commands from stdin. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting");

    tick_task.abort();
    health_task.abort();
    command_task.abort();
    Ok(())
}
