use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_core::{LogSink, MonitorSession};
use warden_store::SqliteStore;

mod config;
mod dbus_interface;
mod engine;
mod replay;

use config::{BusKind, Config};
use dbus_interface::{BusSink, MonitorService, BUS_NAME, OBJECT_PATH};
use engine::EngineStats;
use replay::ReplayEncoder;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("wardend starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        known_dir = %config.known_dir.display(),
        unknown_dir = %config.unknown_dir.display(),
        bus = ?config.bus,
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening face database {}", config.db_path.display()))?;

    let (bus_sink, alerts) = BusSink::channel();
    let session = MonitorSession::start(config.session_config(), Arc::new(store))
        .context("starting monitor session")?
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(bus_sink));
    let session = Arc::new(session);
    let stats = Arc::new(EngineStats::default());

    let service = MonitorService::new(Arc::clone(&session), Arc::clone(&stats));
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    tokio::spawn(dbus_interface::broadcast_alerts(conn.clone(), alerts));

    let replay_task = match &config.replay_manifest {
        Some(path) => {
            let frames = replay::read_manifest(path)
                .with_context(|| format!("reading replay manifest {}", path.display()))?;
            let (submitter, worker) =
                engine::spawn_engine(ReplayEncoder, Arc::clone(&session), Arc::clone(&stats))?;
            let interval = config.frame_interval;
            Some((
                tokio::spawn(engine::run_pacer(frames, interval, submitter)),
                worker,
            ))
        }
        None => {
            tracing::warn!("no replay manifest configured; serving management calls only");
            None
        }
    };

    tracing::info!(session = %session.id(), "wardend ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("wardend shutting down");

    if let Some((pacer, worker)) = replay_task {
        pacer.abort();
        // Dropping the pacer's submitter lets the worker drain and exit.
        let _ = pacer.await;
        tokio::task::spawn_blocking(move || worker.join())
            .await?
            .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    }

    let status = session.status();
    tracing::info!(
        frames = status.frames,
        alerts = status.alerts,
        suppressed = status.suppressed,
        engine = ?stats.snapshot(),
        "final counters"
    );

    Ok(())
}
