//! Virtual Greenhouse engine binary.
//!
//! Wires the plant store, decay scheduler, transport bridge and fan-out hub
//! into one process and runs until it receives Ctrl-C. A scheduler that
//! stops earlier leaves the hub serving.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `greenhouse-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open persistence (`PostgreSQL` when configured, otherwise in memory)
//! 4. Hydrate the plant store from the catalog
//! 5. Start the transport (loopback or NATS)
//! 6. Create the hub and relay sensor readings into it
//! 7. Start the hub server
//! 8. Run the decay scheduler
//! 9. Shut down on Ctrl-C

mod error;
mod lifecycle;
mod nats_transport;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::config::{BridgeMode, LogFormat, LoggingConfig};
use greenhouse_core::{
    AuditLog, CommandHandler, DecayScheduler, EventSink, GreenhouseConfig, InMemoryRepository,
    LoopbackTransport, PlantRepository, PlantStore, SchedulerControl, SchedulerSettings, Transport,
    bridge,
};
use greenhouse_db::{PgRepository, PostgresConfig, PostgresPool};
use greenhouse_hub::startup::spawn_hub;
use greenhouse_hub::{AppState, FanoutHub, ServerConfig};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_transport::{NatsSettings, NatsTransport};

/// Config file looked up relative to the working directory.
const CONFIG_PATH: &str = "greenhouse-config.yaml";

/// Persistence collaborators chosen at startup.
struct Persistence {
    repository: Arc<dyn PlantRepository>,
    audit: Arc<dyn AuditLog>,
    pool: Option<PostgresPool>,
}

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any startup step fails. Runtime failures are logged
/// and never end the process.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("greenhouse-engine starting");
    if !from_file {
        info!(path = CONFIG_PATH, "Config file not found, using defaults");
    }
    info!(
        tick_interval_ms = config.scheduler.tick_interval_ms,
        max_ticks = config.scheduler.max_ticks,
        bridge = ?config.bridge.mode,
        port = config.hub.port,
        "Configuration loaded"
    );

    // 3. Open persistence.
    let persistence = open_persistence(&config).await?;

    // 4. Hydrate the store.
    let persist_timeout = config.scheduler.persist_timeout();
    let store = Arc::new(PlantStore::new(
        Arc::clone(&persistence.repository),
        persist_timeout,
    ));
    let catalog = persistence.repository.load_catalog().await?;
    let species_count = catalog.species.len();
    let hydrated = store.hydrate(catalog).await;
    info!(plants = hydrated, species = species_count, "Plant store hydrated");

    // 5. Start the transport.
    let nats = match config.bridge.mode {
        BridgeMode::Nats => Some(Arc::new(NatsTransport::start(NatsSettings::from(
            &config.bridge,
        )))),
        BridgeMode::Loopback => None,
    };
    let transport: Arc<dyn Transport> = match &nats {
        Some(nats) => Arc::clone(nats) as Arc<dyn Transport>,
        None => Arc::new(LoopbackTransport::with_capacity(
            config.bridge.outbound_capacity,
        )),
    };
    info!(mode = ?config.bridge.mode, "Transport started");

    // 6. Hub and relay.
    let hub = FanoutHub::new(config.hub.subscriber_buffer);
    let relay = bridge::spawn_relay(transport.as_ref(), Arc::clone(&hub) as Arc<dyn EventSink>);

    // 7. Hub server.
    let control = Arc::new(SchedulerControl::new(
        config.scheduler.tick_interval_ms,
        config.scheduler.max_ticks,
    ));
    let commands = Arc::new(CommandHandler::new(
        Arc::clone(&store),
        Arc::clone(&persistence.audit),
        Arc::clone(&hub) as Arc<dyn EventSink>,
        persist_timeout,
    ));
    let state = Arc::new(
        AppState::new(Arc::clone(&hub), commands, Arc::clone(&store))
            .with_control(Arc::clone(&control))
            .with_keep_alive(Duration::from_secs(config.hub.keep_alive_secs))
            .with_cors_origins(config.hub.cors_origins.clone()),
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = spawn_hub(
        ServerConfig {
            host: config.hub.host.clone(),
            port: config.hub.port,
        },
        state,
        async move {
            let _ = shutdown_rx.await;
        },
    )?;

    // 8. Decay scheduler.
    let scheduler = DecayScheduler::new(
        Arc::clone(&store),
        Arc::clone(&persistence.repository),
        Arc::clone(&persistence.audit),
        Arc::clone(&transport),
        Arc::clone(&control),
        SchedulerSettings {
            io_timeout: persist_timeout,
            sync_each_tick: config.scheduler.sync_each_tick,
        },
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    // 9. Serve until Ctrl-C, even after the scheduler ends.
    lifecycle::run_until_shutdown(scheduler_task, &control, lifecycle::ctrl_c()).await?;

    let _ = shutdown_tx.send(());
    if let Err(e) = server.await {
        warn!(error = %e, "Hub server task failed");
    }
    relay.abort();
    if let Some(nats) = &nats {
        nats.shutdown();
    }
    if let Some(pool) = &persistence.pool {
        pool.close().await;
    }

    info!("greenhouse-engine shutdown complete");
    Ok(())
}

/// Load configuration, falling back to defaults when the file is missing.
///
/// The second value reports whether the file was found.
fn load_config() -> Result<(GreenhouseConfig, bool), EngineError> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() {
        Ok((GreenhouseConfig::from_file(path)?, true))
    } else {
        Ok((GreenhouseConfig::parse("")?, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Connect to `PostgreSQL` when a URL is configured, seeding an empty
/// database; otherwise use the configured seed in memory.
async fn open_persistence(config: &GreenhouseConfig) -> Result<Persistence, EngineError> {
    let Some(pg) = PostgresConfig::from_database(&config.database) else {
        info!("No database configured, using in-memory persistence");
        let memory = Arc::new(InMemoryRepository::with_catalog(config.seed.to_catalog()));
        return Ok(Persistence {
            repository: Arc::clone(&memory) as Arc<dyn PlantRepository>,
            audit: memory,
            pool: None,
        });
    };

    let pool = PostgresPool::connect(&pg).await?;
    pool.run_migrations().await?;

    let repository = Arc::new(PgRepository::new(&pool));
    if repository.species_count().await? == 0 {
        repository.seed(&config.seed.to_catalog()).await?;
    }

    Ok(Persistence {
        repository: Arc::clone(&repository) as Arc<dyn PlantRepository>,
        audit: repository,
        pool: Some(pool),
    })
}
