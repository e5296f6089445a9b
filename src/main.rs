//! ccentral admin daemon
//!
//! Serves the admin API and `/metrics`, and pushes aggregated instance
//! metrics to Zabbix when enabled in the service config.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | CCENTRAL_CONFIG | (none) | TOML settings file, or pass it as first argument |
//! | CCENTRAL_LISTEN | 0.0.0.0:3000 | Bind address |
//! | CCENTRAL_PORT | 3000 | Bind port |
//! | CCENTRAL_SERVICE_ID | ccentral | Service id of this daemon's own config |
//! | CCENTRAL_CHECK_INTERVAL | 10 | Config refresh interval, seconds |
//! | CCENTRAL_INSTANCE_TTL | 60 | Instance heartbeat lifetime, seconds |
//! | CCENTRAL_LOG | info | Log filter (`RUST_LOG` also honoured) |
//! | CCENTRAL_LOG_JSON | false | JSON log lines |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use ccentral::clock::{Clock, SystemClock};
use ccentral::config::{register_exporter_schema, ConfigCache};
use ccentral::export::{spawn_poll_loop, PushExporter};
use ccentral::http::{self, AppState};
use ccentral::observability::init_tracing;
use ccentral::settings::ServerSettings;
use ccentral::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = ServerSettings::load()?;
    init_tracing(&settings.log).map_err(|e| e as Box<dyn std::error::Error>)?;
    info!(
        "Starting ccentral {} (service id {})",
        env!("CARGO_PKG_VERSION"),
        settings.service_id
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MemoryStore::with_clock(clock.clone(), settings.instance_ttl);
    let config = Arc::new(ConfigCache::new(
        settings.service_id.clone(),
        Arc::new(store.clone()),
        clock.clone(),
        settings.check_interval,
    ));
    register_exporter_schema(&config);
    if let Err(e) = config.force_update_config().await {
        error!("Initial configuration load failed: {}", e);
    }

    let evictor = tokio::spawn(evict_loop(store.clone(), settings.instance_ttl));

    let exporter = PushExporter::new(Arc::new(store.clone()), config.clone(), clock.clone());
    let (poll_handle, poll_task) = spawn_poll_loop(exporter);

    let listener = TcpListener::bind(settings.listen).await?;
    let state = AppState {
        store,
        config,
        clock,
    };
    let served = http::serve(listener, state, async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await;

    poll_handle.shutdown().await;
    let _ = poll_task.await;
    evictor.abort();
    info!("ccentral stopped");

    served?;
    Ok(())
}

/// Drop expired instance registrations, at most one TTL late
async fn evict_loop(store: MemoryStore, ttl: Duration) {
    let mut ticker = tokio::time::interval(ttl);
    loop {
        ticker.tick().await;
        let evicted = store.evict_expired();
        if evicted > 0 {
            debug!("Evicted {} expired instances", evicted);
        }
    }
}
