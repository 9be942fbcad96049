//! Orbit realtime server binary: configuration, storage and the HTTP +
//! WebSocket listener.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orbit_store::Database;

use orbit_server::api::{self, AppState};
use orbit_server::config::ServerConfig;
use orbit_server::presence::InMemoryPresence;
use orbit_server::rate_limit::{EventRateLimiter, IpRateLimiter};
use orbit_server::roster::SqliteRosterSource;
use orbit_server::Realtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orbit_server=debug")),
        )
        .init();

    info!("Starting Orbit realtime server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        ring_timeout_secs = config.ring_timeout_secs,
        internal_api = config.internal_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Roster store (creates the file and runs migrations if needed)
    let db = Database::open_at(&config.database_path)?;
    let rosters = Arc::new(SqliteRosterSource::new(Arc::new(Mutex::new(db))));

    // Presence is process-local: one instance only
    let presence = Arc::new(InMemoryPresence::new());

    let realtime = Realtime::new(presence, rosters, config.realtime_options());

    let rate_limiter = IpRateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);
    let event_limiter = EventRateLimiter::new(config.event_rate_per_sec, config.event_rate_burst);

    let http_addr = config.http_addr;
    let app_state = AppState {
        realtime,
        rate_limiter: rate_limiter.clone(),
        event_limiter: event_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
            event_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
