//! Entrypoint: set up tracing, load configuration, build the database pools,
//! run the flow-map startup gate, then serve the API until Ctrl-C.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `primary_database_url`   – Postgres store with corp info, stats and the flow map
//!  - `secondary_database_url` – legacy Postgres store with the overview and class tables
//!  - `server_bind`            – HTTP bind address for the API, metrics & health endpoints
//!  - `flowmap_csv_path`       – CSV loaded into `flow_map` at every start
//!  - `startup`                – abort or keep retrying while the database is unreachable

use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use corp_registry_api::api::{self, AppState};
use corp_registry_api::config::Settings;
use corp_registry_api::db::Databases;
use corp_registry_api::errors::AppError;
use corp_registry_api::loader;

/// Application entrypoint for the corporate registry API.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 3. Create lazy Postgres pools for the primary and secondary stores.
/// 4. Run migrations and load the flow-map CSV into the primary store.
/// 5. Serve HTTP until Ctrl-C, then close both pools.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
    info!("Starting corporate registry API…");

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new()?;
    info!(
        server_bind = %settings.server_bind,
        csv = %settings.flowmap_csv_path.display(),
        on_failure = ?settings.startup.on_failure,
        "Loaded configuration"
    );

    let addr: SocketAddr = settings.server_bind.parse().map_err(|e| {
        AppError::Config(config::ConfigError::Message(format!(
            "invalid `server_bind` {}: {e}",
            settings.server_bind
        )))
    })?;

    // ───────────────────────────────────────────────────────────────
    // 3. Database pools
    // ───────────────────────────────────────────────────────────────
    let dbs = Databases::connect_lazy(&settings)?;

    // ───────────────────────────────────────────────────────────────
    // 4. Startup gate: migrations + flow-map load
    // ───────────────────────────────────────────────────────────────
    if let Err(e) =
        loader::prepare_primary(&dbs.primary, &settings.flowmap_csv_path, &settings.startup).await
    {
        error!(error = %e, "Startup load failed");
        dbs.close().await;
        return Err(e);
    }

    // ───────────────────────────────────────────────────────────────
    // 5. Serve until Ctrl-C
    // ───────────────────────────────────────────────────────────────
    let state = Arc::new(AppState { dbs: dbs.clone() });
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let served = api::serve(state, addr, shutdown).await;
    dbs.close().await;
    served
}
