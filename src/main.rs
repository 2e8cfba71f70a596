use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use zip2pdf::{
    config::AppConfig,
    routes::routes::app,
    services::{
        archive_codec::ZipCodec,
        password_resolver::{PasswordDictionary, PasswordResolver},
        storage_service::SqliteBlobStore,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting zip2pdf with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        // Create parent directory if needed
        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let store = SqliteBlobStore::new(db.clone(), cfg.storage_dir.clone());

    // --- Handle migration mode ---
    if migrate {
        store.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    // The schema is idempotent; make sure it exists before serving.
    store.migrate().await?;

    // --- Password dictionary ---
    let dictionary = match &cfg.password_file {
        Some(path) => PasswordDictionary::from_file(path)
            .with_context(|| format!("reading password file {}", path.display()))?,
        None => PasswordDictionary::builtin(),
    };
    tracing::info!(passwords = dictionary.len(), "password dictionary loaded");
    let resolver = PasswordResolver::new(Arc::new(ZipCodec::new(cfg.max_entry_bytes)), dictionary);

    // --- Initialize core services ---
    let state = AppState::new(
        Arc::new(store),
        chrono::Duration::hours(cfg.ttl_hours),
        resolver,
    );

    if cfg.sweep_interval_secs > 0 {
        tracing::info!(every_secs = cfg.sweep_interval_secs, "starting background sweeper");
        state
            .lifecycle
            .clone()
            .spawn_sweeper(Duration::from_secs(cfg.sweep_interval_secs));
    }

    // --- Build router ---
    let app: Router = app(state, cfg.body_limit_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
        Err(err) => {
            tracing::error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await
        }
    }
}
