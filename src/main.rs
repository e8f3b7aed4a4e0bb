use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use storage_server::{
    config::AppConfig,
    routes::routes::routes,
    services::{
        backend::{DiskBackend, ObjectStoreBackend},
        cipher::CipherKeys,
        file_service::FileService,
        metadata::MetadataStore,
    },
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting storage-server with config: {:?}", cfg);

    // --- Ensure disk root exists ---
    if !Path::new(&cfg.disk_root).exists() {
        fs::create_dir_all(&cfg.disk_root)
            .with_context(|| format!("creating disk root {}", cfg.disk_root))?;
        tracing::info!("Created disk root at {}", cfg.disk_root);
    }

    // --- Initialize SQLite connection ---
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database url {}", cfg.database_url))?
        .create_if_missing(true);

    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .context("connecting to SQLite")?,
    );
    let metadata = MetadataStore::new(db);

    // --- Handle migration mode ---
    if migrate {
        metadata.migrate().await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Backends ---
    let settings = cfg.transfer_settings();
    let disk = DiskBackend::new(&cfg.disk_root, settings.chunk_size);
    let object_store = match &cfg.s3 {
        Some(s3) => {
            if s3
                .endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with("http://"))
            {
                tracing::warn!(
                    endpoint = ?s3.endpoint,
                    "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
                );
            }
            Some(
                ObjectStoreBackend::s3(s3, settings.chunk_size)
                    .context("creating S3 operator")?,
            )
        }
        None => {
            tracing::warn!("STORAGE_SERVER_S3_BUCKET not set; the s3 storage medium is disabled");
            None
        }
    };

    // --- Initialize core service ---
    let keys = CipherKeys::derive(&cfg.encryption_key_seed, &cfg.encryption_iv_seed);
    let service = FileService::new(metadata, disk, object_store, keys, settings);

    // --- Build router ---
    let app: Router = routes().with_state(service);

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
    axum::serve(listener, app).await?;

    Ok(())
}
