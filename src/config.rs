use crate::services::file_service::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CLEANUP_DELAY, DEFAULT_MAX_FILE_SIZE, TransferSettings,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub disk_root: String,
    pub database_url: String,
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub cleanup_delay: Duration,
    pub encryption_key_seed: String,
    pub encryption_iv_seed: String,
    pub s3: Option<S3Settings>,
}

/// Connection settings for the S3-compatible backend.
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming file storage server")]
pub struct Args {
    /// Host to bind to (overrides STORAGE_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides STORAGE_SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where disk-backed files are stored (overrides STORAGE_SERVER_DISK_ROOT)
    #[arg(long)]
    pub disk_root: Option<String>,

    /// Database URL (overrides STORAGE_SERVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum accepted file size in bytes (overrides STORAGE_SERVER_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Streaming chunk size in bytes (overrides STORAGE_SERVER_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("STORAGE_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("STORAGE_SERVER_PORT", 3000u16)?;
        let env_root =
            env::var("STORAGE_SERVER_DISK_ROOT").unwrap_or_else(|_| "./data/files".into());
        let env_db = env::var("STORAGE_SERVER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/storage.db".into());
        let env_max = parse_env("STORAGE_SERVER_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?;
        let env_chunk = parse_env("STORAGE_SERVER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let cleanup_ms = parse_env(
            "STORAGE_SERVER_CLEANUP_DELAY_MS",
            DEFAULT_CLEANUP_DELAY.as_millis() as u64,
        )?;

        // Secrets are environment-only so they never show up in `ps`.
        let encryption_key_seed = required_env("STORAGE_SERVER_ENCRYPTION_KEY_SEED")?;
        let encryption_iv_seed = required_env("STORAGE_SERVER_ENCRYPTION_IV_SEED")?;

        let s3 = env::var("STORAGE_SERVER_S3_BUCKET").ok().map(|bucket| S3Settings {
            endpoint: env::var("STORAGE_SERVER_S3_ENDPOINT").ok(),
            region: env::var("STORAGE_SERVER_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            bucket,
            access_key_id: env::var("STORAGE_SERVER_S3_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("STORAGE_SERVER_S3_SECRET_ACCESS_KEY").ok(),
        });

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            disk_root: args.disk_root.unwrap_or(env_root),
            database_url: args.database_url.unwrap_or(env_db),
            max_file_size: args.max_file_size.unwrap_or(env_max),
            chunk_size: args.chunk_size.unwrap_or(env_chunk),
            cleanup_delay: Duration::from_millis(cleanup_ms),
            encryption_key_seed,
            encryption_iv_seed,
            s3,
        };

        if cfg.chunk_size == 0 {
            anyhow::bail!("chunk size must be greater than zero");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            max_file_size: self.max_file_size,
            chunk_size: self.chunk_size,
            cleanup_delay: self.cleanup_delay,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing required environment variable {}", name))
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("disk_root", &self.disk_root)
            .field("database_url", &self.database_url)
            .field("max_file_size", &self.max_file_size)
            .field("chunk_size", &self.chunk_size)
            .field("cleanup_delay", &self.cleanup_delay)
            .field("encryption_key_seed", &"<redacted>")
            .field("encryption_iv_seed", &"<redacted>")
            .field("s3", &self.s3)
            .finish()
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<redacted>"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
