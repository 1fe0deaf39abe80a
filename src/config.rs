use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix used to build the public URLs returned by `/upload-complete`.
    pub public_base_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked multipart upload relay")]
pub struct Args {
    /// Host to bind to (overrides CHUNK_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNK_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where assembled objects and part staging live
    /// (overrides CHUNK_RELAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CHUNK_RELAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for assembled objects (overrides CHUNK_RELAY_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CHUNK_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CHUNK_RELAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CHUNK_RELAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading CHUNK_RELAY_PORT"),
        };
        let env_storage =
            env::var("CHUNK_RELAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("CHUNK_RELAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/chunk_relay.db".into());
        let env_public = env::var("CHUNK_RELAY_PUBLIC_BASE_URL").ok();

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or(env_public)
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        let cfg = Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
