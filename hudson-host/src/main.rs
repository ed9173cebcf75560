//! Hudson live host: serves the navigation engine over WebSocket.
//!
//! Opens the RocksDB store, optionally seeds the in-memory catalog from a
//! JSON file, and runs the live server until it fails or is killed.

use clap::Parser;
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use hudson_core::InMemoryCatalog;
use hudson_live::{LiveServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "hudson-host")]
#[command(about = "Live set navigation server")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "HUDSON_BIND", default_value = "127.0.0.1:9191")]
    bind: String,
    /// RocksDB directory
    #[arg(long, env = "HUDSON_DATA_DIR", default_value = "hudson_data")]
    data_dir: PathBuf,
    /// Share token secret; random per process when unset
    #[arg(long, env = "HUDSON_SHARE_SECRET", hide_env_values = true)]
    share_secret: Option<String>,
    /// JSON array of catalog items to serve
    #[arg(long, env = "HUDSON_CATALOG")]
    catalog: Option<PathBuf>,
    #[arg(long, env = "HUDSON_BROADCAST_CAPACITY", default_value_t = 256)]
    broadcast_capacity: usize,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            broadcast_capacity: self.broadcast_capacity,
            storage_path: self.data_dir.clone(),
            share_secret: self.share_secret.as_ref().map(|s| s.as_bytes().to_vec()),
            ..ServerConfig::default()
        }
    }
}

fn load_catalog(path: Option<&PathBuf>) -> Result<InMemoryCatalog, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(InMemoryCatalog::new());
    };
    let json = std::fs::read_to_string(path)?;
    let catalog = InMemoryCatalog::from_json(&json)?;
    info!("Loaded {} catalog items from {}", catalog.len(), path.display());
    Ok(catalog)
}

/// Open the store and serve until the listener fails.
async fn serve(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let catalog = load_catalog(cli.catalog.as_ref())?;
    let config = cli.server_config();
    info!("Opening store at {}", config.storage_path.display());
    let server = LiveServer::new(config, Arc::new(catalog))?;
    server.run().await.map_err(|e| e as Box<dyn Error>)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.share_secret.is_none() {
        log::warn!("No share secret configured; share links stop working on restart");
    }
    serve(&cli).await
}
