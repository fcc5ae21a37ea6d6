//! caphub server binary: env config, store wiring, serve loop.

use std::path::PathBuf;
use std::sync::Arc;

use caphub::{Hub, SqliteCheckpointStore, SqliteThreadStore};
use clap::Parser;
use config::HubSettings;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "caphub-serve", about = "Multi-agent execution hub server")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8087")]
    addr: String,

    /// SQLite database path for threads and checkpoints. Omit for in-memory
    /// stores (no restart recovery).
    #[arg(long, env = "CAPHUB_DB")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config::load_and_apply("caphub", None) {
        tracing::warn!(error = %e, "config load failed, continuing with process env");
    }
    let settings = HubSettings::from_env();
    let args = Args::parse();

    let mut builder = Hub::builder().config(serve::hub_config_from_settings(&settings));
    if let Some(db) = &args.db {
        // threads and checkpoints share one database file
        builder = builder
            .thread_store(Arc::new(SqliteThreadStore::new(db)?))
            .checkpoint_store(Arc::new(SqliteCheckpointStore::new(db)?));
        tracing::info!(db = %db.display(), "using sqlite persistence");
    }
    let hub = Arc::new(builder.build()?);
    hub.start().await?;

    let serving = serve::run_serve(Some(&args.addr), hub.clone());
    tokio::select! {
        out = serving => out?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            hub.shutdown();
        }
    }
    Ok(())
}
