//! `authsvcd`: the service binary. Loads config, connects to the store,
//! runs bootstrap (keyspace, coordination tables, catalog migration,
//! default org), then serves the REST API until interrupted.
//!
//! CLI shape grounded on the teacher's `clap::Parser`/`Subcommand` binary,
//! trimmed to the flags an always-on service needs rather than the
//! teacher's one-shot `add`/`run` migration commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use authsvc::api::{self, AppState};
use authsvc::authdb::AuthDb;
use authsvc::bootstrap;
use authsvc::config::Config;
use authsvc::store::StoreGateway;

/// Multi-tenant auth service over a Cassandra-family store.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON config file, merged over compiled-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the REST API to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Root directory of baseline/migration `.cql` catalogs.
    #[arg(long, default_value = "schema")]
    schema_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path).context("loading config file")?,
        None => Config::load().context("loading system config")?,
    };

    info!(keyspace = %config.cassandra.auth_keyspace, "starting authsvcd");

    let gateway = Arc::new(
        StoreGateway::connect(&config.cassandra.nodes, &config.cassandra.port)
            .await
            .context("connecting to store")?,
    );

    let cancel = CancellationToken::new();
    let shutdown_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    bootstrap::setup_db(
        gateway.clone(),
        &config.cassandra.auth_keyspace,
        &args.schema_root,
        &cancel,
    )
    .await
    .context("bootstrapping keyspace")?;

    let authdb = Arc::new(AuthDb::new(gateway, config.cassandra.auth_keyspace.clone()));
    bootstrap::create_default_org(&authdb, &config)
        .await
        .context("seeding default org")?;

    let state = AppState { authdb };
    api::serve(state, &args.bind, cancel)
        .await
        .context("serving REST API")?;

    info!("authsvcd exiting");
    Ok(())
}
