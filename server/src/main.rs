//! Bastion license server
//!
//! Issues license keys to administrators and answers verification requests
//! from client software.
//!
//! Usage:
//!   BASTION_ADMIN_PASSWORD=... bastion-server --port 4100 --db licenses.db
//!
//! Without `--db` records live in memory and are lost on exit.

use std::{net::IpAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use bastion_license::{LicenseService, LicenseStore, MemoryLicenseStore};
use bastion_server::{AdminAuth, AdminCredentials, AdminToken, AppState, build_router};
use bastion_storage::SqliteLicenseStore;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bastion-server")]
#[command(about = "Bastion license issuing and verification server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "4100")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// SQLite database file (in-memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Static bearer token accepted on admin endpoints
    #[arg(long, env = "BASTION_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Username accepted by POST /api/auth/login
    #[arg(long, env = "BASTION_ADMIN_USERNAME", default_value = "admin")]
    admin_username: String,

    /// Password accepted by POST /api/auth/login
    #[arg(long, env = "BASTION_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Insert a demo user and licenses into an empty store
    #[arg(long)]
    seed: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Bastion server starting...");

    let mut auth = AdminAuth::new();
    if let Some(token) = &args.admin_token {
        auth = auth.with_token(AdminToken::new(token).context("admin token must not be empty")?);
    }
    if let Some(password) = &args.admin_password {
        let credentials = AdminCredentials::new(&args.admin_username, password)
            .context("admin username and password must not be empty")?;
        auth = auth.with_credentials(credentials);
    }
    if !auth.is_configured() {
        bail!("set BASTION_ADMIN_TOKEN or BASTION_ADMIN_PASSWORD to enable admin access");
    }

    let store: Arc<dyn LicenseStore> = match &args.db {
        Some(path) => {
            info!("Opening license database at {:?}", path);
            Arc::new(
                SqliteLicenseStore::open(path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            )
        }
        None => {
            warn!("No --db given; licenses are kept in memory only");
            Arc::new(MemoryLicenseStore::new())
        }
    };

    let service = LicenseService::new(store);
    if args.seed {
        if service.seed_sample_data().context("Failed to seed sample data")? {
            info!("Sample data inserted");
        } else {
            info!("Store already holds licenses; skipping seed");
        }
    }

    let app = build_router(AppState::new(service, auth));
    let listener = tokio::net::TcpListener::bind((args.bind, args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.bind, args.port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Bastion server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
