//! TrialScope gRPC Server
//!
//! A standalone server binary serving metric streams and search previews over
//! gRPC, backed by an in-memory metric store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trialscope::config::load_server_config;
use trialscope::engine::TrialScopeEngine;
use trialscope::storage::InMemoryStore;
use trialscope::transport::TrialScopeServiceImpl;

/// Command line options; anything given here overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "trialscope-server", version, about = "TrialScope gRPC Server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_server_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.listen_addr.set_port(port);
    }
    config.validate()?;

    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(
        TrialScopeEngine::new(store.clone(), store)
            .with_config(config.stream.clone(), config.simulation.clone())?,
    );
    let svc = TrialScopeServiceImpl::new(engine).into_server();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        poll_interval_ms = config.stream.poll_interval_ms,
        "starting gRPC server"
    );

    Server::builder()
        .add_service(svc)
        .serve_with_shutdown(config.listen_addr, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    info!("shut down");
    Ok(())
}
