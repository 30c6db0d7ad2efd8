use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;

mod app;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "snowstorm - load and consistency harness for station servers",
    long_about = None
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Station server binary
    #[arg(long)]
    server: Option<Utf8PathBuf>,

    /// Station client binary
    #[arg(long)]
    client: Option<Utf8PathBuf>,

    /// Station source file; repeat once per station, in id order
    #[arg(short, long = "station")]
    stations: Vec<Utf8PathBuf>,

    /// Server port (an unused one is picked when absent)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of client slots
    #[arg(long)]
    clients: Option<usize>,

    /// Number of workload iterations
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Seed for reproducible station draws and culling
    #[arg(long)]
    seed: Option<u64>,

    /// Verify a server snapshot every N iterations (0 disables)
    #[arg(long)]
    verify_every: Option<u64>,

    /// Abort on the first inconsistent snapshot
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!("Starting snowstorm v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if let Some(config_path) = args.config {
        snowstorm_core::config::Config::load_from_path(&config_path)
            .with_context(|| format!("loading {config_path}"))?
    } else {
        snowstorm_core::config::Config::load_or_default()
    };

    // Override with CLI arguments
    if let Some(server) = args.server {
        config.server.binary = server;
    }
    if let Some(client) = args.client {
        config.client.binary = client;
    }
    if !args.stations.is_empty() {
        config.server.stations = args.stations;
    }
    if args.port.is_some() {
        config.server.port = args.port;
    }
    if let Some(clients) = args.clients {
        config.workload.clients = clients;
    }
    if let Some(iterations) = args.iterations {
        config.workload.iterations = iterations;
    }
    if args.seed.is_some() {
        config.workload.seed = args.seed;
    }
    if let Some(every) = args.verify_every {
        config.workload.verify_every = every;
    }

    config.validate().context("invalid configuration")?;

    info!("Server: {} ({} stations)", config.server.binary, config.server.stations.len());
    info!("Client: {}", config.client.binary);
    info!(
        "Workload: {} clients, {} iterations",
        config.workload.clients, config.workload.iterations
    );

    app::run(config, args.strict).await
}
