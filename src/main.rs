//! beacon-proxy binary entrypoint.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use beacon_proxy::config::{load_config, Config};
use beacon_proxy::observability::{logging, metrics::Metrics};
use beacon_proxy::{server, HealthChecker, LoadBalancer};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "BEACON_PROXY_CONFIG";

#[derive(Parser)]
#[command(name = "beacon-proxy")]
#[command(about = "Failover reverse proxy for Ethereum Beacon Chain API endpoints")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let (config, load_error) = match load_config(&config_path) {
        Ok(config) => (config, None),
        Err(error) => (Config::default(), Some(error)),
    };
    let config = Arc::new(config);

    logging::init(&config.logger);

    match load_error {
        None => tracing::info!(path = %config_path.display(), "configuration loaded"),
        Some(error) => tracing::warn!(
            path = %config_path.display(),
            %error,
            "failed to load configuration, using defaults"
        ),
    }

    let metrics = match Metrics::new(&config.metrics) {
        Ok(metrics) => metrics,
        Err(error) => {
            tracing::error!(%error, "failed to initialize metrics");
            return ExitCode::FAILURE;
        }
    };

    let balancer = match LoadBalancer::new(Arc::clone(&config), metrics) {
        Ok(balancer) => Arc::new(balancer),
        Err(error) => {
            tracing::error!(%error, "failed to create load balancer");
            return ExitCode::FAILURE;
        }
    };

    for node in balancer.nodes() {
        let role = if node.original_priority() == 0 {
            "primary".to_string()
        } else {
            format!("backup-{}", node.original_priority())
        };
        match node.kind() {
            Some(kind) => tracing::info!(
                name = %node.name(),
                priority = %role,
                r#type = %kind,
                "beacon node configured"
            ),
            None => tracing::info!(name = %node.name(), priority = %role, "beacon node configured"),
        }
    }

    let checker = match HealthChecker::new(Arc::clone(&balancer)) {
        Ok(checker) => Arc::new(checker),
        Err(error) => {
            tracing::error!(%error, "failed to create health checker");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = checker.startup_check().await {
        tracing::error!(%error, "startup health check failed");
        return ExitCode::FAILURE;
    }

    checker.spawn();

    tracing::info!(port = config.server.port, "starting HTTP server");
    if let Err(error) = server::run(&config, balancer).await {
        tracing::error!(%error, "HTTP server failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
