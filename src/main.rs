//! vmmig-exporter
//!
//! Prometheus exporter for OpenShift Virtualization (KubeVirt) virtual
//! machines and Forklift migrations.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmmig_exporter::collector::{Collector, CollectorConfig, Scheduler};
use vmmig_exporter::server;
use vmmig_exporter::{ExporterConfig, ExporterMetrics, KubevirtApiClient, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// A Prometheus exporter designed to extract metrics for OpenShift Virtualization (KubeVirt)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start polling the cluster and serving metrics on :8080
    Start(StartArgs),
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    /// Authentication token (required)
    #[arg(long, env = "VMMIG_TOKEN", hide_env_values = true)]
    token: String,

    /// Server URL (required)
    #[arg(long, env = "VMMIG_SERVER_URL")]
    server_url: String,

    /// Comma-separated list of namespaces (required)
    #[arg(long, env = "VMMIG_NAMESPACES", value_delimiter = ',', required = true)]
    namespaces: Vec<String>,

    /// Skip TLS certificate verification of the cluster API
    #[arg(long, env = "VMMIG_INSECURE_SKIP_TLS_VERIFY")]
    insecure_skip_tls_verify: bool,

    /// Remove status series of VMs that changed status or were deleted
    #[arg(long, env = "VMMIG_PRUNE_STALE_STATUSES")]
    prune_stale_statuses: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let Command::Start(args) = cli.command;
    init_logging(&args);

    match start(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exporter stopped: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn start(args: StartArgs) -> Result<()> {
    let config = ExporterConfig::new(args.token, args.server_url, &args.namespaces)?
        .with_insecure_skip_tls_verify(args.insecure_skip_tls_verify)
        .with_prune_stale_statuses(args.prune_stale_statuses);

    info!("Starting vmmig exporter");
    info!("  Token: {}", config.masked_token());
    info!("  Server URL: {}", config.server_url);
    info!("  Namespaces: {:?}", config.namespaces);
    info!("  Poll interval: {:?}", config.poll_interval);
    info!("  Prune stale statuses: {}", config.prune_stale_statuses);

    let metrics = Arc::new(ExporterMetrics::new()?);
    let api = Arc::new(KubevirtApiClient::new(&config)?);

    // Bind before starting the loop so a busy port fails fast
    let listener = server::bind(config.metrics_addr).await?;

    let collector = Arc::new(Collector::new(
        api,
        metrics.clone(),
        CollectorConfig::from(&config),
    ));
    let scheduler = Scheduler::new(collector, config.poll_interval).spawn();

    // Serving stale metrics after the loop died would hide the failure
    tokio::select! {
        result = server::serve(listener, metrics) => result,
        err = Scheduler::watch(scheduler) => Err(err),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &StartArgs) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
