//! c2label CLI
//!
//! Command-line entry point for the Falco C2 pod labeler.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use c2label::receiver::{shutdown_signal, ReceiverServer};
use c2label::responder::{KubeClient, Responder};
use c2label::Config;

/// c2label - label pods flagged by Falco's C2 rule
#[derive(Parser)]
#[command(name = "c2label")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "C2LABEL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive Falco CloudEvents and label matching pods (default)
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // A missing .env is the normal case in a pod.
    let _ = dotenvy::dotenv();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config, cli.verbose);

    let result = match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => run_serve(config, host, port).await,
        Commands::CheckConfig => run_check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "c2label failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if config.logging.is_json() {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let metrics = if config.server.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install metrics recorder")?;
        Some(handle)
    } else {
        None
    };

    let kube = KubeClient::new(&config.kubernetes)?;
    let responder = Responder::new(
        &config.responder,
        config.kubernetes.request_timeout,
        Arc::new(kube),
    );

    info!(
        source = %responder.policy().source,
        event_type = %responder.policy().event_type,
        rule = %responder.policy().rule,
        label = %format!("{}={}", config.responder.label_key, config.responder.label_value),
        api_url = %config.kubernetes.api_url,
        "Starting c2label responder"
    );

    ReceiverServer::new(Arc::new(responder), metrics)
        .serve(&config.bind_addr(), shutdown_signal())
        .await?;

    Ok(())
}

fn run_check_config(config: &Config) -> anyhow::Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
