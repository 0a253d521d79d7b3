//! Server binary entry point
//!
//! Loads configuration, wires the resolver and backend clients into the
//! pipeline, and serves the streaming HTTP API.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use queryflow_api::ApiServer;
use queryflow_common::SystemConfig;
use queryflow_history::SessionStore;
use queryflow_orchestrator::Pipeline;
use queryflow_registry::{AgentServiceClient, EndpointResolver, HttpProbe, RegistryClient};

#[derive(Parser)]
#[command(name = "queryflow-server")]
#[command(version = "0.1.0")]
#[command(about = "Streaming multi-task orchestration server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "queryflow.toml")]
    config: String,

    /// Host to bind to (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides configuration)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = SystemConfig::load_or_default(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    info!("Configuration loaded from {}", cli.config);

    let probe = Arc::new(HttpProbe::new(Duration::from_millis(
        config.services.probe_timeout_ms,
    )));
    let resolver = Arc::new(EndpointResolver::from_config(&config.services, probe));
    let tools = Arc::new(RegistryClient::new(resolver.clone()));
    let completion = Arc::new(AgentServiceClient::new(resolver));
    let store = Arc::new(SessionStore::new(config.session.max_sessions));

    let pipeline = Arc::new(Pipeline::new(store, tools, completion, config.clone()));

    ApiServer::new(pipeline, config.server).run().await
}
