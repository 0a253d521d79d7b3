use clap::Parser;
use tracing_subscriber::EnvFilter;

mod api_client;
mod oneshot;

#[derive(Parser)]
#[command(name = "queryflow")]
#[command(about = "Streaming research assistant client")]
struct Cli {
    /// The question to answer
    query: String,

    /// Server base URL
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,

    /// Continue an existing session
    #[arg(long)]
    session: Option<String>,

    /// Approve the drafted plan without prompting
    #[arg(short = 'y', long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    oneshot::execute(&cli.server, &cli.query, cli.session.as_deref(), cli.yes).await
}
