mod daemon;
mod fleet;
mod request;

use clap::Parser;
use fleet::Fleet;
use northstar_shared::protocol;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Simulated NorthStar agent daemon
#[derive(Parser, Debug)]
#[command(name = "northstar-agentd", version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = format!("{}:{}", protocol::DEFAULT_HOST, protocol::DEFAULT_PORT))]
    bind: String,

    /// Agents linked at startup
    #[arg(long, value_delimiter = ',')]
    link: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let fleet = Arc::new(Fleet::new());
    if !args.link.is_empty() {
        fleet.link(&args.link).await;
        info!("Linked at startup: {}", fleet.linked_ids().await.join(", "));
    }

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Agent daemon listening on {}", listener.local_addr()?);

    daemon::serve(listener, fleet).await?;
    info!("Agent daemon stopped");
    Ok(())
}
