use batchql::{api::Server, config::Config};
use tracing::info;

/// The main entry point for the batch service.
///
/// Initializes logging, loads configuration (path from the first argument,
/// `config/default.toml` otherwise) and serves the JSON-RPC API until ctrl-c.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("batchql starting with config: {:?}", config);

    let server = Server::new(config);
    server.start().await?;

    Ok(())
}
