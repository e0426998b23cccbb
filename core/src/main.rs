/// Parley chat client - terminal entry point
use parley_core::client::ChatClient;
use parley_core::terminal::{run_input_loop, PendingPrompt, TerminalPresenter};
use parley_core::config::DEFAULT_LOG_FILTER;
use parley_core::{Config, TcpConnector};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Logs go to stderr so they don't interleave with the chat on stdout
    let filter = match &config.log_filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| anyhow::anyhow!("Invalid log filter: {}", e))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Parley");
    info!("   Settings: {}", config.settings_path.display());

    let pending = PendingPrompt::default();
    let presenter = TerminalPresenter::new(pending.clone());
    let connector = TcpConnector::new(config.connect_timeout);
    let (client, session) = ChatClient::start(&config, connector, presenter)
        .map_err(|e| anyhow::anyhow!("Client error: {}", e))?;

    tokio::select! {
        result = run_input_loop(client.clone(), pending) => {
            if let Err(e) = result {
                warn!("Input loop ended: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    client.shutdown();
    session.await?;
    info!("Bye");
    Ok(())
}
