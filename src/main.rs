mod broker;
mod cli;
mod client;
mod config;
mod ipc;
mod listen;
mod relay;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let socket_path = match config::resolve_socket_path(cli.socket) {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(error = %e, "cannot resolve socket path");
            eprintln!("deeplinkd: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Broker { intent_file } => {
            let config = config::BrokerConfig {
                socket_path,
                intent_file,
            };
            if let Err(e) = broker::run(config).await {
                tracing::error!(error = %e, "broker failed");
                eprintln!("deeplinkd broker: {e}");
                std::process::exit(1);
            }
        }
        Command::Listen => {
            if let Err(e) = listen::run(&socket_path).await {
                tracing::error!(error = %e, "listen failed");
                eprintln!("deeplinkd listen: {e}");
                std::process::exit(1);
            }
        }
        Command::Client(action) => {
            let name = action.name();
            if let Err(e) = client::run(&socket_path, action).await {
                tracing::error!(error = %e, command = name, "client failed");
                eprintln!("deeplinkd {name}: {e}");
                std::process::exit(1);
            }
        }
    }
}
