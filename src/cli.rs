use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "deeplinkd", about = "Deep link relay between an activation source and a runtime")]
pub struct Cli {
    /// Relay socket path (default: $XDG_RUNTIME_DIR/deeplinkd/relay.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay daemon
    Broker {
        /// File a launcher writes the cold-start intent URL to
        #[arg(long)]
        intent_file: Option<PathBuf>,
    },

    /// Attach as the runtime listener and print each deep link
    Listen,

    #[command(flatten)]
    Client(ClientAction),
}

#[derive(Subcommand)]
pub enum ClientAction {
    /// Report a new intent URL
    Notify {
        /// The deep link URL
        url: String,
    },

    /// Report the intent URL the app was launched with
    Launch {
        /// The deep link URL
        url: String,
    },

    /// Drain the initial deep link and print it
    Initial,

    /// Show relay state
    Status,
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::Launch { .. } => "launch",
            Self::Initial => "initial",
            Self::Status => "status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_client_actions_at_top_level() {
        let cli = Cli::try_parse_from(["deeplinkd", "notify", "app://x"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Client(ClientAction::Notify { ref url }) if url == "app://x"
        ));
        if let Command::Client(action) = cli.command {
            assert_eq!(action.name(), "notify");
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "deeplinkd",
            "broker",
            "--intent-file",
            "/tmp/intent",
            "--socket",
            "/tmp/r.sock",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/r.sock")));
        assert!(matches!(
            cli.command,
            Command::Broker { intent_file: Some(ref p) } if p == &PathBuf::from("/tmp/intent")
        ));
    }

    #[test]
    fn notify_requires_url() {
        assert!(Cli::try_parse_from(["deeplinkd", "notify"]).is_err());
    }
}
