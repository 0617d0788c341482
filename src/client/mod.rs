//! CLI client for relay operations.
//!
//! One-shot commands that connect to the daemon, perform a single
//! request, print the result, and exit. `notify` and `launch` act as
//! the activation source; `initial` acts as a runtime asking for its
//! initial link; `status` observes.

pub(crate) mod broker_client;
mod format;

use std::path::Path;

use crate::cli::ClientAction;
use crate::ipc::protocol::Role;

pub(crate) use broker_client::RelayClient;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("relay: {0}")]
    Broker(String),
    /// The relay answered with an error code (e.g. `DEEPLINK_ERROR`).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

/// Run a one-shot client command against the daemon at `socket_path`.
pub async fn run(socket_path: &Path, action: ClientAction) -> Result<(), ClientError> {
    match action {
        ClientAction::Notify { url } => {
            let mut relay = RelayClient::connect(socket_path, Role::Source).await?;
            let delivery = relay.notify(&url).await?;
            format::print_delivery(&url, delivery);
        }
        ClientAction::Launch { url } => {
            let mut relay = RelayClient::connect(socket_path, Role::Source).await?;
            let delivery = relay.launch(&url).await?;
            format::print_delivery(&url, delivery);
        }
        ClientAction::Initial => {
            let mut relay = RelayClient::connect(socket_path, Role::Runtime).await?;
            let url = relay.get_initial_deep_link().await?;
            format::print_initial(url.as_deref());
        }
        ClientAction::Status => {
            let mut relay = RelayClient::connect(socket_path, Role::Client).await?;
            let status = relay.status().await?;
            format::print_status(&status);
        }
    }
    Ok(())
}
