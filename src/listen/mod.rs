//! Runtime listener — attach, drain the initial link, stream the rest.
//!
//! Plays the runtime side of the relay: attaches a listener first and
//! only then asks for the initial link, so a URL reported between the
//! two calls is emitted live instead of slipping past both. A failed
//! initial retrieval is logged and treated as "no link"; it never takes
//! the listener down.

use std::future::Future;
use std::io::Write;
use std::path::Path;

use tokio::signal::unix::{SignalKind, signal};

use crate::client::{ClientError, RelayClient};
use crate::ipc::protocol::Role;

#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("relay closed the connection")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the listener until SIGINT/SIGTERM, printing one URL per line.
pub async fn run(socket_path: &Path) -> Result<(), ListenError> {
    let relay = RelayClient::connect(socket_path, Role::Runtime).await?;
    tracing::info!(path = %socket_path.display(), "connected to relay");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, detaching"),
            _ = sigint.recv() => tracing::info!("received SIGINT, detaching"),
        }
    };

    let mut stdout = std::io::stdout();
    listen(relay, shutdown, |url| {
        // A closed stdout is not worth tearing the listener down for.
        if let Err(e) = writeln!(stdout, "{url}").and_then(|()| stdout.flush()) {
            tracing::warn!(error = %e, "failed to write deep link");
        }
    })
    .await
}

/// Attach, drain, and hand every link to `on_link` until `shutdown`.
async fn listen<F>(
    mut relay: RelayClient,
    shutdown: impl Future<Output = ()>,
    mut on_link: F,
) -> Result<(), ListenError>
where
    F: FnMut(&str),
{
    relay.add_listener().await?;

    match relay.get_initial_deep_link().await {
        Ok(Some(url)) => {
            tracing::debug!(url = %url, "initial deep link");
            on_link(&url);
        }
        Ok(None) => {}
        Err(ClientError::Rejected { code, message }) => {
            tracing::error!(%code, %message, "error getting initial deep link");
        }
        Err(e) => return Err(e.into()),
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = relay.next_event() => match event? {
                Some(url) => {
                    tracing::debug!(url = %url, "deep link received");
                    on_link(&url);
                }
                None => return Err(ListenError::Disconnected),
            },
            () = &mut shutdown => break,
        }
    }

    // Best-effort: the relay also detaches us when the socket closes.
    if let Err(e) = relay.remove_listener().await {
        tracing::debug!(error = %e, "remove_listener failed");
    }
    Ok(())
}
