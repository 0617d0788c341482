//! Relay daemon — hosts the deep link relay behind a Unix socket.
//!
//! Activation sources report URLs, the runtime attaches a listener and
//! drains the initial link; the daemon reconciles the two timelines.
//!
//! Architecture: channel-based actor. A single broker loop owns all
//! mutable state ([`state::BrokerState`]). Per-connection tasks
//! forward commands via mpsc channels. Deep link events are routed to
//! the listener's connection via per-connection channels.

mod connection;
mod handler;
mod launch;
pub mod state;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use connection::{BrokerCommand, DisconnectNotice};
use state::{BrokerState, ConnectionId, EmitAction};

use crate::config::BrokerConfig;
use crate::ipc::protocol::Message;
use crate::relay::DeepLinkEvent;

/// Broker startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("socket path {0} has no parent directory")]
    NoParent(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type EventSenders = HashMap<ConnectionId, mpsc::UnboundedSender<Message>>;

/// Run the daemon until SIGTERM or SIGINT.
///
/// - Socket directory created with mode 0700
/// - Stale socket detection and cleanup
/// - SIGTERM/SIGINT → graceful shutdown, socket file removed
/// - All state in-memory only (lost on exit)
pub async fn run(config: BrokerConfig) -> Result<(), BrokerError> {
    let socket_path = config.socket_path.clone();
    let listener = bind_socket(&socket_path).await?;

    tracing::info!(
        path = %socket_path.display(),
        intent_file = ?config.intent_file,
        "relay listening"
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    };

    serve(listener, BrokerState::new(config.intent_file), shutdown).await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, path = %socket_path.display(), "failed to remove socket");
    }

    tracing::info!("relay stopped");
    Ok(())
}

/// The broker loop: accept connections, apply commands to `state`,
/// route events, until `shutdown` resolves.
async fn serve(listener: UnixListener, mut state: BrokerState, shutdown: impl Future<Output = ()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<BrokerCommand>();
    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel::<DisconnectNotice>();
    let mut event_senders: EventSenders = HashMap::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // -- New connection --
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        accept_connection(stream, &cmd_tx, &disconnect_tx, &mut event_senders);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }

            // -- Command from connection task --
            Some(cmd) = cmd_rx.recv() => {
                let (response, emit) =
                    handler::handle_message(&mut state, cmd.request, cmd.connection_id);
                let _ = cmd.response_tx.send(response);

                if let Some(action) = emit {
                    if let Err(undelivered) = dispatch_event(&event_senders, action) {
                        let outcome = state.requeue(undelivered);
                        tracing::warn!(
                            outcome = outcome.as_str(),
                            "listener gone before delivery, link kept for drain"
                        );
                    }
                }
            }

            // -- Connection disconnected --
            Some(notice) = disconnect_rx.recv() => {
                handle_disconnect(&mut state, &mut event_senders, notice);
            }

            () = &mut shutdown => break,
        }
    }
}

/// Clean up after a closed connection, parking any events it never
/// wrote before its relay generation is torn down.
fn handle_disconnect(state: &mut BrokerState, senders: &mut EventSenders, notice: DisconnectNotice) {
    let conn_id = notice.connection_id;
    senders.remove(&conn_id);
    for url in notice.undelivered {
        let outcome = state.requeue(EmitAction {
            target_connection: conn_id,
            event: DeepLinkEvent { url },
        });
        tracing::warn!(
            ?conn_id,
            outcome = outcome.as_str(),
            "listener closed before delivery, link kept for drain"
        );
    }
    state.remove_connection(conn_id);
    tracing::debug!(?conn_id, "connection cleaned up");
}

/// Accept a new connection — create channels and spawn handler task.
fn accept_connection(
    stream: UnixStream,
    cmd_tx: &mpsc::UnboundedSender<BrokerCommand>,
    disconnect_tx: &mpsc::UnboundedSender<DisconnectNotice>,
    event_senders: &mut EventSenders,
) {
    let conn_id = ConnectionId::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    event_senders.insert(conn_id, event_tx);

    connection::spawn_connection(
        stream,
        conn_id,
        cmd_tx.clone(),
        event_rx,
        disconnect_tx.clone(),
    );

    tracing::debug!(?conn_id, "accepted connection");
}

/// Push a deep link event to the listener's connection task.
///
/// Hands the action back if the connection is already gone so the
/// caller can park the link instead of losing it.
fn dispatch_event(senders: &EventSenders, action: EmitAction) -> Result<(), EmitAction> {
    let Some(tx) = senders.get(&action.target_connection) else {
        return Err(action);
    };
    let message = Message::DeepLinkReceived {
        id: 0,
        url: action.event.url.clone(),
    };
    if tx.send(message).is_err() {
        return Err(action);
    }
    tracing::debug!(
        event = crate::relay::DEEP_LINK_EVENT,
        conn_id = ?action.target_connection,
        "event pushed to listener"
    );
    Ok(())
}

// -- Socket setup --

/// Create the socket directory and bind the Unix listener.
///
/// Handles stale socket detection: if EADDRINUSE, attempts to connect
/// to the existing socket. If the connection succeeds, another daemon
/// is running. If it fails, the socket is stale and is removed.
async fn bind_socket(path: &Path) -> Result<UnixListener, BrokerError> {
    let parent = path
        .parent()
        .ok_or_else(|| BrokerError::NoParent(path.to_path_buf()))?;
    // A bare file name binds in the working directory.
    if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent).map_err(|e| BrokerError::MkdirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| BrokerError::MkdirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                },
            )?;
        }
    }

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(BrokerError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(|e| BrokerError::BindFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
            UnixListener::bind(path).map_err(|e| BrokerError::BindFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(BrokerError::BindFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Start a broker on `path` for the lifetime of the test runtime.
#[cfg(test)]
pub(crate) async fn spawn_for_test(path: &Path, intent_file: Option<PathBuf>) {
    let listener = bind_socket(path).await.expect("bind test socket");
    tokio::spawn(serve(
        listener,
        BrokerState::new(intent_file),
        std::future::pending(),
    ));
}
