//! Per-connection task — framed I/O, handshake, command forwarding.
//!
//! Each client connection spawns a tokio task that:
//! 1. Wraps the socket in a length-prefixed MessagePack codec.
//! 2. Reads the first message (must be `Hello`) and forwards it to
//!    the broker loop for handshake validation.
//! 3. Enters a select loop: forward requests to the broker loop,
//!    receive deep link events for unsolicited delivery.
//! 4. On disconnect, hands any deep link events it could not write
//!    back to the broker loop so they are parked instead of lost.

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Status};

use super::handler::error_response;
use super::state::ConnectionId;

/// Command sent from a connection task to the broker loop.
#[derive(Debug)]
pub struct BrokerCommand {
    pub request: Message,
    pub response_tx: oneshot::Sender<Message>,
    pub connection_id: ConnectionId,
}

/// Notification sent when a connection closes.
#[derive(Debug)]
pub struct DisconnectNotice {
    pub connection_id: ConnectionId,
    /// URLs of events queued for this connection but never written.
    pub undelivered: Vec<String>,
}

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be Hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("broker loop closed")]
    BrokerGone,
    #[error("response channel closed")]
    ResponseDropped,
}

/// Spawn a connection handler task.
///
/// The task runs until the client disconnects or a protocol error
/// occurs. On exit, a [`DisconnectNotice`] is sent to the broker loop.
pub fn spawn_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
    mut event_rx: mpsc::UnboundedReceiver<Message>,
    disconnect_tx: mpsc::UnboundedSender<DisconnectNotice>,
) {
    tokio::spawn(async move {
        let mut undelivered = Vec::new();
        if let Err(e) =
            handle_connection(stream, conn_id, cmd_tx, &mut event_rx, &mut undelivered).await
        {
            tracing::debug!(?conn_id, error = %e, "connection closed");
        }
        undelivered.extend(drain_undelivered(&mut event_rx));
        if !undelivered.is_empty() {
            tracing::debug!(?conn_id, count = undelivered.len(), "returning undelivered events");
        }
        // Always notify broker of disconnect for cleanup.
        let _ = disconnect_tx.send(DisconnectNotice {
            connection_id: conn_id,
            undelivered,
        });
    });
}

/// Close the event channel and collect the URLs still queued in it.
///
/// After this, the broker's sends to this connection fail and are
/// parked on its side.
fn drain_undelivered(event_rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    event_rx.close();
    let mut urls = Vec::new();
    while let Ok(msg) = event_rx.try_recv() {
        if let Message::DeepLinkReceived { url, .. } = msg {
            urls.push(url);
        }
    }
    urls
}

async fn handle_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
    event_rx: &mut mpsc::UnboundedReceiver<Message>,
    undelivered: &mut Vec<String>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // -- Handshake: first message must be Hello --
    let first_frame = framed
        .next()
        .await
        .ok_or(ConnectionError::HandshakeEof)??;

    let first_msg = match decode_frame(&first_frame) {
        DecodeResult::Ok(msg @ Message::Hello { .. }) => msg,
        DecodeResult::Ok(_) | DecodeResult::UnknownType(_) => {
            return Err(ConnectionError::NotHello);
        }
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    let response = send_command(&cmd_tx, first_msg, conn_id).await?;
    let rejected = matches!(
        response,
        Message::HelloAck {
            status: Status::Error,
            ..
        }
    );
    framed.send(response).await?;
    if rejected {
        return Ok(());
    }

    // -- Main loop: requests + event delivery --
    loop {
        tokio::select! {
            frame = framed.next() => {
                let raw = match frame {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => return Err(ConnectionError::Codec(e)),
                    None => return Ok(()), // Clean disconnect.
                };
                match decode_frame(&raw) {
                    DecodeResult::Ok(msg) => {
                        let response = send_command(&cmd_tx, msg, conn_id).await?;
                        framed.send(response).await?;
                    }
                    DecodeResult::UnknownType(envelope) => {
                        // Echo the id and keep the connection open.
                        framed.send(error_response(envelope.id, "unknown_type")).await?;
                    }
                    DecodeResult::Malformed(e) => {
                        return Err(ConnectionError::MalformedFrame(e));
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(msg) => {
                        let url = match &msg {
                            Message::DeepLinkReceived { url, .. } => Some(url.clone()),
                            _ => None,
                        };
                        if let Err(e) = framed.send(msg).await {
                            undelivered.extend(url);
                            return Err(e.into());
                        }
                    }
                    // Broker loop dropped our event sender; shutting down.
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Send a command to the broker loop and wait for the response.
async fn send_command(
    cmd_tx: &mpsc::UnboundedSender<BrokerCommand>,
    request: Message,
    conn_id: ConnectionId,
) -> Result<Message, ConnectionError> {
    let (response_tx, response_rx) = oneshot::channel();
    cmd_tx
        .send(BrokerCommand {
            request,
            response_tx,
            connection_id: conn_id,
        })
        .map_err(|_| ConnectionError::BrokerGone)?;
    response_rx
        .await
        .map_err(|_| ConnectionError::ResponseDropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_events_are_collected_on_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Message::DeepLinkReceived {
            id: 0,
            url: "app://queued".into(),
        })
        .unwrap();

        assert_eq!(drain_undelivered(&mut rx), vec!["app://queued".to_string()]);
        // Closed: later sends fail so the broker parks the link itself.
        assert!(
            tx.send(Message::DeepLinkReceived {
                id: 0,
                url: "app://late".into(),
            })
            .is_err()
        );
    }

    #[tokio::test]
    async fn event_queued_when_client_hangs_up_is_returned() {
        let (client, server) = UnixStream::pair().unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();

        // Queue the event and hang up before the task ever runs.
        event_tx
            .send(Message::DeepLinkReceived {
                id: 0,
                url: "app://in-flight".into(),
            })
            .unwrap();
        drop(client);

        let conn_id = ConnectionId::new();
        spawn_connection(server, conn_id, cmd_tx, event_rx, disconnect_tx);

        let notice = disconnect_rx.recv().await.unwrap();
        assert_eq!(notice.connection_id, conn_id);
        assert_eq!(notice.undelivered, vec!["app://in-flight".to_string()]);
        assert!(cmd_rx.try_recv().is_err());
    }
}
