//! Relay client shared by the CLI commands and the listener.
//!
//! Connects to the daemon under a given role, performs the handshake,
//! and provides one method per request. Deep link events that arrive
//! while a response is awaited are kept in a backlog so the listener
//! sees them in arrival order.

use std::collections::VecDeque;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::LengthPrefixedCodec;
use crate::ipc::protocol::{Delivery, Message, PROTOCOL_VERSION, RelayStatus, Role, Status};

use super::ClientError;

pub struct RelayClient {
    framed: Framed<UnixStream, LengthPrefixedCodec>,
    next_id: u32,
    backlog: VecDeque<String>,
}

impl RelayClient {
    /// Connect to the daemon and perform the handshake.
    pub async fn connect(socket_path: &Path, role: Role) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            ClientError::Broker(format!("connect {}: {e}", socket_path.display()))
        })?;
        let mut framed = Framed::new(stream, LengthPrefixedCodec::new());

        framed
            .send(Message::Hello {
                id: 0,
                version: PROTOCOL_VERSION,
                role,
            })
            .await
            .map_err(|e| ClientError::Broker(format!("send hello: {e}")))?;

        match framed.next().await {
            Some(Ok(Message::HelloAck {
                status: Status::Ok, ..
            })) => {}
            Some(Ok(Message::HelloAck {
                status: Status::Error,
                error,
                ..
            })) => {
                return Err(ClientError::Broker(format!(
                    "handshake rejected: {}",
                    error.unwrap_or_default()
                )));
            }
            other => {
                return Err(ClientError::Broker(format!(
                    "unexpected handshake response: {other:?}"
                )));
            }
        }

        Ok(Self {
            framed,
            next_id: 1, // 0 = Hello
            backlog: VecDeque::new(),
        })
    }

    /// Report a new intent URL.
    pub async fn notify(&mut self, url: &str) -> Result<Delivery, ClientError> {
        let id = self.next_id();
        let response = self
            .request(Message::Notify {
                id,
                url: Some(url.to_string()),
            })
            .await?;
        expect_delivery("notify", response)
    }

    /// Report the cold-start intent URL.
    pub async fn launch(&mut self, url: &str) -> Result<Delivery, ClientError> {
        let id = self.next_id();
        let response = self
            .request(Message::Launch {
                id,
                url: Some(url.to_string()),
            })
            .await?;
        expect_delivery("launch", response)
    }

    pub async fn add_listener(&mut self) -> Result<(), ClientError> {
        let id = self.next_id();
        let response = self.request(Message::AddListener { id }).await?;
        expect_ok("add_listener", response)
    }

    pub async fn remove_listener(&mut self) -> Result<(), ClientError> {
        let id = self.next_id();
        let response = self.request(Message::RemoveListener { id }).await?;
        expect_ok("remove_listener", response)
    }

    /// `getInitialDeepLink`: the link that arrived before this runtime
    /// was ready, if any.
    pub async fn get_initial_deep_link(&mut self) -> Result<Option<String>, ClientError> {
        let id = self.next_id();
        match self.request(Message::GetInitialDeepLink { id }).await? {
            Message::Response {
                status: Status::Ok,
                url,
                ..
            } => Ok(url),
            Message::Response { error, message, .. } => Err(ClientError::Rejected {
                code: error.unwrap_or_default(),
                message: message.unwrap_or_default(),
            }),
            other => Err(ClientError::Broker(format!(
                "unexpected getInitialDeepLink response: {other:?}"
            ))),
        }
    }

    pub async fn status(&mut self) -> Result<RelayStatus, ClientError> {
        let id = self.next_id();
        match self.request(Message::QueryStatus { id }).await? {
            Message::Response {
                status: Status::Ok,
                relay: Some(relay),
                ..
            } => Ok(relay),
            Message::Response { error, .. } => Err(ClientError::Broker(format!(
                "status failed: {}",
                error.unwrap_or_default()
            ))),
            other => Err(ClientError::Broker(format!(
                "unexpected status response: {other:?}"
            ))),
        }
    }

    /// Wait for the next deep link event.
    ///
    /// Returns `Ok(None)` when the daemon closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<String>, ClientError> {
        if let Some(url) = self.backlog.pop_front() {
            return Ok(Some(url));
        }
        loop {
            match self.framed.next().await {
                Some(Ok(Message::DeepLinkReceived { url, .. })) => return Ok(Some(url)),
                Some(Ok(other)) => {
                    tracing::debug!(message = ?other, "ignoring unsolicited message");
                }
                Some(Err(e)) => return Err(ClientError::Broker(format!("receive: {e}"))),
                None => return Ok(None),
            }
        }
    }

    /// Send a request and wait for the response with the same id,
    /// setting aside events that arrive in between.
    async fn request(&mut self, request: Message) -> Result<Message, ClientError> {
        let id = request.id();
        self.framed
            .send(request)
            .await
            .map_err(|e| ClientError::Broker(format!("send: {e}")))?;

        loop {
            match self.framed.next().await {
                Some(Ok(Message::DeepLinkReceived { url, .. })) => self.backlog.push_back(url),
                Some(Ok(msg @ Message::Response { .. })) if msg.id() == id => return Ok(msg),
                Some(Ok(other)) => {
                    return Err(ClientError::Broker(format!(
                        "unexpected message while waiting for {id}: {other:?}"
                    )));
                }
                Some(Err(e)) => return Err(ClientError::Broker(format!("receive: {e}"))),
                None => return Err(ClientError::Broker("connection closed by relay".into())),
            }
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

fn expect_delivery(op: &str, response: Message) -> Result<Delivery, ClientError> {
    match response {
        Message::Response {
            status: Status::Ok,
            delivery: Some(delivery),
            ..
        } => Ok(delivery),
        Message::Response { error, .. } => Err(ClientError::Broker(format!(
            "{op} failed: {}",
            error.unwrap_or_default()
        ))),
        other => Err(ClientError::Broker(format!(
            "unexpected {op} response: {other:?}"
        ))),
    }
}

fn expect_ok(op: &str, response: Message) -> Result<(), ClientError> {
    match response {
        Message::Response {
            status: Status::Ok, ..
        } => Ok(()),
        Message::Response { error, .. } => Err(ClientError::Broker(format!(
            "{op} failed: {}",
            error.unwrap_or_default()
        ))),
        other => Err(ClientError::Broker(format!(
            "unexpected {op} response: {other:?}"
        ))),
    }
}
