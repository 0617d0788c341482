//! Message dispatch and request handling.
//!
//! Pure logic — no I/O. Each handler takes a mutable reference to
//! [`BrokerState`] and returns a response message plus an optional
//! [`EmitAction`] when a link must be pushed to the attached listener.

use crate::ipc::protocol::{Delivery, Message, PROTOCOL_VERSION, Role, Status};
use crate::relay::NotifyOutcome;

use super::state::{BrokerState, ConnectionId, EmitAction};

/// Dispatch a request message to the appropriate handler.
///
/// Returns `(response, optional_emit_action)`. The broker loop sends
/// the response back to the requesting connection and, if present,
/// pushes the event to the listener's connection.
///
/// Enforces:
/// - `hello` only before the handshake completes
/// - Role-based access: a message outside the connection's role gets
///   `unknown_type`
/// - Server-originated variants → `unknown_type`
pub fn handle_message(
    state: &mut BrokerState,
    request: Message,
    connection_id: ConnectionId,
) -> (Message, Option<EmitAction>) {
    match request {
        Message::Hello { id, .. } if state.is_registered(connection_id) => {
            tracing::debug!(?connection_id, "hello after handshake rejected");
            (error_response(id, "unknown_type"), None)
        }
        Message::Hello { id, version, role } => {
            let response = handle_hello(state, id, version, role, connection_id);
            (response, None)
        }
        // -- Activation source --
        Message::Notify { id, url } => {
            if !has_role(state, connection_id, Role::Source) {
                return (error_response(id, "unknown_type"), None);
            }
            let (outcome, action) = state.notify(url.as_deref());
            log_delivery("notify", url.as_deref(), outcome);
            (delivery_response(id, outcome), action)
        }
        Message::Launch { id, url } => {
            if !has_role(state, connection_id, Role::Source) {
                return (error_response(id, "unknown_type"), None);
            }
            let (outcome, action) = state.launch(url.as_deref());
            log_delivery("launch", url.as_deref(), outcome);
            (delivery_response(id, outcome), action)
        }
        // -- Runtime --
        Message::AddListener { id } => {
            if !has_role(state, connection_id, Role::Runtime) {
                return (error_response(id, "unknown_type"), None);
            }
            state.attach_listener(connection_id);
            tracing::info!(?connection_id, "listener attached");
            (ok_response(id), None)
        }
        Message::RemoveListener { id } => {
            if !has_role(state, connection_id, Role::Runtime) {
                return (error_response(id, "unknown_type"), None);
            }
            if state.detach_listener(connection_id) {
                tracing::info!(?connection_id, "listener removed");
            }
            (ok_response(id), None)
        }
        Message::GetInitialDeepLink { id } => {
            if !has_role(state, connection_id, Role::Runtime) {
                return (error_response(id, "unknown_type"), None);
            }
            (handle_get_initial(state, id), None)
        }
        // -- Any role --
        Message::QueryStatus { id } => {
            let response = Message::Response {
                id,
                status: Status::Ok,
                error: None,
                message: None,
                url: None,
                delivery: None,
                relay: Some(state.status()),
            };
            (response, None)
        }
        // Server-originated messages should never be sent by clients.
        Message::HelloAck { id, .. }
        | Message::Response { id, .. }
        | Message::DeepLinkReceived { id, .. } => (error_response(id, "unknown_type"), None),
    }
}

// -- Individual handlers --

fn handle_hello(
    state: &mut BrokerState,
    id: u32,
    version: u32,
    role: Role,
    connection_id: ConnectionId,
) -> Message {
    if id != 0 {
        return Message::HelloAck {
            id: 0,
            status: Status::Error,
            error: Some("invalid_hello_id".into()),
        };
    }
    if version != PROTOCOL_VERSION {
        return Message::HelloAck {
            id: 0,
            status: Status::Error,
            error: Some("version_mismatch".into()),
        };
    }
    if let Some(generation) = state.add_connection(connection_id, role) {
        tracing::info!(?connection_id, generation, "runtime attached, relay installed");
    }
    Message::HelloAck {
        id: 0,
        status: Status::Ok,
        error: None,
    }
}

fn handle_get_initial(state: &mut BrokerState, id: u32) -> Message {
    match state.drain_initial() {
        Ok(url) => {
            if let Some(url) = &url {
                tracing::info!(url = %url, "initial deep link drained");
            }
            Message::Response {
                id,
                status: Status::Ok,
                error: None,
                message: None,
                url,
                delivery: None,
                relay: None,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "initial deep link retrieval failed");
            Message::Response {
                id,
                status: Status::Error,
                error: Some(e.code().into()),
                message: Some(e.to_string()),
                url: None,
                delivery: None,
                relay: None,
            }
        }
    }
}

// -- Helpers --

fn has_role(state: &BrokerState, connection_id: ConnectionId, role: Role) -> bool {
    state.connection_role(connection_id) == Some(role)
}

fn log_delivery(kind: &str, url: Option<&str>, outcome: NotifyOutcome) {
    match outcome {
        NotifyOutcome::Ignored => tracing::debug!(kind, "empty deep link ignored"),
        NotifyOutcome::Emitted => {
            tracing::info!(kind, url = url.unwrap_or_default(), "deep link delivered to listener");
        }
        NotifyOutcome::Buffered { replaced } => {
            tracing::info!(kind, url = url.unwrap_or_default(), replaced, "deep link buffered");
        }
    }
}

fn delivery_response(id: u32, outcome: NotifyOutcome) -> Message {
    let delivery = match outcome {
        NotifyOutcome::Ignored => Delivery::Ignored,
        NotifyOutcome::Emitted => Delivery::Emitted,
        NotifyOutcome::Buffered { replaced: false } => Delivery::Buffered,
        NotifyOutcome::Buffered { replaced: true } => Delivery::Replaced,
    };
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        message: None,
        url: None,
        delivery: Some(delivery),
        relay: None,
    }
}

fn ok_response(id: u32) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        message: None,
        url: None,
        delivery: None,
        relay: None,
    }
}

pub(super) fn error_response(id: u32, reason: &str) -> Message {
    Message::Response {
        id,
        status: Status::Error,
        error: Some(reason.into()),
        message: None,
        url: None,
        delivery: None,
        relay: None,
    }
}
