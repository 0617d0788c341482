//! Wire protocol message types for relay IPC.
//!
//! All messages are MessagePack-encoded maps with at minimum `type` and
//! `id` fields. The runtime-facing names (`getInitialDeepLink`,
//! `onRowtDeepLinkReceived`) are kept verbatim from the module
//! contract; everything else is snake_case.

use serde::{Deserialize, Serialize};

/// All wire protocol messages.
///
/// Serialized as a tagged union on the `type` field via MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello { id: u32, version: u32, role: Role },

    #[serde(rename = "hello_ack")]
    HelloAck {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Activation source --
    /// New intent while the app is running.
    #[serde(rename = "notify")]
    Notify {
        id: u32,
        #[serde(default)]
        url: Option<String>,
    },

    /// Initial intent at cold start.
    #[serde(rename = "launch")]
    Launch {
        id: u32,
        #[serde(default)]
        url: Option<String>,
    },

    // -- Runtime --
    #[serde(rename = "add_listener")]
    AddListener { id: u32 },

    #[serde(rename = "remove_listener")]
    RemoveListener { id: u32 },

    #[serde(rename = "getInitialDeepLink")]
    GetInitialDeepLink { id: u32 },

    // -- Query --
    #[serde(rename = "status")]
    QueryStatus { id: u32 },

    // -- Unsolicited event (relay → runtime) --
    #[serde(rename = "onRowtDeepLinkReceived")]
    DeepLinkReceived { id: u32, url: String },

    // -- Generic response --
    #[serde(rename = "response")]
    Response {
        id: u32,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Human-readable detail accompanying `error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delivery: Option<Delivery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relay: Option<RelayStatus>,
    },
}

impl Message {
    /// Request/response correlation id.
    pub fn id(&self) -> u32 {
        match self {
            Self::Hello { id, .. }
            | Self::HelloAck { id, .. }
            | Self::Notify { id, .. }
            | Self::Launch { id, .. }
            | Self::AddListener { id }
            | Self::RemoveListener { id }
            | Self::GetInitialDeepLink { id }
            | Self::QueryStatus { id }
            | Self::DeepLinkReceived { id, .. }
            | Self::Response { id, .. } => *id,
        }
    }
}

/// Client role in the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// OS activation source: reports URLs.
    Source,
    /// Scripting runtime: listens for links and drains the initial one.
    Runtime,
    /// Observer: status queries only.
    Client,
}

/// Response status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// How a `notify` or `launch` was routed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Ignored,
    Emitted,
    Buffered,
    /// Buffered, and an older unconsumed link was dropped.
    Replaced,
}

/// Relay state returned in `status` responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayStatus {
    pub module: String,
    /// Installed relay generation, absent when no runtime is connected.
    #[serde(default)]
    pub generation: Option<u64>,
    #[serde(default)]
    pub pending: Option<String>,
    #[serde(default)]
    pub launch: Option<String>,
    pub listener_attached: bool,
}

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (64 KiB). Far above any real URL.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Minimal envelope for extracting `{type, id}` from unknown messages.
///
/// Used by the broker as a fallback when [`Message`] deserialization
/// fails (e.g., unknown `type` tag), so the error response can echo
/// the request `id`.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    /// Consumed by serde for structural matching; not read by broker code.
    #[serde(rename = "type")]
    #[allow(dead_code)]
    pub msg_type: String,
    pub id: u32,
}
