//! IPC codec and wire protocol — MessagePack framing over the relay
//! socket.

pub mod codec;
pub mod protocol;
