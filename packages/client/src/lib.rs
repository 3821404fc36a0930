//! WebSocket relay chat client.
//!
//! [`RelayClient`] owns one logical session against a payload-agnostic relay
//! server: connect/reconnect lifecycle, heartbeat with RTT measurement, and
//! dispatch of validated server messages into the room [`PresenceStore`] and
//! the bounded [`ChatHistory`]. Observers (the terminal shell, or anything
//! else) read the stores and the connection state through watch-channel
//! snapshots and never mutate them.

pub mod client;
pub mod error;
pub mod formatter;
pub mod history;
pub mod presence;

mod session;

pub use client::{
    ConnectionInfo, ConnectionStatus, RelayClient, RelayOptions, generate_message_id,
};
pub use error::ClientError;
pub use history::{ChatEntry, ChatHistory};
pub use hiroba_protocol::ChatReplyTo;
pub use presence::{OnlineUser, PresenceStore};
