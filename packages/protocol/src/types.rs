//! Message shapes for the relay protocol.
//!
//! One top-level discriminant field `type` (snake_case); field names are
//! camelCase on the wire for compatibility with non-Rust peers.

use serde::{Deserialize, Serialize};

/// Protocol version carried by the `hello` handshake. The server validates
/// it out-of-band; acceptance is implied by the subsequent `welcome`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Truncated quote carried by a chat message that replies to another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReplyTo {
    pub id: String,
    pub text: String,
    pub username: String,
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Version announcement, sent once after the socket opens.
    Hello {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
    },
    /// Username announcement, sent after `welcome` and re-sent on every
    /// `peer_joined` so newcomers learn this client's display name.
    Announce { username: String },
    /// Chat message with an optional reply quote.
    Chat {
        id: String,
        text: String,
        username: String,
        timestamp: i64,
        #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
        reply_to: Option<ChatReplyTo>,
    },
    /// Keepalive ping; the server answers with `pong` (not relayed).
    Ping {
        nonce: String,
        #[serde(rename = "clientTime")]
        client_time: i64,
    },
}

/// Server → client messages. Produced only by the validation guard
/// [`ServerMessage::from_value`], never deserialized blindly.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake acceptance: the server-assigned id plus the ids already in
    /// the room.
    Welcome {
        player_id: String,
        peers: Vec<String>,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    /// A rebroadcast payload from another peer. `data` stays opaque until
    /// [`RelayPayload::from_value`] recognizes it.
    Relay {
        from: String,
        data: serde_json::Value,
    },
    Pong {
        nonce: String,
        server_time: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Recognized payloads inside a `relay` frame. Anything else in the room's
/// relay traffic (game snapshots, foreign protocols) is none of these and is
/// ignored by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayPayload {
    Announce { username: String },
    Chat(RelayChat),
}

/// Chat payload as carried over a relay frame. `id` and `username` are
/// optional on the wire; the receiver synthesizes fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayChat {
    pub id: Option<String>,
    pub text: String,
    pub username: Option<String>,
    pub timestamp: i64,
    pub reply_to: Option<ChatReplyTo>,
}
