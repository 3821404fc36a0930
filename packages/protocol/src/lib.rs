//! Wire protocol for the Hiroba relay chat client.
//!
//! The relay server is payload-agnostic: it wraps arbitrary msgpack payloads
//! in `{ type: "relay", from: <playerId>, data: <original> }` and rebroadcasts
//! them to the other peers in a room. This crate defines the message shapes
//! this client speaks, the binary codec, and the runtime validation guards
//! that decide whether an incoming frame can be trusted.

pub mod codec;
pub mod types;

pub use codec::{ProtocolError, decode_frame, decode_text, encode_message};
pub use types::{
    ChatReplyTo, ClientMessage, PROTOCOL_VERSION, RelayChat, RelayPayload, ServerMessage,
};
