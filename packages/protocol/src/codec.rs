//! Binary encode / decode plus runtime validation of incoming frames.
//!
//! Decoding is split from validation on purpose. An incoming frame is first
//! decoded best-effort into a loose [`serde_json::Value`] (msgpack for binary
//! frames, JSON as the text fallback); the guard constructors on
//! [`ServerMessage`] and [`RelayPayload`] then decide whether the value
//! matches a shape this client trusts. Decode failures and unrecognized
//! shapes both degrade to `None`. Nothing in this module panics or errors
//! on network input, since any peer in the room may send frames for a
//! protocol this client does not speak.

use serde_json::Value;

use crate::types::{ChatReplyTo, ClientMessage, RelayChat, RelayPayload, ServerMessage};

/// Errors produced when serializing an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// msgpack serialization failed
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode an outbound message to a msgpack frame.
///
/// Maps are string-keyed (`to_vec_named`) so the relay and non-Rust peers
/// see ordinary objects rather than positional tuples.
pub fn encode_message(message: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decode a binary frame into a loose value. `None` on any malformed input.
pub fn decode_frame(data: &[u8]) -> Option<Value> {
    rmp_serde::from_slice(data).ok()
}

/// Decode a text frame (legacy JSON fallback path; never used for encoding).
pub fn decode_text(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Accept integer or float encodings of a millisecond timestamp.
fn as_millis(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)?.as_str().map(str::to_owned)
}

impl ServerMessage {
    /// Validation guard: `Some` only when the value matches one of the
    /// server-originated message shapes. Everything else is unknown and must
    /// be dropped by the caller without effect.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v.get("type")?.as_str()? {
            "welcome" => {
                let player_id = string_field(v, "playerId")?;
                // Non-string elements are skipped rather than failing the
                // whole handshake.
                let peers = v
                    .get("peers")?
                    .as_array()?
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_owned))
                    .collect();
                Some(Self::Welcome { player_id, peers })
            }
            "peer_joined" => Some(Self::PeerJoined {
                peer_id: string_field(v, "peerId")?,
            }),
            "peer_left" => Some(Self::PeerLeft {
                peer_id: string_field(v, "peerId")?,
            }),
            "relay" => Some(Self::Relay {
                from: string_field(v, "from")?,
                data: v.get("data").cloned().unwrap_or(Value::Null),
            }),
            "pong" => Some(Self::Pong {
                nonce: string_field(v, "nonce")?,
                server_time: as_millis(v.get("serverTime")?)?,
            }),
            "error" => Some(Self::Error {
                code: string_field(v, "code")?,
                message: string_field(v, "message")?,
            }),
            _ => None,
        }
    }
}

impl RelayPayload {
    /// Validation guard for the opaque `data` mapping of a relay frame.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v.get("type")?.as_str()? {
            "announce" => Some(Self::Announce {
                username: string_field(v, "username")?,
            }),
            "chat" => Some(Self::Chat(RelayChat {
                id: string_field(v, "id"),
                text: string_field(v, "text")?,
                username: string_field(v, "username"),
                timestamp: as_millis(v.get("timestamp")?)?,
                reply_to: v.get("replyTo").and_then(parse_reply_to),
            })),
            _ => None,
        }
    }
}

/// A malformed quote is treated as absent rather than failing the payload.
fn parse_reply_to(v: &Value) -> Option<ChatReplyTo> {
    serde_json::from_value(v.clone()).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::PROTOCOL_VERSION;

    #[test]
    fn test_encode_chat_roundtrips_through_decode() {
        // テスト項目: chat メッセージがエンコード後に同じ形でデコードされる
        // given (前提条件):
        let message = ClientMessage::Chat {
            id: "msg_1_1000".to_string(),
            text: "hello".to_string(),
            username: "alice".to_string(),
            timestamp: 1000,
            reply_to: Some(ChatReplyTo {
                id: "msg_0_900".to_string(),
                text: "hi".to_string(),
                username: "bob".to_string(),
            }),
        };

        // when (操作):
        let bytes = encode_message(&message).unwrap();
        let value = decode_frame(&bytes).unwrap();

        // then (期待する結果):
        assert_eq!(value["type"], "chat");
        assert_eq!(value["id"], "msg_1_1000");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["timestamp"], 1000);
        assert_eq!(value["replyTo"]["username"], "bob");
    }

    #[test]
    fn test_encode_hello_uses_camel_case_field() {
        // テスト項目: hello メッセージの protocolVersion が camelCase で出力される
        // given (前提条件):
        let message = ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
        };

        // when (操作):
        let value = decode_frame(&encode_message(&message).unwrap()).unwrap();

        // then (期待する結果):
        assert_eq!(value["type"], "hello");
        assert_eq!(value["protocolVersion"], 1);
    }

    #[test]
    fn test_encode_chat_without_reply_omits_reply_to_key() {
        // テスト項目: 返信なしの chat メッセージに replyTo キーが含まれない
        // given (前提条件):
        let message = ClientMessage::Chat {
            id: "msg_2_1000".to_string(),
            text: "no reply".to_string(),
            username: "alice".to_string(),
            timestamp: 1000,
            reply_to: None,
        };

        // when (操作):
        let value = decode_frame(&encode_message(&message).unwrap()).unwrap();

        // then (期待する結果):
        assert!(value.get("replyTo").is_none());
    }

    #[test]
    fn test_decode_garbage_bytes_never_panics() {
        // テスト項目: 不正なバイト列のデコードが panic せず None になる
        // given (前提条件):
        // 0xc1 is a reserved, never-used msgpack marker
        let garbage: &[u8] = &[0xc1, 0xff, 0x00, 0x13, 0x37];

        // when (操作):
        let result = decode_frame(garbage);

        // then (期待する結果):
        assert!(result.is_none());
    }

    #[test]
    fn test_decoded_non_object_is_rejected_by_guards() {
        // テスト項目: オブジェクトでないデコード結果が全てのガードで拒否される
        // given (前提条件):
        // a bare msgpack integer decodes fine but matches no message shape
        let bytes = rmp_serde::to_vec(&42i32).unwrap();

        // when (操作):
        let value = decode_frame(&bytes).unwrap();

        // then (期待する結果):
        assert!(ServerMessage::from_value(&value).is_none());
        assert!(RelayPayload::from_value(&value).is_none());
    }

    #[test]
    fn test_decode_text_json_fallback() {
        // テスト項目: テキストフレームが JSON としてデコードされる
        // given (前提条件):
        let text = r#"{"type":"peer_left","peerId":"p9"}"#;

        // when (操作):
        let value = decode_text(text).unwrap();
        let message = ServerMessage::from_value(&value);

        // then (期待する結果):
        assert_eq!(
            message,
            Some(ServerMessage::PeerLeft {
                peer_id: "p9".to_string()
            })
        );
    }

    #[test]
    fn test_welcome_guard_requires_player_id_and_peers() {
        // テスト項目: welcome ガードが playerId と peers を必須とする
        // given (前提条件):
        let valid = json!({ "type": "welcome", "playerId": "p1", "peers": ["p2", "p3"] });
        let missing_peers = json!({ "type": "welcome", "playerId": "p1" });
        let bad_player_id = json!({ "type": "welcome", "playerId": 7, "peers": [] });

        // when (操作):
        let parsed = ServerMessage::from_value(&valid);

        // then (期待する結果):
        assert_eq!(
            parsed,
            Some(ServerMessage::Welcome {
                player_id: "p1".to_string(),
                peers: vec!["p2".to_string(), "p3".to_string()],
            })
        );
        assert!(ServerMessage::from_value(&missing_peers).is_none());
        assert!(ServerMessage::from_value(&bad_player_id).is_none());
    }

    #[test]
    fn test_welcome_guard_skips_non_string_peers() {
        // テスト項目: peers 配列内の文字列でない要素がスキップされる
        // given (前提条件):
        let value = json!({ "type": "welcome", "playerId": "p1", "peers": ["p2", 3, null] });

        // when (操作):
        let parsed = ServerMessage::from_value(&value);

        // then (期待する結果):
        assert_eq!(
            parsed,
            Some(ServerMessage::Welcome {
                player_id: "p1".to_string(),
                peers: vec!["p2".to_string()],
            })
        );
    }

    #[test]
    fn test_pong_guard_requires_nonce_and_server_time() {
        // テスト項目: pong ガードが nonce と serverTime を必須とする
        // given (前提条件):
        let valid = json!({ "type": "pong", "nonce": "n_1", "serverTime": 12345 });
        let float_time = json!({ "type": "pong", "nonce": "n_1", "serverTime": 12345.6 });
        let missing_nonce = json!({ "type": "pong", "serverTime": 12345 });

        // when (操作):
        let parsed = ServerMessage::from_value(&valid);

        // then (期待する結果):
        assert_eq!(
            parsed,
            Some(ServerMessage::Pong {
                nonce: "n_1".to_string(),
                server_time: 12345,
            })
        );
        // float encodings (JS Date.now interop) are accepted
        assert!(matches!(
            ServerMessage::from_value(&float_time),
            Some(ServerMessage::Pong {
                server_time: 12345,
                ..
            })
        ));
        assert!(ServerMessage::from_value(&missing_nonce).is_none());
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        // テスト項目: 未知の type を持つメッセージがガードで拒否される
        // given (前提条件):
        let value = json!({ "type": "snapshot", "tick": 42 });

        // when (操作):
        let parsed = ServerMessage::from_value(&value);

        // then (期待する結果):
        assert!(parsed.is_none());
    }

    #[test]
    fn test_relay_guard_requires_sender() {
        // テスト項目: relay ガードが from を必須とし data を透過する
        // given (前提条件):
        let valid = json!({ "type": "relay", "from": "p2", "data": { "type": "announce", "username": "bob" } });
        let missing_from = json!({ "type": "relay", "data": {} });

        // when (操作):
        let parsed = ServerMessage::from_value(&valid);

        // then (期待する結果):
        match parsed {
            Some(ServerMessage::Relay { from, data }) => {
                assert_eq!(from, "p2");
                assert_eq!(
                    RelayPayload::from_value(&data),
                    Some(RelayPayload::Announce {
                        username: "bob".to_string()
                    })
                );
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        assert!(ServerMessage::from_value(&missing_from).is_none());
    }

    #[test]
    fn test_chat_payload_guard_requires_text_and_timestamp() {
        // テスト項目: chat ペイロードガードが text と timestamp を必須とする
        // given (前提条件):
        let minimal = json!({ "type": "chat", "text": "hi", "timestamp": 1000 });
        let missing_timestamp = json!({ "type": "chat", "text": "hi" });

        // when (操作):
        let parsed = RelayPayload::from_value(&minimal);

        // then (期待する結果):
        match parsed {
            Some(RelayPayload::Chat(chat)) => {
                assert_eq!(chat.text, "hi");
                assert_eq!(chat.timestamp, 1000);
                assert!(chat.id.is_none());
                assert!(chat.username.is_none());
                assert!(chat.reply_to.is_none());
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
        assert!(RelayPayload::from_value(&missing_timestamp).is_none());
    }

    #[test]
    fn test_chat_payload_malformed_reply_is_dropped() {
        // テスト項目: 不正な replyTo を持つ chat ペイロードで引用のみ破棄される
        // given (前提条件):
        let value = json!({
            "type": "chat",
            "text": "hi",
            "timestamp": 1000,
            "replyTo": { "id": "x" }
        });

        // when (操作):
        let parsed = RelayPayload::from_value(&value);

        // then (期待する結果):
        match parsed {
            Some(RelayPayload::Chat(chat)) => assert!(chat.reply_to.is_none()),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }
}
