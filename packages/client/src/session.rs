//! Connection driver: one task per session owns the socket lifecycle, the
//! heartbeat, the reconnect loop, and dispatch of validated server messages
//! into the stores.
//!
//! All session state transitions happen inside this task's `select!` loop,
//! so no two of them can run concurrently. Teardown is observed two ways:
//! the handle drops the outbound sender (the channel closing is the prompt
//! signal), and the generation check catches everything else, including a
//! driver that was asleep in its backoff window when it was superseded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use hiroba_protocol::{
    ClientMessage, PROTOCOL_VERSION, RelayChat, RelayPayload, ServerMessage, decode_frame,
    decode_text, encode_message,
};

use crate::client::{self, ConnectionStatus, PING_INTERVAL, Shared};
use crate::history::ChatEntry;
use crate::presence;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Why the per-socket loop ended.
enum SocketEnd {
    /// Transport failure or server-side close: schedule a reconnect.
    Lost,
    /// Explicit teardown (generation bump or closed command channel).
    Teardown,
}

/// The single outstanding heartbeat: nonce plus send instant. A new tick
/// always overwrites the previous one; an unanswered ping is abandoned, not
/// timed out.
struct PendingPing {
    nonce: String,
    sent_at: Instant,
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    generation: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let ws_url = format!(
        "{}/{}",
        shared.options.url,
        urlencoding::encode(&shared.options.room_id)
    );
    let mut attempt: u32 = 0;

    loop {
        if shared.is_stale(generation) {
            return;
        }

        match connect_async(ws_url.as_str()).await {
            Ok((stream, _response)) => {
                if shared.is_stale(generation) {
                    return;
                }
                tracing::info!("connected to {}", ws_url);
                attempt = 0;
                shared.set_status(ConnectionStatus::Connected);
                match drive_socket(&shared, generation, stream, &mut outbound_rx).await {
                    SocketEnd::Teardown => return,
                    SocketEnd::Lost => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to connect to {}: {}", ws_url, e);
            }
        }

        if shared.is_stale(generation) {
            return;
        }
        shared.set_status(ConnectionStatus::Disconnected);

        let delay = client::backoff_delay(attempt);
        attempt += 1;
        tracing::info!("reconnecting in {:?} (attempt {})", delay, attempt);
        if !wait_for_retry(&mut outbound_rx, delay).await || shared.is_stale(generation) {
            return;
        }
        shared.set_status(ConnectionStatus::Connecting);
    }
}

/// Sleep out the backoff window while draining (and dropping) outbound
/// messages: with no open socket, sends are discarded, never queued.
/// Returns `false` when the handle tore the session down.
async fn wait_for_retry(
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    delay: Duration,
) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => return true,
            queued = outbound_rx.recv() => match queued {
                Some(_) => continue,
                None => return false,
            },
        }
    }
}

/// Drive one open socket until it is lost or torn down.
async fn drive_socket(
    shared: &Arc<Shared>,
    generation: u64,
    stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> SocketEnd {
    let (mut sink, mut source) = stream.split();

    let hello = ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
    };
    if send_message(&mut sink, &hello).await.is_err() {
        return SocketEnd::Lost;
    }

    // First heartbeat fires one full interval after the socket opens.
    let mut heartbeat = time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending_ping: Option<PendingPing> = None;

    loop {
        // Every event first compares the captured generation against the
        // current one; a mismatch means this session has been superseded
        // and the event must have no observable effect.
        tokio::select! {
            queued = outbound_rx.recv() => match queued {
                Some(message) => {
                    if shared.is_stale(generation) {
                        return SocketEnd::Teardown;
                    }
                    if send_message(&mut sink, &message).await.is_err() {
                        return SocketEnd::Lost;
                    }
                }
                None => {
                    // disconnect(): best-effort close frame, then stop.
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketEnd::Teardown;
                }
            },
            _ = heartbeat.tick() => {
                if shared.is_stale(generation) {
                    return SocketEnd::Teardown;
                }
                let now = shared.clock.now_millis();
                let nonce = client::random_nonce(now);
                pending_ping = Some(PendingPing {
                    nonce: nonce.clone(),
                    sent_at: Instant::now(),
                });
                let ping = ClientMessage::Ping { nonce, client_time: now };
                if send_message(&mut sink, &ping).await.is_err() {
                    return SocketEnd::Lost;
                }
            },
            frame = source.next() => {
                if shared.is_stale(generation) {
                    return SocketEnd::Teardown;
                }
                match read_frame(frame) {
                    Ok(Some(value)) => match ServerMessage::from_value(&value) {
                        Some(message) => dispatch(shared, &mut pending_ping, message),
                        None => tracing::debug!("dropping unrecognized server message"),
                    },
                    Ok(None) => {}
                    Err(()) => return SocketEnd::Lost,
                }
            },
        }
    }
}

/// Decode one socket event into a loose value. `Ok(None)` is a frame to
/// ignore; `Err(())` means the socket is gone.
fn read_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<Option<serde_json::Value>, ()> {
    match frame {
        Some(Ok(Message::Binary(data))) => {
            let decoded = decode_frame(&data);
            if decoded.is_none() {
                tracing::debug!("dropping undecodable binary frame ({} bytes)", data.len());
            }
            Ok(decoded)
        }
        Some(Ok(Message::Text(text))) => {
            let decoded = decode_text(&text);
            if decoded.is_none() {
                tracing::debug!("dropping undecodable text frame");
            }
            Ok(decoded)
        }
        Some(Ok(Message::Close(_))) => {
            tracing::info!("server closed the connection");
            Err(())
        }
        // Transport-level ping/pong is answered by tungstenite itself.
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => {
            tracing::warn!("websocket read error: {}", e);
            Err(())
        }
        None => {
            tracing::info!("websocket stream ended");
            Err(())
        }
    }
}

/// Apply one validated server message to the session and the stores.
///
/// Deliberately synchronous: announces go out through the command queue
/// rather than the sink, so a dispatch never suspends halfway through its
/// store mutations.
fn dispatch(shared: &Arc<Shared>, pending_ping: &mut Option<PendingPing>, message: ServerMessage) {
    match message {
        ServerMessage::Welcome { player_id, peers } => {
            shared.set_local_player(Some(player_id.clone()));
            shared
                .presence
                .set_local_user(&player_id, &shared.options.username);
            let others: Vec<String> = peers
                .iter()
                .filter(|id| **id != player_id)
                .cloned()
                .collect();
            shared.presence.bulk_add_peers(&others);
            queue_announce(shared);
            shared
                .history
                .append_system(&format!("Connected to room. {} peer(s) online.", peers.len()));
        }
        ServerMessage::PeerJoined { peer_id } => {
            if shared.is_local_peer(&peer_id) {
                return;
            }
            shared.presence.add_peer(&peer_id);
            // Re-announce so the newcomer learns this client's username.
            queue_announce(shared);
            shared.history.append_system("A new user joined.");
        }
        ServerMessage::PeerLeft { peer_id } => {
            shared.presence.remove_peer(&peer_id);
            shared.history.append_system("A user left.");
        }
        ServerMessage::Relay { from, data } => {
            if shared.is_local_peer(&from) {
                return;
            }
            match RelayPayload::from_value(&data) {
                Some(RelayPayload::Announce { username }) => {
                    shared.presence.update_username(&from, &username);
                }
                Some(RelayPayload::Chat(chat)) => append_remote_chat(shared, &from, chat),
                // Foreign relay traffic (game snapshots etc.) is expected
                // in a shared room; dropped without effect.
                None => tracing::debug!("ignoring unrecognized relay payload from {}", from),
            }
        }
        ServerMessage::Pong { nonce, .. } => {
            if let Some(pending) = pending_ping.take() {
                if pending.nonce == nonce {
                    let rtt = pending.sent_at.elapsed().as_millis() as u64;
                    shared.set_rtt(Some(rtt));
                } else {
                    // Stray pong: keep waiting for the real answer.
                    *pending_ping = Some(pending);
                }
            }
        }
        ServerMessage::Error { code, message } => {
            tracing::warn!("server error {}: {}", code, message);
            shared
                .history
                .append_system(&format!("Server error: {}", message));
        }
    }
}

fn append_remote_chat(shared: &Shared, from: &str, chat: RelayChat) {
    let id = chat
        .id
        .unwrap_or_else(|| client::synthesize_remote_id(chat.timestamp));
    let username = chat
        .username
        .unwrap_or_else(|| presence::placeholder_name(from));
    shared.history.append_chat(ChatEntry {
        id,
        from: from.to_owned(),
        text: chat.text,
        username,
        timestamp: chat.timestamp,
        is_local: false,
        reply_to: chat.reply_to,
        is_system: false,
    });
}

fn queue_announce(shared: &Shared) {
    shared.try_queue(ClientMessage::Announce {
        username: shared.options.username.clone(),
    });
}

/// Encode and send one message. An encode failure is logged and swallowed
/// (not a transport fault); a transport failure is the caller's signal to
/// give the socket up.
async fn send_message(sink: &mut WsSink, message: &ClientMessage) -> Result<(), ()> {
    let bytes = match encode_message(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("failed to encode outbound message: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Binary(bytes.into())).await.map_err(|e| {
        tracing::warn!("websocket send failed: {}", e);
    })
}
