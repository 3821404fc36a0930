//! Relay client handle: session lifecycle, chat submission, and the
//! observable connection state.
//!
//! The handle itself holds no socket. `connect()` spawns a driver task (see
//! [`crate::session`]) that owns the socket, the heartbeat and the reconnect
//! loop; the handle and the driver share [`Shared`]. A monotonically
//! increasing generation counter invalidates drivers from superseded
//! sessions: every driver captures the generation at spawn and exits as soon
//! as it observes a newer one, which is the sole mechanism preventing a
//! stale socket from mutating current state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};

use hiroba_protocol::{ChatReplyTo, ClientMessage};
use hiroba_shared::time::{Clock, SystemClock};

use crate::error::ClientError;
use crate::history::{ChatEntry, ChatHistory};
use crate::presence::PresenceStore;
use crate::session;

/// Chat text above this length is rejected at the call boundary.
pub const MAX_CHAT_LENGTH: usize = 500;
/// Reply quotes are truncated to this many characters.
pub const REPLY_QUOTE_LENGTH: usize = 100;

pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(5);

const RECONNECT_BASE_MS: u64 = 250;
const RECONNECT_CAP_MS: u64 = 10_000;
const RECONNECT_JITTER_MS: u64 = 250;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection state: status plus the last measured round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    /// `None` until the first pong of the session is matched.
    pub rtt_ms: Option<u64>,
}

/// Options for one relay client.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Relay base URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Room to join; URL-encoded into the connection path.
    pub room_id: String,
    /// Display name announced to peers.
    pub username: String,
}

/// State shared between the handle and the driver task.
pub(crate) struct Shared {
    pub(crate) options: RelayOptions,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) presence: Arc<PresenceStore>,
    pub(crate) history: Arc<ChatHistory>,
    generation: AtomicU64,
    status_tx: watch::Sender<ConnectionInfo>,
    local_player_id: Mutex<Option<String>>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Shared {
    /// A driver whose captured generation no longer matches has been
    /// superseded or torn down and must not touch any state.
    pub(crate) fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_modify(|info| info.status = status);
    }

    /// Publish a new round trip measurement; status is left unchanged but
    /// subscribers are still notified.
    pub(crate) fn set_rtt(&self, rtt_ms: Option<u64>) {
        self.status_tx.send_modify(|info| info.rtt_ms = rtt_ms);
    }

    pub(crate) fn set_local_player(&self, player_id: Option<String>) {
        *self
            .local_player_id
            .lock()
            .expect("local player id lock poisoned") = player_id;
    }

    pub(crate) fn is_local_peer(&self, player_id: &str) -> bool {
        self.local_player_id
            .lock()
            .expect("local player id lock poisoned")
            .as_deref()
            == Some(player_id)
    }

    fn local_player(&self) -> Option<String> {
        self.local_player_id
            .lock()
            .expect("local player id lock poisoned")
            .clone()
    }

    /// Queue a wire message for the live session. Fire-and-forget: dropped
    /// silently when no session is live or the socket is not open.
    pub(crate) fn try_queue(&self, message: ClientMessage) {
        if let Some(tx) = self
            .outbound_tx
            .lock()
            .expect("outbound queue lock poisoned")
            .as_ref()
        {
            let _ = tx.send(message);
        }
    }
}

/// Handle to one logical relay session.
///
/// `connect`, `disconnect` and `send_chat` all return immediately; effects
/// are observed through the store and connection subscriptions.
pub struct RelayClient {
    shared: Arc<Shared>,
}

impl RelayClient {
    /// Create a client with the system clock.
    pub fn new(options: RelayOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a client with an injected clock (tests use
    /// [`hiroba_shared::time::FixedClock`]).
    pub fn with_clock(options: RelayOptions, clock: Arc<dyn Clock>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionInfo {
            status: ConnectionStatus::Disconnected,
            rtt_ms: None,
        });
        let shared = Arc::new(Shared {
            options,
            clock: Arc::clone(&clock),
            presence: Arc::new(PresenceStore::new()),
            history: Arc::new(ChatHistory::new(clock)),
            generation: AtomicU64::new(0),
            status_tx,
            local_player_id: Mutex::new(None),
            outbound_tx: Mutex::new(None),
        });
        Self { shared }
    }

    /// Room presence, read-only for callers.
    pub fn presence(&self) -> Arc<PresenceStore> {
        Arc::clone(&self.shared.presence)
    }

    /// Chat history, read-only for callers.
    pub fn history(&self) -> Arc<ChatHistory> {
        Arc::clone(&self.shared.history)
    }

    /// Server-assigned id of this client, once the handshake completed.
    pub fn player_id(&self) -> Option<String> {
        self.shared.local_player()
    }

    /// Current connection state.
    pub fn connection(&self) -> ConnectionInfo {
        *self.shared.status_tx.borrow()
    }

    /// Subscribe to status and RTT changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionInfo> {
        self.shared.status_tx.subscribe()
    }

    /// Open the session. No-op unless the client is fully disconnected, so
    /// overlapping calls cannot create duplicate live sockets.
    pub fn connect(&self) -> Result<(), ClientError> {
        if self.connection().status != ConnectionStatus::Disconnected {
            return Ok(());
        }
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self
            .shared
            .outbound_tx
            .lock()
            .expect("outbound queue lock poisoned") = Some(outbound_tx);
        self.shared.set_status(ConnectionStatus::Connecting);
        handle.spawn(session::run(
            Arc::clone(&self.shared),
            generation,
            outbound_rx,
        ));
        Ok(())
    }

    /// Tear the session down: invalidate in-flight callbacks, close the
    /// socket, clear both stores and the local identity. Never schedules a
    /// reconnect.
    pub fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        // Dropping the sender wakes the driver, which closes the socket.
        self.shared
            .outbound_tx
            .lock()
            .expect("outbound queue lock poisoned")
            .take();
        self.shared.status_tx.send_replace(ConnectionInfo {
            status: ConnectionStatus::Disconnected,
            rtt_ms: None,
        });
        self.shared.set_local_player(None);
        self.shared.presence.clear();
        self.shared.history.clear();
    }

    /// Submit a chat message, optionally replying to an earlier entry.
    ///
    /// Empty (after trimming) or over-length text is silently rejected. The
    /// local echo is appended synchronously; the relay does not echo the
    /// sender's own messages back, so nothing waits for the server.
    pub fn send_chat(&self, text: &str, reply_to: Option<ChatReplyTo>) {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_CHAT_LENGTH {
            return;
        }

        let now = self.shared.clock.now_millis();
        let id = generate_message_id(now);
        let username = self.shared.options.username.clone();
        let quote = reply_to.map(|reply| ChatReplyTo {
            id: reply.id,
            text: truncate_chars(&reply.text, REPLY_QUOTE_LENGTH),
            username: reply.username,
        });

        self.shared.try_queue(ClientMessage::Chat {
            id: id.clone(),
            text: trimmed.to_owned(),
            username: username.clone(),
            timestamp: now,
            reply_to: quote.clone(),
        });

        self.shared.history.append_chat(ChatEntry {
            id,
            from: self.player_id().unwrap_or_else(|| "local".to_string()),
            text: trimmed.to_owned(),
            username,
            timestamp: now,
            is_local: true,
            reply_to: quote,
            is_system: false,
        });
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Locally unique id for an outbound chat message.
pub fn generate_message_id(now_millis: i64) -> String {
    let seq = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("msg_{}_{}", seq, now_millis)
}

/// Id for a remote chat entry that arrived without one.
pub(crate) fn synthesize_remote_id(timestamp: i64) -> String {
    let seq = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("remote_{}_{}", seq, timestamp)
}

/// Fresh heartbeat nonce.
pub(crate) fn random_nonce(now_millis: i64) -> String {
    format!("n_{:x}_{:x}", rand::rng().random::<u64>(), now_millis)
}

/// Deterministic part of the reconnect delay: 250ms doubling per attempt,
/// capped at 10s.
pub(crate) fn backoff_base_ms(attempt: u32) -> u64 {
    RECONNECT_CAP_MS.min(RECONNECT_BASE_MS.saturating_mul(1u64 << attempt.min(63)))
}

/// Full reconnect delay including jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..RECONNECT_JITTER_MS);
    Duration::from_millis(backoff_base_ms(attempt) + jitter)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
