//! Bounded chat history with pub/sub snapshots.
//!
//! Append-only log of chat and system entries, capped at
//! [`MAX_ENTRIES`]; the oldest entries are evicted first. Every mutation
//! replaces the published snapshot so observers can detect change by
//! reference comparison.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use tokio::sync::watch;

use hiroba_protocol::ChatReplyTo;
use hiroba_shared::time::Clock;

/// History holds at most this many entries (FIFO eviction).
pub const MAX_ENTRIES: usize = 500;

/// One chat or system entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    /// Client-generated for local entries; peer-provided or synthesized for
    /// remote ones.
    pub id: String,
    /// Peer id of the author, or `"system"` for connection narration.
    pub from: String,
    pub text: String,
    pub username: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub is_local: bool,
    pub reply_to: Option<ChatReplyTo>,
    pub is_system: bool,
}

/// Bounded append-only chat log.
pub struct ChatHistory {
    entries: Mutex<Vec<ChatEntry>>,
    snapshot_tx: watch::Sender<Arc<Vec<ChatEntry>>>,
    clock: Arc<dyn Clock>,
}

static SYSTEM_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ChatHistory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: Mutex::new(Vec::new()),
            snapshot_tx,
            clock,
        }
    }

    /// Append one entry, evicting from the front if the log is full.
    pub fn append_chat(&self, entry: ChatEntry) {
        let mut entries = self.lock();
        entries.push(entry);
        if entries.len() > MAX_ENTRIES {
            let overflow = entries.len() - MAX_ENTRIES;
            entries.drain(..overflow);
        }
        self.publish(&entries);
    }

    /// Append a system entry narrating connection state (joins, leaves,
    /// server errors). Id and timestamp are synthesized.
    pub fn append_system(&self, text: &str) {
        let now = self.clock.now_millis();
        let seq = SYSTEM_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix: u32 = rand::rng().random_range(0..0x100_0000);
        self.append_chat(ChatEntry {
            id: format!("sys_{}_{}_{:06x}", seq, now, suffix),
            from: "system".to_string(),
            text: text.to_owned(),
            username: "System".to_string(),
            timestamp: now,
            is_local: false,
            reply_to: None,
            is_system: true,
        });
    }

    /// Current ordered snapshot, oldest first. Consecutive reads without an
    /// intervening mutation return the same allocation.
    pub fn snapshot(&self) -> Arc<Vec<ChatEntry>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ChatEntry>>> {
        self.snapshot_tx.subscribe()
    }

    /// Resolve a reply target that is still in the log.
    pub fn find_by_id(&self, id: &str) -> Option<ChatEntry> {
        self.snapshot().iter().find(|e| e.id == id).cloned()
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.publish(&entries);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatEntry>> {
        self.entries.lock().expect("chat history lock poisoned")
    }

    fn publish(&self, entries: &[ChatEntry]) {
        self.snapshot_tx.send_replace(Arc::new(entries.to_vec()));
    }
}

impl std::fmt::Debug for ChatHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistory")
            .field("len", &self.snapshot().len())
            .finish()
    }
}
