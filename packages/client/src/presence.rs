//! Room presence store.
//!
//! Tracks the peers in the current room with their display names. Mutated
//! only by the connection engine; observers receive ordered, immutable
//! snapshots through a watch channel. Lookup by id is intentionally not part
//! of the public surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

/// Peers that have not announced a username yet are shown under a
/// placeholder derived from their id prefix.
const PLACEHOLDER_NAME_LEN: usize = 8;

/// One peer in the room, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub player_id: String,
    pub username: String,
    pub is_local: bool,
}

#[derive(Debug)]
struct Entry {
    username: String,
    is_local: bool,
}

/// Presence table with deterministically ordered snapshots: the local peer
/// first, the rest sorted by username. Every mutation rebuilds the snapshot
/// in full and publishes it; snapshots are never mutated in place.
#[derive(Debug)]
pub struct PresenceStore {
    entries: Mutex<HashMap<String, Entry>>,
    snapshot_tx: watch::Sender<Arc<Vec<OnlineUser>>>,
}

pub(crate) fn placeholder_name(player_id: &str) -> String {
    player_id.chars().take(PLACEHOLDER_NAME_LEN).collect()
}

impl PresenceStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: Mutex::new(HashMap::new()),
            snapshot_tx,
        }
    }

    /// Upsert this client's own identity. At most one entry may be local:
    /// a previous local entry under a different id (stale identity from a
    /// superseded session) is removed first.
    pub fn set_local_user(&self, player_id: &str, username: &str) {
        let mut entries = self.lock();
        entries.retain(|id, entry| !entry.is_local || id == player_id);
        entries.insert(
            player_id.to_owned(),
            Entry {
                username: username.to_owned(),
                is_local: true,
            },
        );
        self.publish(&entries);
    }

    /// Add a peer under a placeholder name. No-op if already present.
    pub fn add_peer(&self, player_id: &str) {
        let mut entries = self.lock();
        if entries.contains_key(player_id) {
            return;
        }
        entries.insert(
            player_id.to_owned(),
            Entry {
                username: placeholder_name(player_id),
                is_local: false,
            },
        );
        self.publish(&entries);
    }

    /// Seed the table with the peers already in the room (handshake only).
    /// Already-known ids are left untouched; one snapshot is published for
    /// the whole batch.
    pub fn bulk_add_peers(&self, player_ids: &[String]) {
        let mut entries = self.lock();
        for id in player_ids {
            entries.entry(id.clone()).or_insert_with(|| Entry {
                username: placeholder_name(id),
                is_local: false,
            });
        }
        self.publish(&entries);
    }

    /// Upsert a peer's display name; creates the entry as non-local if the
    /// peer was unseen.
    pub fn update_username(&self, player_id: &str, username: &str) {
        let mut entries = self.lock();
        match entries.get_mut(player_id) {
            Some(entry) => entry.username = username.to_owned(),
            None => {
                entries.insert(
                    player_id.to_owned(),
                    Entry {
                        username: username.to_owned(),
                        is_local: false,
                    },
                );
            }
        }
        self.publish(&entries);
    }

    pub fn remove_peer(&self, player_id: &str) {
        let mut entries = self.lock();
        entries.remove(player_id);
        self.publish(&entries);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.publish(&entries);
    }

    /// Current ordered snapshot. Consecutive reads without an intervening
    /// mutation return the same allocation.
    pub fn snapshot(&self) -> Arc<Vec<OnlineUser>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<OnlineUser>>> {
        self.snapshot_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("presence table lock poisoned")
    }

    fn publish(&self, entries: &HashMap<String, Entry>) {
        let mut users: Vec<OnlineUser> = entries
            .iter()
            .map(|(player_id, entry)| OnlineUser {
                player_id: player_id.clone(),
                username: entry.username.clone(),
                is_local: entry.is_local,
            })
            .collect();
        users.sort_by(|a, b| {
            b.is_local
                .cmp(&a.is_local)
                .then_with(|| a.username.cmp(&b.username))
        });
        self.snapshot_tx.send_replace(Arc::new(users));
    }
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(snapshot: &[OnlineUser]) -> Vec<&str> {
        snapshot.iter().map(|u| u.player_id.as_str()).collect()
    }

    #[test]
    fn test_snapshot_orders_local_first_then_by_username() {
        // テスト項目: スナップショットがローカル優先・ユーザー名辞書順で並ぶ
        // given (前提条件):
        let store = PresenceStore::new();
        store.add_peer("peer-zed");
        store.add_peer("peer-abc");
        store.set_local_user("me-12345", "zoe");
        store.update_username("peer-zed", "yuki");
        store.update_username("peer-abc", "ken");

        // when (操作):
        let snapshot = store.snapshot();

        // then (期待する結果):
        assert_eq!(ids(&snapshot), vec!["me-12345", "peer-abc", "peer-zed"]);
        assert!(snapshot[0].is_local);
        assert_eq!(snapshot[1].username, "ken");
        assert_eq!(snapshot[2].username, "yuki");
    }

    #[test]
    fn test_add_peer_assigns_id_prefix_placeholder() {
        // テスト項目: 未アナウンスのピアに id 先頭 8 文字のプレースホルダ名が付く
        // given (前提条件):
        let store = PresenceStore::new();

        // when (操作):
        store.add_peer("abcdefghijklmnop");

        // then (期待する結果):
        assert_eq!(store.snapshot()[0].username, "abcdefgh");
    }

    #[test]
    fn test_add_peer_is_noop_when_already_present() {
        // テスト項目: 既知のピアへの add_peer が既存エントリを上書きしない
        // given (前提条件):
        let store = PresenceStore::new();
        store.add_peer("peer-1");
        store.update_username("peer-1", "bob");

        // when (操作):
        store.add_peer("peer-1");

        // then (期待する結果):
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].username, "bob");
    }

    #[test]
    fn test_bulk_add_skips_known_peers() {
        // テスト項目: bulk_add_peers が既知のピアをスキップして一括追加する
        // given (前提条件):
        let store = PresenceStore::new();
        store.add_peer("peer-1");
        store.update_username("peer-1", "bob");

        // when (操作):
        store.bulk_add_peers(&["peer-1".to_string(), "peer-2".to_string()]);

        // then (期待する結果):
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|u| u.username == "bob"));
        assert!(snapshot.iter().any(|u| u.username == "peer-2"));
    }

    #[test]
    fn test_at_most_one_local_entry_across_identity_changes() {
        // テスト項目: 再接続で id が変わっても isLocal エントリが一つに保たれる
        // given (前提条件):
        let store = PresenceStore::new();
        store.set_local_user("session-1", "alice");

        // when (操作):
        store.set_local_user("session-2", "alice");

        // then (期待する結果):
        let snapshot = store.snapshot();
        assert_eq!(snapshot.iter().filter(|u| u.is_local).count(), 1);
        assert_eq!(snapshot[0].player_id, "session-2");
    }

    #[test]
    fn test_remove_and_clear() {
        // テスト項目: remove_peer と clear がスナップショットから反映される
        // given (前提条件):
        let store = PresenceStore::new();
        store.set_local_user("me", "alice");
        store.add_peer("peer-1");

        // when (操作):
        store.remove_peer("peer-1");

        // then (期待する結果):
        assert_eq!(store.snapshot().len(), 1);

        // when (操作):
        store.clear();

        // then (期待する結果):
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_without_mutation() {
        // テスト項目: 変更がない間はスナップショットが同一参照を返す
        // given (前提条件):
        let store = PresenceStore::new();
        store.add_peer("peer-1");

        // when (操作):
        let first = store.snapshot();
        let second = store.snapshot();

        // then (期待する結果):
        assert!(Arc::ptr_eq(&first, &second));

        // when (操作):
        store.add_peer("peer-2");

        // then (期待する結果):
        assert!(!Arc::ptr_eq(&first, &store.snapshot()));
    }
}
