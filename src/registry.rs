//! Bounded registry of live connections, used for administrative kill
//! actions and for re-pointing connections at their account after a
//! config reload.

use crate::config::{AccountId, AccountStore};
use crate::constants::MAX_CONNS;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One registered connection's shared, cross-task-visible state. The
/// per-connection task holds a clone of this `Arc` and checks `kill_flag`
/// once per dispatch-loop iteration; the registry and the admin interface
/// hold clones too, to request a kill or inspect status from outside the
/// task.
pub struct ClientHandle {
    pub connection_id: u64,
    pub peer_ip: String,
    pub connected_at: std::time::Instant,
    user: Mutex<Option<String>>,
    account_id: Mutex<Option<AccountId>>,
    pub kill_flag: AtomicBool,
}

impl ClientHandle {
    pub fn user(&self) -> Option<String> {
        self.user.lock().unwrap().clone()
    }

    pub fn set_user(&self, user: String) {
        *self.user.lock().unwrap() = Some(user);
    }

    pub fn account_id(&self) -> Option<AccountId> {
        *self.account_id.lock().unwrap()
    }

    pub fn set_account_id(&self, id: Option<AccountId>) {
        *self.account_id.lock().unwrap() = id;
    }

    pub fn request_kill(&self) {
        self.kill_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_killed(&self) -> bool {
        self.kill_flag.load(Ordering::Relaxed)
    }
}

/// Registry of live connections, capacity-capped at [`MAX_CONNS`].
pub struct Registry {
    clients: Mutex<Vec<Arc<ClientHandle>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection, or returns `None` if the registry is
    /// at capacity (the supervisor must reject the socket in that case).
    pub fn register(&self, peer_ip: String) -> Option<Arc<ClientHandle>> {
        let mut clients = self.clients.lock().unwrap();
        if clients.len() >= MAX_CONNS {
            return None;
        }
        let handle = Arc::new(ClientHandle {
            connection_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer_ip,
            connected_at: std::time::Instant::now(),
            user: Mutex::new(None),
            account_id: Mutex::new(None),
            kill_flag: AtomicBool::new(false),
        });
        clients.push(handle.clone());
        Some(handle)
    }

    pub fn unregister(&self, connection_id: u64) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|c| c.connection_id != connection_id);
    }

    pub fn kill_by_id(&self, connection_id: u64) -> bool {
        let clients = self.clients.lock().unwrap();
        if let Some(c) = clients.iter().find(|c| c.connection_id == connection_id) {
            c.request_kill();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.lock().unwrap().clone()
    }

    /// Re-resolves every logged-in connection's account against `store`
    /// by username. A connection whose username no longer maps to an
    /// account is killed rather than left holding a stale `AccountId`.
    pub async fn relink_accounts(&self, store: &AccountStore) {
        let handles = self.snapshot();
        for handle in handles {
            let Some(user) = handle.user() else { continue };
            match store.find_by_user(&user).await {
                Some((id, _)) => handle.set_account_id(Some(id)),
                None => {
                    handle.set_account_id(None);
                    handle.request_kill();
                }
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Account, AccountStats, ServerConfig};

    fn make_account(user: &str) -> Account {
        Account {
            user: user.to_string(),
            pass: String::new(),
            group: 1,
            enabled: true,
            use_fake_cw: false,
            max_connections: 0,
            max_idle_secs: 0,
            expiration: 0,
            caid: 0x0b00,
            caids: vec![],
            keys: vec![],
            ip_whitelist: vec![],
            sid_whitelist: vec![],
            schedule: None,
            stats: AccountStats::default(),
        }
    }

    #[test]
    fn register_and_unregister_round_trips() {
        let reg = Registry::new();
        let handle = reg.register("127.0.0.1".to_string()).unwrap();
        assert_eq!(reg.len(), 1);
        reg.unregister(handle.connection_id);
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_rejects_past_capacity() {
        let reg = Registry::new();
        for _ in 0..MAX_CONNS {
            assert!(reg.register("1.1.1.1".to_string()).is_some());
        }
        assert!(reg.register("1.1.1.1".to_string()).is_none());
    }

    #[test]
    fn kill_by_id_sets_flag_on_the_right_connection() {
        let reg = Registry::new();
        let a = reg.register("1.1.1.1".to_string()).unwrap();
        let b = reg.register("2.2.2.2".to_string()).unwrap();
        assert!(reg.kill_by_id(b.connection_id));
        assert!(!a.is_killed());
        assert!(b.is_killed());
    }

    #[tokio::test]
    async fn relink_kills_connections_whose_account_disappeared() {
        let reg = Registry::new();
        let handle = reg.register("1.1.1.1".to_string()).unwrap();
        handle.set_user("ghost".to_string());

        let store = AccountStore::new(ServerConfig::default());
        store.insert(make_account("someone-else")).await;

        reg.relink_accounts(&store).await;
        assert!(handle.is_killed());
        assert!(handle.account_id().is_none());
    }

    #[tokio::test]
    async fn relink_rebinds_surviving_accounts_to_a_fresh_id() {
        let reg = Registry::new();
        let handle = reg.register("1.1.1.1".to_string()).unwrap();
        handle.set_user("u1".to_string());

        let store = AccountStore::new(ServerConfig::default());
        let id = store.insert(make_account("u1")).await;

        reg.relink_accounts(&store).await;
        assert!(!handle.is_killed());
        assert_eq!(handle.account_id(), Some(id));
    }
}
