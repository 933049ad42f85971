//! Fail-ban: per-IP tracking of authentication failures, with an
//! in-memory-only ban window once a threshold is crossed. No on-disk
//! persistence — a restart clears the table.

use crate::constants::{BAN_MAX_FAILS, BAN_SECS};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
struct BanEntry {
    fails: u32,
    banned_until: Option<Instant>,
}

impl Default for BanEntry {
    fn default() -> Self {
        BanEntry {
            fails: 0,
            banned_until: None,
        }
    }
}

/// Tracks failures and active bans keyed by client IP.
pub struct BanTable {
    entries: Mutex<HashMap<String, BanEntry>>,
    max_fails: u32,
    ban_duration: Duration,
}

impl BanTable {
    pub fn new() -> Self {
        BanTable::with_params(BAN_MAX_FAILS, Duration::from_secs(BAN_SECS))
    }

    pub fn with_params(max_fails: u32, ban_duration: Duration) -> Self {
        BanTable {
            entries: Mutex::new(HashMap::new()),
            max_fails,
            ban_duration,
        }
    }

    /// Prunes an expired ban on `ip` in place, then reports whether it is
    /// currently banned.
    pub async fn is_banned(&self, ip: &str) -> bool {
        let mut entries = self.entries.lock().await;
        Self::prune_one(&mut entries, ip);
        entries.get(ip).map(|e| e.banned_until.is_some()).unwrap_or(false)
    }

    fn prune_one(entries: &mut HashMap<String, BanEntry>, ip: &str) {
        if let Some(entry) = entries.get_mut(ip) {
            if let Some(until) = entry.banned_until {
                if Instant::now() >= until {
                    entry.banned_until = None;
                }
            }
        }
    }

    /// Records an authentication failure for `ip`. Once `max_fails` is
    /// reached, bans the IP for `ban_duration` starting now.
    pub async fn record_fail(&self, ip: &str) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(ip.to_string()).or_default();
        entry.fails += 1;
        if entry.fails >= self.max_fails && entry.banned_until.is_none() {
            let until = Instant::now() + self.ban_duration;
            entry.banned_until = Some(until);
            info!(ip = %ip, fails = entry.fails, "ip banned");
        }
    }

    /// Clears all failure/ban state for `ip` — called on a successful
    /// authentication.
    pub async fn record_ok(&self, ip: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(ip);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for BanTable {
    fn default() -> Self {
        BanTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_banned_below_threshold() {
        let table = BanTable::with_params(5, Duration::from_secs(300));
        for _ in 0..4 {
            table.record_fail("198.51.100.7").await;
        }
        assert!(!table.is_banned("198.51.100.7").await);
    }

    #[tokio::test]
    async fn banned_at_threshold() {
        let table = BanTable::with_params(5, Duration::from_secs(300));
        for _ in 0..5 {
            table.record_fail("198.51.100.7").await;
        }
        assert!(table.is_banned("198.51.100.7").await);
    }

    #[tokio::test]
    async fn record_ok_clears_fail_count_and_ban() {
        let table = BanTable::with_params(5, Duration::from_secs(300));
        for _ in 0..5 {
            table.record_fail("198.51.100.7").await;
        }
        assert!(table.is_banned("198.51.100.7").await);
        table.record_ok("198.51.100.7").await;
        assert!(!table.is_banned("198.51.100.7").await);
    }

    #[tokio::test]
    async fn ban_expires_after_duration() {
        let table = BanTable::with_params(1, Duration::from_millis(20));
        table.record_fail("203.0.113.5").await;
        assert!(table.is_banned("203.0.113.5").await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!table.is_banned("203.0.113.5").await);
    }

    #[tokio::test]
    async fn unrelated_ips_are_independent() {
        let table = BanTable::with_params(1, Duration::from_secs(300));
        table.record_fail("10.0.0.1").await;
        assert!(table.is_banned("10.0.0.1").await);
        assert!(!table.is_banned("10.0.0.2").await);
    }
}
