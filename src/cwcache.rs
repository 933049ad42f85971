//! Control-word cache: short-lived memoization keyed by ECM fingerprint so
//! repeated ECMs for the same crypto-period (multiple clients sharing one
//! channel) skip the decode path entirely.

use crate::constants::{CW_CACHE_SIZE, CW_CACHE_TTL_S, CW_LEN};
use crate::crypto::md5;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone, Copy)]
struct Slot {
    fingerprint: [u8; 16],
    cw: [u8; CW_LEN],
    stored_at: Instant,
    occupied: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            fingerprint: [0; 16],
            cw: [0; CW_LEN],
            stored_at: Instant::now(),
            occupied: false,
        }
    }
}

/// Fixed-size, open-addressed control-word cache. One mutex guards the
/// whole table; callers hold it only for the duration of a single lookup
/// or store, never across I/O.
pub struct CwCache {
    slots: Mutex<Vec<Slot>>,
    ttl: Duration,
}

fn bucket_index(fingerprint: &[u8; 16]) -> usize {
    ((fingerprint[0] as usize) | ((fingerprint[1] as usize) << 8)) & (CW_CACHE_SIZE - 1)
}

impl CwCache {
    pub fn new() -> Self {
        CwCache::with_ttl(Duration::from_secs(CW_CACHE_TTL_S))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        CwCache {
            slots: Mutex::new(vec![Slot::default(); CW_CACHE_SIZE]),
            ttl,
        }
    }

    /// Returns the cached control word for `ecm` if present and not yet
    /// expired.
    pub async fn lookup(&self, ecm: &[u8]) -> Option<[u8; CW_LEN]> {
        let fingerprint = md5(ecm);
        let idx = bucket_index(&fingerprint);
        let slots = self.slots.lock().await;
        let slot = &slots[idx];
        if slot.occupied && slot.fingerprint == fingerprint && slot.stored_at.elapsed() < self.ttl {
            Some(slot.cw)
        } else {
            None
        }
    }

    /// Stores `cw` for `ecm`, overwriting whatever previously occupied the
    /// bucket (no collision chaining — a collision simply evicts).
    pub async fn store(&self, ecm: &[u8], cw: [u8; CW_LEN]) {
        let fingerprint = md5(ecm);
        let idx = bucket_index(&fingerprint);
        let mut slots = self.slots.lock().await;
        slots[idx] = Slot {
            fingerprint,
            cw,
            stored_at: Instant::now(),
            occupied: true,
        };
    }
}

impl Default for CwCache {
    fn default() -> Self {
        CwCache::new()
    }
}
