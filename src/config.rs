//! Configuration file loading and the account store.
//!
//! The file format is a minimal INI dialect with `[server]`, `[webif]`,
//! and repeated `[account]` sections, parsed field-by-field so an
//! existing config file loads unchanged.

use crate::constants::{MAX_CAIDS_PER_ACC, MAX_ECMKEYS_PER_ACC, MAX_IP_WHITELIST, MAX_SID_WHITELIST};
use crate::emu::EcmKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::warn;

/// Per-account live counters. Individual atomics rather than one
/// process-wide stats mutex, since this targets only 64-bit-atomic-capable
/// platforms, so there is no need to serialize unrelated accounts' counter
/// updates behind a single lock.
#[derive(Debug, Default)]
pub struct AccountStats {
    pub active: AtomicU64,
    pub ecm_total: AtomicU64,
    pub cw_hits: AtomicU64,
    pub cw_misses: AtomicU64,
    pub decode_time_us: AtomicU64,
    pub first_login: AtomicI64,
    pub last_seen: AtomicI64,
}

impl AccountStats {
    pub fn touch_last_seen(&self) {
        self.last_seen.store(now_unix(), Ordering::Relaxed);
    }

    pub fn mark_login(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.first_login
            .compare_exchange(0, now_unix(), Ordering::Relaxed, Ordering::Relaxed)
            .ok();
        self.touch_last_seen();
    }

    pub fn mark_logout(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One client account.
#[derive(Debug)]
pub struct Account {
    pub user: String,
    pub pass: String,
    pub group: i32,
    pub enabled: bool,
    pub use_fake_cw: bool,
    pub max_connections: u32,
    pub max_idle_secs: u32,
    pub expiration: i64,
    pub caid: u16,
    pub caids: Vec<u16>,
    pub keys: Vec<EcmKey>,
    pub ip_whitelist: Vec<String>,
    pub sid_whitelist: Vec<u16>,
    /// `None` means the schedule is unset (always allowed).
    pub schedule: Option<Schedule>,
    pub stats: AccountStats,
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub day_from: i8,
    pub day_to: i8,
    pub hhmm_from: i16,
    pub hhmm_to: i16,
}

impl Schedule {
    /// `MON-FRI 08:00-22:00` style string. `day_from <= day_to` is a
    /// contiguous range; if `day_from > day_to` the range wraps across
    /// the week boundary. Same wrap rule applies to the time-of-day range.
    pub fn parse(v: &str) -> Option<Schedule> {
        const DAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];
        let v = v.trim();
        if v.is_empty() {
            return None;
        }
        let (daypart, timepart) = v.split_once(' ')?;
        let (d1, d2) = match daypart.split_once('-') {
            Some((a, b)) => (a, b),
            None => (daypart, daypart),
        };
        let from = DAYS.iter().position(|d| d.eq_ignore_ascii_case(d1))? as i8;
        let to = DAYS.iter().position(|d| d.eq_ignore_ascii_case(d2))? as i8;

        let (t1, t2) = timepart.split_once('-')?;
        let (h1, m1) = t1.split_once(':')?;
        let (h2, m2) = t2.split_once(':')?;
        let h1: i16 = h1.parse().ok()?;
        let m1: i16 = m1.parse().ok()?;
        let h2: i16 = h2.parse().ok()?;
        let m2: i16 = m2.parse().ok()?;

        Some(Schedule {
            day_from: from,
            day_to: to,
            hhmm_from: h1 * 100 + m1,
            hhmm_to: h2 * 100 + m2,
        })
    }

    /// `wday`: 0=Mon..6=Sun. `hhmm`: local hour*100+minute.
    pub fn allows(&self, wday: i8, hhmm: i16) -> bool {
        let day_ok = if self.day_from <= self.day_to {
            wday >= self.day_from && wday <= self.day_to
        } else {
            wday >= self.day_from || wday <= self.day_to
        };
        if !day_ok {
            return false;
        }
        if self.hhmm_from <= self.hhmm_to {
            hhmm >= self.hhmm_from && hhmm < self.hhmm_to
        } else {
            hhmm >= self.hhmm_from || hhmm < self.hhmm_to
        }
    }
}

impl Account {
    pub fn caid_permitted(&self, caid: u16) -> bool {
        self.caid == caid || self.caids.contains(&caid)
    }

    pub fn sid_permitted(&self, sid: u16) -> bool {
        self.sid_whitelist.is_empty() || self.sid_whitelist.contains(&sid)
    }

    pub fn ip_permitted(&self, ip: &str) -> bool {
        self.ip_whitelist.is_empty() || self.ip_whitelist.iter().any(|w| w == ip)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration != 0 && now > self.expiration
    }

    pub fn in_schedule(&self, wday: i8, hhmm: i16) -> bool {
        match &self.schedule {
            None => true,
            Some(s) => s.allows(wday, hhmm),
        }
    }
}

/// Stable handle into the account store, outliving config reloads. A
/// connection holds an `AccountId`, not a raw pointer/reference, and
/// re-resolves an `Arc<Account>` snapshot through the store on demand, so
/// a reload can swap the backing accounts without leaving any connection
/// holding a dangling reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(u64);

/// Server-level configuration (the `[server]`/`[webif]` sections).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub sock_timeout_secs: u64,
    pub ecm_log: bool,
    pub des_key: [u8; 14],
    pub logfile: String,
    pub webif_enabled: bool,
    pub webif_port: u16,
    pub webif_refresh_secs: u32,
    pub webif_user: String,
    pub webif_pass: String,
    pub webif_bindaddr: String,
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 15050,
            sock_timeout_secs: 30,
            ecm_log: true,
            des_key: [0; 14],
            logfile: String::new(),
            webif_enabled: true,
            webif_port: 8080,
            webif_refresh_secs: 30,
            webif_user: "admin".to_string(),
            webif_pass: "admin123".to_string(),
            webif_bindaddr: String::new(),
            config_file: String::new(),
        }
    }
}

/// Reader-writer protected set of accounts plus the server/webif config,
/// addressed by stable [`AccountId`] rather than position or pointer.
pub struct AccountStore {
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    server: ServerConfig,
    accounts: HashMap<u64, Arc<Account>>,
    by_user: HashMap<String, u64>,
    next_id: u64,
}

impl AccountStore {
    pub fn new(server: ServerConfig) -> Self {
        AccountStore {
            inner: RwLock::new(StoreInner {
                server,
                accounts: HashMap::new(),
                by_user: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub async fn server_config(&self) -> ServerConfig {
        self.inner.read().await.server.clone()
    }

    pub async fn insert(&self, account: Account) -> AccountId {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_user.insert(account.user.clone(), id);
        inner.accounts.insert(id, Arc::new(account));
        AccountId(id)
    }

    pub async fn find_by_user(&self, user: &str) -> Option<(AccountId, Arc<Account>)> {
        let inner = self.inner.read().await;
        let id = *inner.by_user.get(user)?;
        let account = inner.accounts.get(&id)?.clone();
        Some((AccountId(id), account))
    }

    pub async fn resolve(&self, id: AccountId) -> Option<Arc<Account>> {
        self.inner.read().await.accounts.get(&id.0).cloned()
    }

    /// Atomically replaces the full account set and server config
    /// (reload). Every account gets a fresh `AccountId`, so stats are not
    /// carried across reload — an account present before and after reload
    /// starts its counters fresh. Callers must re-resolve any held
    /// `AccountId` by username afterward (see `Registry::relink_accounts`).
    pub async fn replace_all(&self, server: ServerConfig, accounts: Vec<Account>) {
        let mut inner = self.inner.write().await;
        inner.server = server;
        inner.accounts.clear();
        inner.by_user.clear();
        for account in accounts {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.by_user.insert(account.user.clone(), id);
            inner.accounts.insert(id, Arc::new(account));
        }
    }

    pub async fn account_count(&self) -> usize {
        self.inner.read().await.accounts.len()
    }
}

fn parse_hex14(v: &str) -> [u8; 14] {
    let mut out = [0u8; 14];
    if v.len() < 28 {
        return out;
    }
    for i in 0..14 {
        if let Ok(b) = u8::from_str_radix(&v[i * 2..i * 2 + 2], 16) {
            out[i] = b;
        }
    }
    out
}

fn parse_caid_list(v: &str, caid: &mut u16, caids: &mut Vec<u16>) {
    let mut first = true;
    for tok in v.split(',') {
        let tok = tok.trim();
        if let Ok(c) = u16::from_str_radix(tok, 16) {
            if first {
                *caid = c;
                first = false;
            } else if caids.len() < MAX_CAIDS_PER_ACC {
                caids.push(c);
            }
        }
    }
}

fn parse_sid_whitelist(v: &str) -> Vec<u16> {
    v.split(',')
        .filter_map(|tok| u16::from_str_radix(tok.trim(), 16).ok())
        .take(MAX_SID_WHITELIST)
        .collect()
}

fn parse_ip_whitelist(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_IP_WHITELIST)
        .collect()
}

/// `"CAID=KEY0KEY1"` or bare `"KEY0KEY1"` (64 hex chars: 32 bytes split
/// into two 16-byte blobs).
fn parse_ecmkey(v: &str, default_caid: u16) -> Option<EcmKey> {
    let (caid, hex) = if v.len() > 5 && v.as_bytes()[4] == b'=' {
        let caid = u16::from_str_radix(&v[..4], 16).ok()?;
        (caid, &v[5..])
    } else {
        (default_caid, v)
    };
    if hex.len() != 64 {
        return None;
    }
    let mut key0 = [0u8; 16];
    let mut key1 = [0u8; 16];
    for i in 0..16 {
        key0[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    for i in 0..16 {
        key1[i] = u8::from_str_radix(&hex[32 + i * 2..32 + i * 2 + 2], 16).ok()?;
    }
    Some(EcmKey { caid, key0, key1 })
}

fn parse_date(v: &str) -> i64 {
    // "YYYY-MM-DD" → days-since-epoch * 86400, matching the reference
    // implementation's local-midnight `mktime` well enough for schedule
    // comparisons (exact local-timezone offset is not wire-significant).
    let parts: Vec<&str> = v.splitn(3, '-').collect();
    if parts.len() != 3 {
        return 0;
    }
    let (Ok(y), Ok(mo), Ok(d)) = (
        parts[0].parse::<i64>(),
        parts[1].parse::<i64>(),
        parts[2].parse::<i64>(),
    ) else {
        return 0;
    };
    if y <= 1970 {
        return 0;
    }
    days_from_civil(y, mo, d) * 86400
}

/// Howard Hinnant's civil-from-days algorithm, inverted: proleptic
/// Gregorian calendar date to days-since-epoch.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// Parses a config file in the `[server]`/`[webif]`/`[account]` dialect.
/// Returns the server config and the list of parsed accounts. Unknown
/// keys are logged and skipped rather than treated as fatal, so a config
/// file carrying keys from a newer or older version still loads.
pub fn parse_config(file_path: &str, text: &str) -> (ServerConfig, Vec<Account>) {
    #[derive(PartialEq)]
    enum Section {
        None,
        Server,
        Webif,
        Account,
    }

    let mut server = ServerConfig {
        config_file: file_path.to_string(),
        ..ServerConfig::default()
    };
    let mut accounts = Vec::new();
    let mut section = Section::None;
    let mut current: Option<Account> = None;

    macro_rules! flush {
        () => {
            if let Some(acc) = current.take() {
                accounts.push(acc);
            }
        };
    }

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.eq_ignore_ascii_case("[server]") {
            section = Section::Server;
            flush!();
            continue;
        }
        if line.eq_ignore_ascii_case("[webif]") {
            section = Section::Webif;
            flush!();
            continue;
        }
        if line.eq_ignore_ascii_case("[account]") {
            flush!();
            section = Section::Account;
            current = Some(Account {
                user: String::new(),
                pass: String::new(),
                group: 1,
                enabled: true,
                use_fake_cw: false,
                max_connections: 0,
                max_idle_secs: 0,
                expiration: 0,
                caid: 0x0b00,
                caids: Vec::new(),
                keys: Vec::new(),
                ip_whitelist: Vec::new(),
                sid_whitelist: Vec::new(),
                schedule: None,
                stats: AccountStats::default(),
            });
            continue;
        }

        let Some((key_raw, val_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        let mut val = val_raw.trim();
        if let Some(idx) = val.find('#') {
            val = val[..idx].trim();
        }

        match section {
            Section::Server => apply_server_field(&mut server, key, val),
            Section::Webif => apply_webif_field(&mut server, key, val),
            Section::Account => {
                if let Some(acc) = current.as_mut() {
                    apply_account_field(acc, key, val);
                }
            }
            Section::None => {}
        }
    }
    flush!();

    (server, accounts)
}

fn apply_server_field(cfg: &mut ServerConfig, key: &str, val: &str) {
    match key.to_ascii_uppercase().as_str() {
        "PORT" => cfg.port = val.parse().unwrap_or(cfg.port),
        "SOCKET_TIMEOUT" => cfg.sock_timeout_secs = val.parse().unwrap_or(cfg.sock_timeout_secs),
        "ECM_LOG" => cfg.ecm_log = val != "0",
        "DES_KEY" => cfg.des_key = parse_hex14(val),
        "LOGFILE" => cfg.logfile = val.to_string(),
        other => warn!(key = other, "unknown [server] key"),
    }
}

fn apply_webif_field(cfg: &mut ServerConfig, key: &str, val: &str) {
    match key.to_ascii_uppercase().as_str() {
        "ENABLED" => cfg.webif_enabled = val != "0",
        "PORT" => cfg.webif_port = val.parse().unwrap_or(cfg.webif_port),
        "REFRESH" => cfg.webif_refresh_secs = val.parse().unwrap_or(cfg.webif_refresh_secs),
        "USER" => cfg.webif_user = val.to_string(),
        "PWD" => cfg.webif_pass = val.to_string(),
        "BINDADDR" => cfg.webif_bindaddr = val.to_string(),
        other => warn!(key = other, "unknown [webif] key"),
    }
}

fn apply_account_field(acc: &mut Account, key: &str, val: &str) {
    match key.to_ascii_lowercase().as_str() {
        "user" => acc.user = val.to_string(),
        "pwd" => acc.pass = val.to_string(),
        "group" => acc.group = val.parse().unwrap_or(acc.group),
        "enabled" => acc.enabled = val != "0",
        "fakecw" => acc.use_fake_cw = val != "0",
        "max_connections" => acc.max_connections = val.parse().unwrap_or(0),
        "max_idle" => acc.max_idle_secs = val.parse().unwrap_or(0),
        "expiration" => acc.expiration = parse_date(val),
        "schedule" => acc.schedule = Schedule::parse(val),
        "caid" => parse_caid_list(val, &mut acc.caid, &mut acc.caids),
        "ip_whitelist" => acc.ip_whitelist = parse_ip_whitelist(val),
        "sid_whitelist" => acc.sid_whitelist = parse_sid_whitelist(val),
        "ecmkey" => {
            if acc.keys.len() < MAX_ECMKEYS_PER_ACC {
                if let Some(key) = parse_ecmkey(val, acc.caid) {
                    if let Some(existing) = acc.keys.iter_mut().find(|k| k.caid == key.caid) {
                        *existing = key;
                    } else {
                        acc.keys.push(key);
                    }
                }
            }
        }
        other => warn!(key = other, "unknown [account] key"),
    }
}

/// Fully-commented default file emitted by `cfg_write_default` when no
/// config exists at startup. A fresh 14-byte root key is drawn from the
/// CSPRNG rather than shipped as a shared constant — the one thing the
/// default must never be is predictable.
pub fn default_config_text() -> Result<String, crate::error::GatewayError> {
    let root_key = crate::crypto::random_array::<14>()?;
    let root_hex = hex::encode(root_key);
    Ok(format!(
        "\
# newcamd-gw default configuration. Generated because no config file was
# found at startup; edit in place and trigger a reload, or restart.

[server]
# Newcamd listen port.
PORT = 15050
# Socket read/write timeout in seconds.
SOCKET_TIMEOUT = 30
# Whether to trace every ECM at debug level.
ECM_LOG = 1
# 28 hex characters (14 bytes). Used only for the initial handshake;
# session keys take over after login. Keep this private.
DES_KEY = {root_hex}

[webif]
ENABLED = 1
PORT = 8080
REFRESH = 30
USER = admin
PWD = admin123
BINDADDR =

# Repeat [account] for each client. Example:
# [account]
# user = demo
# pwd = changeme
# caid = 0B00
# ecmkey = 0B00=0000000000000000000000000000000000000000000000000000000000000000
"
    ))
}

/// Loads the config at `path`; if absent, writes [`default_config_text`]
/// first so the file exists for an operator to edit, then parses it.
/// Fallible only on I/O error — malformed individual fields fall back to
/// their defaults rather than aborting the load (see `parse_config`).
pub async fn load_or_init(path: &str) -> std::io::Result<(ServerConfig, Vec<Account>)> {
    if tokio::fs::metadata(path).await.is_err() {
        let default_text = default_config_text().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
        cfg_write_default(path, &default_text).await?;
    }
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_config(path, &text))
}

/// Writes `text` to `path` only if nothing exists there yet.
async fn cfg_write_default(path: &str, text: &str) -> std::io::Result<()> {
    tokio::fs::write(path, text).await
}

/// Atomically persists `text` to `path`: write to `<path>.tmp`, then copy
/// it over the destination and remove the temp file. Deliberately not
/// `rename` — `rename` fails on Windows when the destination already
/// exists, even though only the Unix target is exercised here.
pub async fn cfg_save(path: &str, text: &str) -> std::io::Result<()> {
    let tmp_path = format!("{path}.tmp");
    tokio::fs::write(&tmp_path, text).await?;
    tokio::fs::copy(&tmp_path, path).await?;
    tokio::fs::remove_file(&tmp_path).await?;
    Ok(())
}
