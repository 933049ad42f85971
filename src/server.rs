//! Listener/supervisor (C8): the `Server` root object holding every
//! shared resource, the accept loop, and reload/shutdown orchestration.
//!
//! A single `Arc<Server>` is cloned into every connection task and into
//! the admin interface — one lock per logical resource, each reached
//! through a struct field rather than a file-scope global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::ban::BanTable;
use crate::config::{Account, AccountStore, ServerConfig};
use crate::connection;
use crate::constants::{BAN_MAX_FAILS, BAN_SECS, MAX_CONNS, RELOAD_POLL_SECS, SHUTDOWN_DRAIN_SECS, SHUTDOWN_POLL_MS};
use crate::cwcache::CwCache;
use crate::logging::{CategoryMask, LogRing};
use crate::registry::Registry;
use crate::srvid::SrvidTable;

/// Everything a connection task, the admin interface, or the supervisor
/// itself needs shared access to.
pub struct Server {
    pub store: AccountStore,
    pub registry: Registry,
    pub bans: BanTable,
    pub cw_cache: CwCache,
    pub srvid: SrvidTable,
    pub log_ring: Arc<LogRing>,
    pub category_mask: CategoryMask,
    config_path: String,
    srvid_path: Option<String>,
    reload_flag: AtomicBool,
    running: AtomicBool,
    restart_flag: AtomicBool,
}

impl Server {
    pub async fn new(
        cfg: ServerConfig,
        accounts: Vec<Account>,
        config_path: String,
        srvid_path: Option<String>,
        log_ring: Arc<LogRing>,
    ) -> Arc<Self> {
        let store = AccountStore::new(cfg);
        for account in accounts {
            store.insert(account).await;
        }
        Arc::new(Server {
            store,
            registry: Registry::new(),
            bans: BanTable::with_params(BAN_MAX_FAILS, Duration::from_secs(BAN_SECS)),
            cw_cache: CwCache::new(),
            srvid: SrvidTable::new(),
            log_ring,
            category_mask: CategoryMask::new(),
            config_path,
            srvid_path,
            reload_flag: AtomicBool::new(false),
            running: AtomicBool::new(true),
            restart_flag: AtomicBool::new(false),
        })
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Release);
    }

    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Requests a full process restart: shuts down the accept loop like
    /// `request_shutdown`, but leaves a flag for `main` to notice once
    /// `run` returns and re-exec the same program image.
    pub fn request_restart(&self) {
        self.restart_flag.store(true, Ordering::Release);
        self.request_shutdown();
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_flag.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Swaps in a freshly parsed config and account set, then re-resolves
    /// every live connection's account reference: a connection either
    /// points into the new store afterward or is killed.
    async fn maybe_reload(&self) {
        if !self.reload_flag.swap(false, Ordering::AcqRel) {
            return;
        }
        match crate::config::load_or_init(&self.config_path).await {
            Ok((cfg, accounts)) => {
                self.store.replace_all(cfg, accounts).await;
                self.registry.relink_accounts(&self.store).await;
                if let Some(path) = &self.srvid_path {
                    match tokio::fs::read_to_string(path).await {
                        Ok(text) => self.srvid.replace_all(&text).await,
                        Err(e) => warn!(error = %e, "srvid2 reload failed, keeping old table"),
                    }
                }
                info!("config reloaded");
            }
            Err(e) => warn!(error = %e, "reload failed, keeping active config"),
        }
    }

    /// Binds `bind_addr` and runs the accept loop until `request_shutdown`
    /// is called, then drains active connections for up to
    /// [`SHUTDOWN_DRAIN_SECS`] before returning.
    pub async fn run(self: Arc<Self>, bind_addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(addr = bind_addr, "listening");

        let mut reload_ticker = tokio::time::interval(Duration::from_secs(RELOAD_POLL_SECS));

        while self.is_running() {
            tokio::select! {
                _ = reload_ticker.tick() => {
                    self.maybe_reload().await;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => self.clone().spawn_connection(socket, addr.ip().to_string()),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    fn spawn_connection(self: Arc<Self>, socket: tokio::net::TcpStream, peer_ip: String) {
        if self.registry.len() >= MAX_CONNS {
            warn!(peer = %peer_ip, "at connection cap, rejecting");
            return;
        }
        tokio::spawn(async move {
            connection::handle_connection(self, socket, peer_ip).await;
        });
    }

    async fn drain(&self) {
        info!("draining active connections");
        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_DRAIN_SECS);
        while !self.registry.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)).await;
        }
        if !self.registry.is_empty() {
            warn!(remaining = self.registry.len(), "drain timed out, shutting down anyway");
        }
    }
}
