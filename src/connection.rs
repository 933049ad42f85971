//! Per-connection state machine (C7): cleartext handshake, then a
//! read-dispatch-reply loop until the socket closes, the peer is killed
//! administratively, or the account's idle timeout fires.
//!
//! One `tokio::spawn`ed task per client. Every suspension point below —
//! socket read/write, account-store lookup, ban-table, CW-cache, registry
//! — is an `.await`, never a blocking call, so the task yields cleanly
//! instead of parking an OS thread.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::Account;
use crate::constants::*;
use crate::crypto;
use crate::emu::{Caid0bFamily, EcmDecoder, should_attempt_decode};
use crate::error::{AuthFailReason, GatewayError};
use crate::frame::{self, Frame, addcard_frame, version_frame};
use crate::registry::ClientHandle;
use crate::server::Server;

/// Maps a login frame's service-id field to a human-readable client
/// product name, for logging only — unrecognized ids are not an error.
const CLIENT_NAMES: &[(u16, &str)] = &[(0x0000, "generic"), (0x0001, "newcamd-reference-client")];

fn client_name(id: u16) -> &'static str {
    CLIENT_NAMES
        .iter()
        .find(|(cid, _)| *cid == id)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `wday`: 0=Mon..6=Sun. `hhmm`: hour*100+minute. Computed from wall-clock
/// UTC rather than a configured local timezone, which would need a
/// timezone database dependency the rest of the stack doesn't otherwise
/// need; see DESIGN.md.
fn now_wday_hhmm() -> (i8, i16) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as i64;
    let days = secs / 86400;
    let sod = secs % 86400;
    let wday = (((days % 7) + 3) % 7) as i8;
    let hhmm = ((sod / 3600) * 100 + (sod % 3600) / 60) as i16;
    (wday, hhmm)
}

struct ConnState {
    k1: [u8; 8],
    k2: [u8; 8],
    seed: [u8; 14],
    last_ecm: Instant,
    last_caid: u16,
    last_sid: u16,
}

/// Resolves the account a connection is logged in as, fresh from the
/// store, on every use — never from a snapshot cached at login time. The
/// id itself lives on the registry's [`ClientHandle`], which `Registry::
/// relink_accounts` keeps pointed at the right row across a reload; this
/// just takes the extra step of re-fetching the `Arc<Account>` so an
/// edited or disabled account takes effect on the very next frame instead
/// of only at the next login.
async fn current_account(server: &Arc<Server>, handle: &ClientHandle) -> Option<Arc<Account>> {
    server.store.resolve(handle.account_id()?).await
}

/// Drives one accepted TCP connection end to end. Registers with the
/// server's client registry on entry and unregisters (decrementing the
/// account's active-login counter if logged in) on every exit path.
pub async fn handle_connection(server: Arc<Server>, mut socket: TcpStream, peer_ip: String) {
    let Some(handle) = server.registry.register(peer_ip.clone()) else {
        warn!(peer = %peer_ip, "client registry at capacity, dropping connection");
        return;
    };

    let cfg = server.store.server_config().await;
    let sock_timeout = Duration::from_secs(cfg.sock_timeout_secs.max(1));

    let result = run_handshake_and_loop(&server, &mut socket, &peer_ip, &handle, sock_timeout, &cfg.des_key).await;

    if let Err(e) = result {
        debug!(peer = %peer_ip, error = %e, "connection closed");
    }

    // Logout accounting: re-resolve by the username the handle recorded,
    // since the live `Arc<Account>` held by `ConnState` is gone once
    // `run_handshake_and_loop` returns. Only decrement if login actually
    // succeeded (the handle's account id was set).
    if handle.account_id().is_some() {
        if let Some(user) = handle.user() {
            if let Some((_, account)) = server.store.find_by_user(&user).await {
                account.stats.mark_logout();
            }
        }
    }

    server.registry.unregister(handle.connection_id);
    let _ = socket.shutdown().await;
}

async fn run_handshake_and_loop(
    server: &Arc<Server>,
    socket: &mut TcpStream,
    peer_ip: &str,
    handle: &Arc<ClientHandle>,
    sock_timeout: Duration,
    root_key: &[u8; 14],
) -> Result<(), GatewayError> {
    let token = crypto::random_array::<14>()?;
    socket.write_all(&token).await?;
    let (k1, k2, seed) = crypto::handshake_keys(root_key, &token);

    let mut state = ConnState {
        k1,
        k2,
        seed,
        last_ecm: Instant::now(),
        last_caid: 0,
        last_sid: 0,
    };

    loop {
        if handle.is_killed() {
            info!(peer = %peer_ip, "connection killed administratively");
            return Ok(());
        }

        if handle.account_id().is_some() {
            match current_account(server, handle).await {
                Some(account) => {
                    let max_idle = account.max_idle_secs;
                    if max_idle > 0 && state.last_ecm.elapsed() >= Duration::from_secs(max_idle as u64) {
                        info!(peer = %peer_ip, "idle timeout");
                        return Ok(());
                    }
                }
                None => {
                    info!(peer = %peer_ip, "account removed by reload");
                    return Ok(());
                }
            }
        }

        let frame = match timeout(sock_timeout, frame::recv_frame(socket, &state.k1, &state.k2)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => return Err(GatewayError::Timeout),
        };

        dispatch(server, socket, peer_ip, handle, &mut state, frame).await?;
    }
}

async fn dispatch(
    server: &Arc<Server>,
    socket: &mut TcpStream,
    peer_ip: &str,
    handle: &Arc<ClientHandle>,
    state: &mut ConnState,
    frame: Frame,
) -> Result<(), GatewayError> {
    match frame.command {
        MSG_CLIENT_LOGIN => handle_login(server, socket, peer_ip, handle, state, frame).await,
        MSG_CARD_DATA_REQ => handle_card_info(server, handle, socket, state, frame).await,
        MSG_KEEPALIVE => {
            let reply = Frame::new(MSG_KEEPALIVE, 0, frame.payload.clone())
                .with_ids(frame.message_id, frame.service_id, frame.pid_u32());
            frame::send_frame(socket, &state.k1, &state.k2, &reply).await
        }
        MSG_ECM_0 | MSG_ECM_1 => handle_ecm(server, handle, socket, state, frame).await,
        MSG_GET_VERSION => {
            let reply = version_frame(frame.message_id);
            frame::send_frame(socket, &state.k1, &state.k2, &reply).await
        }
        other => {
            debug!(cmd = format!("{other:#04x}"), "unhandled command, ignoring");
            Ok(())
        }
    }
}

async fn send_login_nak(socket: &mut TcpStream, state: &ConnState, frame: &Frame) -> Result<(), GatewayError> {
    let reply = Frame::new(MSG_CLIENT_LOGIN_NAK, 0, vec![]).with_ids(frame.message_id, frame.service_id, 0);
    frame::send_frame(socket, &state.k1, &state.k2, &reply).await
}

async fn handle_login(
    server: &Arc<Server>,
    socket: &mut TcpStream,
    peer_ip: &str,
    handle: &Arc<ClientHandle>,
    state: &mut ConnState,
    frame: Frame,
) -> Result<(), GatewayError> {
    // Login payload layout: 3 reserved bytes, then a NUL-terminated
    // username, then the MD5-crypt hash string the client computed from
    // the handshake token.
    if frame.payload.len() < 4 {
        return Err(GatewayError::InvalidFrame("login payload shorter than minimum"));
    }
    let region = &frame.payload[3..];
    let Some(nul) = region.iter().position(|&b| b == 0) else {
        return Err(GatewayError::InvalidFrame("login payload missing username terminator"));
    };
    let user = String::from_utf8_lossy(&region[..nul]).into_owned();
    let rest = &region[nul + 1..];
    if rest.is_empty() {
        return Err(GatewayError::InvalidFrame("login payload missing hash field"));
    }
    let hash_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let hash = String::from_utf8_lossy(&rest[..hash_end]).into_owned();

    if server.bans.is_banned(peer_ip).await {
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::Banned));
    }

    let Some((id, account)) = server.store.find_by_user(&user).await else {
        server.bans.record_fail(peer_ip).await;
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::UnknownUser));
    };

    if !account.enabled {
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::Disabled));
    }

    if !account.ip_permitted(peer_ip) {
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::IPNotWhitelisted));
    }

    let computed = crypto::md5_crypt(&account.pass, &hash);
    if !crypto::ct_streq(&computed, &hash) {
        server.bans.record_fail(peer_ip).await;
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::BadPassword));
    }

    if account.is_expired(now_unix()) {
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::Expired));
    }

    if account.max_connections > 0 && account.stats.active.load(std::sync::atomic::Ordering::Relaxed) >= account.max_connections as u64 {
        send_login_nak(socket, state, &frame).await?;
        return Err(GatewayError::AuthFailed(AuthFailReason::MaxConnections));
    }

    let ack = Frame::new(MSG_CLIENT_LOGIN_ACK, 0, vec![]).with_ids(frame.message_id, frame.service_id, 0);
    frame::send_frame(socket, &state.k1, &state.k2, &ack).await?;

    let (new_k1, new_k2) = crypto::rekey_on_login(&state.seed, hash.as_bytes());
    state.k1 = new_k1;
    state.k2 = new_k2;

    account.stats.mark_login();
    server.bans.record_ok(peer_ip).await;
    handle.set_user(user.clone());
    handle.set_account_id(Some(id));

    info!(
        peer = %peer_ip,
        user = %user,
        client = client_name(frame.service_id),
        "login ok"
    );

    Ok(())
}

async fn handle_card_info(
    server: &Arc<Server>,
    handle: &Arc<ClientHandle>,
    socket: &mut TcpStream,
    state: &mut ConnState,
    frame: Frame,
) -> Result<(), GatewayError> {
    let Some(account) = current_account(server, handle).await else {
        return Err(GatewayError::Unauthenticated);
    };

    // 26 bytes on the wire counts the 3-byte {cmd, status, len} mini-header
    // the frame codec synthesizes itself, so the payload here is 23 bytes
    // with the CAID at offset 1..3 (offset 0 is reserved, rest is padding).
    let mut descriptor = vec![0u8; 23];
    descriptor[1..3].copy_from_slice(&account.caid.to_be_bytes());

    let reply = Frame::new(MSG_CARD_DATA, 0, descriptor).with_ids(frame.message_id, frame.service_id, frame.pid_u32());
    frame::send_frame(socket, &state.k1, &state.k2, &reply).await?;

    for &caid in &account.caids {
        let addcard = addcard_frame(caid, frame.pid_u32(), frame.message_id);
        frame::send_frame(socket, &state.k1, &state.k2, &addcard).await?;
    }

    Ok(())
}

/// Multi-CAID accounts trust the wire hint; single-CAID accounts decode
/// under their own CAID regardless of what the client claims, since some
/// clients send `caid_hint=0` or an unrelated value on ECM requests.
fn resolve_ecm_caid(account: &Account, hint: u16) -> u16 {
    if account.caids.is_empty() || hint == 0 {
        account.caid
    } else {
        hint
    }
}

async fn handle_ecm(
    server: &Arc<Server>,
    handle: &Arc<ClientHandle>,
    socket: &mut TcpStream,
    state: &mut ConnState,
    frame: Frame,
) -> Result<(), GatewayError> {
    state.last_ecm = Instant::now();
    state.last_sid = frame.service_id;

    let Some(account) = current_account(server, handle).await else {
        return Err(GatewayError::Unauthenticated);
    };

    account.stats.touch_last_seen();
    account.stats.ecm_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let caid = resolve_ecm_caid(&account, frame.caid_hint);
    state.last_caid = caid;

    let decoded = decode_ecm(server, &account, caid, frame.service_id, &frame.payload, frame.command).await;

    let ok = decoded.is_ok();
    let mut cw = decoded.unwrap_or([0u8; CW_LEN]);

    if server.category_mask.enabled(crate::logging::LogCategory::EcmTrace) {
        let channel = server.srvid.lookup(state.last_caid, state.last_sid).await;
        debug!(caid = format!("{:#06x}", state.last_caid), sid = format!("{:#06x}", state.last_sid), channel = ?channel, ok, "ecm");
    }

    let reply = if ok {
        account.stats.cw_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Frame::new(frame.command, 0, cw.to_vec()).with_ids(frame.message_id, frame.service_id, frame.pid_u32())
    } else {
        account.stats.cw_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Frame::new(frame.command, 0, vec![]).with_ids(frame.message_id, frame.service_id, frame.pid_u32())
    };

    cw.zeroize();
    frame::send_frame(socket, &state.k1, &state.k2, &reply).await
}

/// Applies the ECM policy gate (schedule, CAID permission, SID
/// whitelist), then consults the CW cache before falling back to the ECM
/// decoder. Every rejection — policy or decode failure — surfaces
/// identically as `Err`, so the caller cannot distinguish "no key" from
/// "policy denied".
async fn decode_ecm(
    server: &Arc<Server>,
    account: &Account,
    caid: u16,
    sid: u16,
    ecm: &[u8],
    command: u8,
) -> Result<[u8; CW_LEN], GatewayError> {
    let (wday, hhmm) = now_wday_hhmm();
    if !account.in_schedule(wday, hhmm) {
        return Err(GatewayError::ScheduleDenied);
    }

    let decoder = Caid0bFamily::new(account.use_fake_cw);
    let mut account_caids = vec![account.caid];
    account_caids.extend(&account.caids);
    if !should_attempt_decode(&decoder, caid, &account_caids) {
        return Err(GatewayError::CAIDNotPermitted);
    }

    if !account.sid_permitted(sid) {
        return Err(GatewayError::SIDNotWhitelisted);
    }

    let _ = command;

    if let Some(cw) = server.cw_cache.lookup(ecm).await {
        return Ok(cw);
    }

    let cw = decoder.decode(caid, ecm, &account.keys)?;
    server.cw_cache.store(ecm, cw).await;
    Ok(cw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Account, AccountStats, ServerConfig};
    use crate::logging::LogRing;
    use tokio::net::{TcpListener, TcpStream};

    fn make_account(user: &str, pass: &str) -> Account {
        Account {
            user: user.to_string(),
            pass: pass.to_string(),
            group: 1,
            enabled: true,
            use_fake_cw: false,
            max_connections: 0,
            max_idle_secs: 0,
            expiration: 0,
            caid: 0x0b00,
            caids: vec![0x0b01],
            keys: vec![],
            ip_whitelist: vec![],
            sid_whitelist: vec![],
            schedule: None,
            stats: AccountStats::default(),
        }
    }

    async fn test_server(accounts: Vec<Account>) -> Arc<Server> {
        Server::new(ServerConfig::default(), accounts, "unused.conf".to_string(), None, Arc::new(LogRing::new())).await
    }

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        (client, server_side)
    }

    fn test_keys() -> ([u8; 8], [u8; 8], [u8; 14]) {
        let root = [0u8; 14];
        let token = [9u8; 14];
        crypto::handshake_keys(&root, &token)
    }

    fn login_payload(user: &str, hash: &str) -> Vec<u8> {
        let mut payload = vec![0u8; 3];
        payload.extend_from_slice(user.as_bytes());
        payload.push(0);
        payload.extend_from_slice(hash.as_bytes());
        payload.push(0);
        payload
    }

    #[test]
    fn client_name_falls_back_to_unknown_for_unrecognized_ids() {
        assert_eq!(client_name(0x0000), "generic");
        assert_eq!(client_name(0xffff), "unknown");
    }

    #[test]
    fn wday_hhmm_stay_in_range() {
        let (wday, hhmm) = now_wday_hhmm();
        assert!((0..=6).contains(&wday));
        assert!((0..1440).contains(&hhmm));
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password_and_sends_ack() {
        let hash = crypto::md5_crypt("hunter2", "abcdefgh");
        let account = make_account("alice", "hunter2");
        let server = test_server(vec![account]).await;

        let (mut client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState { k1, k2, seed, last_ecm: Instant::now(), last_caid: 0, last_sid: 0 };
        let Some(handle) = server.registry.register("127.0.0.1".to_string()) else {
            panic!("registry full")
        };

        let login_frame = Frame::new(MSG_CLIENT_LOGIN, 0, login_payload("alice", &hash)).with_ids(1, 0, 0);
        frame::send_frame(&mut client, &k1, &k2, &login_frame).await.unwrap();
        let recv_on_server = frame::recv_frame(&mut server_sock, &k1, &k2).await.unwrap();

        let result = handle_login(&server, &mut server_sock, "127.0.0.1", &handle, &mut state, recv_on_server).await;
        assert!(result.is_ok());
        assert!(handle.account_id().is_some());

        let reply = frame::recv_frame(&mut client, &state.k1, &state.k2).await.unwrap();
        assert_eq!(reply.command, MSG_CLIENT_LOGIN_ACK);
    }

    #[tokio::test]
    async fn login_fails_with_wrong_password_and_sends_nak() {
        let bad_hash = crypto::md5_crypt("wrong-password", "abcdefgh");
        let account = make_account("alice", "hunter2");
        let server = test_server(vec![account]).await;

        let (mut client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState { k1, k2, seed, last_ecm: Instant::now(), last_caid: 0, last_sid: 0 };
        let handle = server.registry.register("127.0.0.1".to_string()).unwrap();

        let login_frame = Frame::new(MSG_CLIENT_LOGIN, 0, login_payload("alice", &bad_hash)).with_ids(1, 0, 0);
        frame::send_frame(&mut client, &k1, &k2, &login_frame).await.unwrap();
        let recv_on_server = frame::recv_frame(&mut server_sock, &k1, &k2).await.unwrap();

        let result = handle_login(&server, &mut server_sock, "127.0.0.1", &handle, &mut state, recv_on_server).await;
        assert!(matches!(result, Err(GatewayError::AuthFailed(AuthFailReason::BadPassword))));
        assert!(handle.account_id().is_none());

        let reply = frame::recv_frame(&mut client, &k1, &k2).await.unwrap();
        assert_eq!(reply.command, MSG_CLIENT_LOGIN_NAK);
    }

    #[tokio::test]
    async fn login_rejects_unknown_user() {
        let server = test_server(vec![]).await;
        let (mut client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState { k1, k2, seed, last_ecm: Instant::now(), last_caid: 0, last_sid: 0 };
        let handle = server.registry.register("127.0.0.1".to_string()).unwrap();

        let login_frame = Frame::new(MSG_CLIENT_LOGIN, 0, login_payload("ghost", "$1$xx$yy")).with_ids(1, 0, 0);
        frame::send_frame(&mut client, &k1, &k2, &login_frame).await.unwrap();
        let recv_on_server = frame::recv_frame(&mut server_sock, &k1, &k2).await.unwrap();

        let result = handle_login(&server, &mut server_sock, "127.0.0.1", &handle, &mut state, recv_on_server).await;
        assert!(matches!(result, Err(GatewayError::AuthFailed(AuthFailReason::UnknownUser))));
    }

    #[tokio::test]
    async fn card_info_descriptor_carries_caid_at_offset_one() {
        let account = make_account("alice", "hunter2");
        let expected_caid = account.caid;
        let server = test_server(vec![account]).await;
        let (id, _resolved_account) = server.store.find_by_user("alice").await.unwrap();

        let (mut client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState {
            k1,
            k2,
            seed,
            last_ecm: Instant::now(),
            last_caid: 0,
            last_sid: 0,
        };
        let handle = server.registry.register("127.0.0.1".to_string()).unwrap();
        handle.set_account_id(Some(id));

        let req = Frame::new(MSG_CARD_DATA_REQ, 0, vec![]).with_ids(1, 0, 0);
        handle_card_info(&server, &handle, &mut server_sock, &mut state, req).await.unwrap();

        let reply = frame::recv_frame(&mut client, &k1, &k2).await.unwrap();
        assert_eq!(reply.payload.len(), 23);
        assert_eq!(u16::from_be_bytes([reply.payload[1], reply.payload[2]]), expected_caid);

        let addcard = frame::recv_frame(&mut client, &k1, &k2).await.unwrap();
        assert_eq!(addcard.caid_hint, 0x0b01);
    }

    #[test]
    fn ecm_caid_falls_back_to_primary_for_single_caid_accounts() {
        let mut account = make_account("alice", "hunter2");
        account.caids = vec![];
        assert_eq!(resolve_ecm_caid(&account, 0), account.caid);
        assert_eq!(resolve_ecm_caid(&account, 0x0c00), account.caid);
    }

    #[test]
    fn ecm_caid_trusts_the_wire_hint_for_multi_caid_accounts() {
        let account = make_account("alice", "hunter2");
        assert_eq!(resolve_ecm_caid(&account, 0x0b01), 0x0b01);
    }

    #[test]
    fn ecm_caid_falls_back_when_hint_is_absent_even_for_multi_caid_accounts() {
        let account = make_account("alice", "hunter2");
        assert_eq!(resolve_ecm_caid(&account, 0), account.caid);
    }

    #[tokio::test]
    async fn card_info_rejects_once_account_is_dropped_by_reload() {
        let account = make_account("alice", "hunter2");
        let server = test_server(vec![account]).await;
        let (id, _) = server.store.find_by_user("alice").await.unwrap();

        let (mut _client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState { k1, k2, seed, last_ecm: Instant::now(), last_caid: 0, last_sid: 0 };
        let handle = server.registry.register("127.0.0.1".to_string()).unwrap();
        handle.set_account_id(Some(id));

        // Simulate a reload that no longer carries this account: even
        // though the connection task never re-read `handle.account_id()`
        // itself, the live `Arc<Account>` it would fetch is gone.
        server.store.replace_all(ServerConfig::default(), vec![]).await;

        let req = Frame::new(MSG_CARD_DATA_REQ, 0, vec![]).with_ids(1, 0, 0);
        let result = handle_card_info(&server, &handle, &mut server_sock, &mut state, req).await;
        assert!(matches!(result, Err(GatewayError::Unauthenticated)));
    }

    #[tokio::test]
    async fn card_info_reflects_an_account_edited_by_reload() {
        let account = make_account("alice", "hunter2");
        let server = test_server(vec![account]).await;
        let (id, _) = server.store.find_by_user("alice").await.unwrap();

        let (mut client, mut server_sock) = loopback_pair().await;
        let (k1, k2, seed) = test_keys();
        let mut state = ConnState { k1, k2, seed, last_ecm: Instant::now(), last_caid: 0, last_sid: 0 };
        let handle = server.registry.register("127.0.0.1".to_string()).unwrap();
        handle.set_user("alice".to_string());
        handle.set_account_id(Some(id));

        let mut edited = make_account("alice", "hunter2");
        edited.caid = 0x0c00;
        server.store.replace_all(ServerConfig::default(), vec![edited]).await;
        server.registry.relink_accounts(&server.store).await;

        let req = Frame::new(MSG_CARD_DATA_REQ, 0, vec![]).with_ids(1, 0, 0);
        handle_card_info(&server, &handle, &mut server_sock, &mut state, req).await.unwrap();

        let reply = frame::recv_frame(&mut client, &k1, &k2).await.unwrap();
        assert_eq!(u16::from_be_bytes([reply.payload[1], reply.payload[2]]), 0x0c00);
    }
}
