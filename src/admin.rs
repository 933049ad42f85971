//! HTTP administration interface.
//!
//! Exposes the operations an operator needs at runtime: kill a connection
//! by id, trigger a reload, reset one account's counters, snapshot the
//! live client registry, tail recent log lines, restart, and shut down.
//! Every route sits behind HTTP Basic auth checked against the `[webif]`
//! `user`/`pwd` pair.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Router, extract::Request};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::ct_streq;
use crate::server::Server;

async fn require_basic_auth(State(server): State<Arc<Server>>, request: Request, next: Next) -> Response {
    let cfg = server.store.server_config().await;
    let header_val = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let Some(encoded) = header_val.strip_prefix("Basic ") else {
        return unauthorized();
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return unauthorized();
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return unauthorized();
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return unauthorized();
    };

    if ct_streq(user, &cfg.webif_user) && ct_streq(pass, &cfg.webif_pass) {
        next.run(request).await
    } else {
        unauthorized()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"newcamd-gw\"")],
        "unauthorized",
    )
        .into_response()
}

#[derive(Serialize)]
struct ClientView {
    connection_id: u64,
    peer_ip: String,
    user: Option<String>,
    connected_secs: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    accounts: usize,
    clients: Vec<ClientView>,
}

async fn get_status(State(server): State<Arc<Server>>) -> Json<StatusResponse> {
    let clients = server
        .registry
        .snapshot()
        .iter()
        .map(|c| ClientView {
            connection_id: c.connection_id,
            peer_ip: c.peer_ip.clone(),
            user: c.user(),
            connected_secs: c.connected_at.elapsed().as_secs(),
        })
        .collect();

    Json(StatusResponse {
        running: server.is_running(),
        accounts: server.store.account_count().await,
        clients,
    })
}

async fn kill_client(State(server): State<Arc<Server>>, Path(connection_id): Path<u64>) -> StatusCode {
    if server.registry.kill_by_id(connection_id) {
        info!(connection_id, "admin kill requested");
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn trigger_reload(State(server): State<Arc<Server>>) -> StatusCode {
    server.request_reload();
    info!("admin reload requested");
    StatusCode::ACCEPTED
}

async fn reset_counters(State(server): State<Arc<Server>>, Path(user): Path<String>) -> StatusCode {
    match server.store.find_by_user(&user).await {
        Some((_, account)) => {
            account.stats.ecm_total.store(0, std::sync::atomic::Ordering::Relaxed);
            account.stats.cw_hits.store(0, std::sync::atomic::Ordering::Relaxed);
            account.stats.cw_misses.store(0, std::sync::atomic::Ordering::Relaxed);
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_lines")]
    n: usize,
}

fn default_log_lines() -> usize {
    200
}

async fn tail_log(State(server): State<Arc<Server>>, Query(q): Query<LogQuery>) -> Json<Vec<String>> {
    Json(server.log_ring.tail(q.n))
}

async fn shutdown(State(server): State<Arc<Server>>) -> StatusCode {
    info!("admin shutdown requested");
    server.request_shutdown();
    StatusCode::ACCEPTED
}

async fn restart(State(server): State<Arc<Server>>) -> StatusCode {
    info!("admin restart requested");
    server.request_restart();
    StatusCode::ACCEPTED
}

fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/kill/{connection_id}", post(kill_client))
        .route("/reload", post(trigger_reload))
        .route("/reset/{user}", post(reset_counters))
        .route("/log", get(tail_log))
        .route("/shutdown", post(shutdown))
        .route("/restart", post(restart))
        .route_layer(middleware::from_fn_with_state(server.clone(), require_basic_auth))
        .with_state(server)
}

/// Binds and serves the admin HTTP interface until the socket is closed.
/// Runs as its own Tokio task; errors here never affect the Newcamd
/// listener or live connections.
pub async fn serve(server: Arc<Server>, bind_addr: &str, port: u16) -> std::io::Result<()> {
    let addr_str = if bind_addr.is_empty() {
        format!("0.0.0.0:{port}")
    } else {
        format!("{bind_addr}:{port}")
    };
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad webif bind address: {e}")))?;

    let app = router(server);
    info!(%addr, "admin interface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
