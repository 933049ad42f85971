//! newcamd-gw — Newcamd conditional-access gateway.
//!
//! Terminates the Newcamd wire protocol, authenticates clients against a
//! reloadable account store, decodes ECMs for the CAID-0B00 family, and
//! exposes an HTTP administration interface.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use newcamd_gw::logging::{LogRing, RingLayer};
use newcamd_gw::{admin, config, server::Server};

#[derive(Parser)]
#[command(name = "newcamd-gw", version, about = "Newcamd conditional-access gateway")]
struct Args {
    /// Path to the INI configuration file. Created with defaults if absent.
    #[arg(short = 'c', long, default_value = "ncam.conf")]
    config: String,

    /// Path to an `ncam.srvid2`-format channel-name table (optional).
    #[arg(short = 's', long)]
    srvid: Option<String>,

    /// Bind address for the Newcamd listener.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

fn init_logging() -> Arc<LogRing> {
    let ring = Arc::new(LogRing::new());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,newcamd_gw=debug"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(RingLayer::new(ring.clone()))
        .with(filter)
        .init();

    ring
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn main() {
    let args = Args::parse();
    let ring = init_logging();

    if let Err(e) = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build Tokio runtime")
        .block_on(run(args, ring))
    {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(args: Args, log_ring: Arc<LogRing>) -> std::io::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting newcamd-gw");

    let (cfg, accounts) = config::load_or_init(&args.config).await?;
    info!(accounts = accounts.len(), port = cfg.port, "configuration loaded");

    let webif_enabled = cfg.webif_enabled;
    let webif_port = cfg.webif_port;
    let webif_bindaddr = cfg.webif_bindaddr.clone();
    let listen_port = cfg.port;

    let server = Server::new(cfg, accounts, args.config.clone(), args.srvid.clone(), log_ring).await;

    if let Some(path) = &args.srvid {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            server.srvid.replace_all(&text).await;
        }
    }

    if webif_enabled {
        let admin_server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_server, &webif_bindaddr, webif_port).await {
                error!(error = %e, "admin interface stopped");
            }
        });
    }

    let run_server = server.clone();
    let bind_addr = format!("{}:{}", args.bind, listen_port);
    let mut listener_task = tokio::spawn(async move { run_server.run(&bind_addr).await });

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            server.request_shutdown();
        }
        result = &mut listener_task => {
            result.expect("listener task panicked")?;
        }
    }

    // If the shutdown signal fired first, the listener task is still
    // draining (bounded by its own 1-second reload-poll tick plus the
    // drain timeout) — wait for it to actually finish before restarting
    // or exiting.
    if !listener_task.is_finished() {
        listener_task.await.expect("listener task panicked")?;
    }

    if server.restart_requested() {
        restart_process();
    }

    info!("shutdown complete");
    Ok(())
}

/// Re-executes the current program image with its original arguments.
/// The closest portable equivalent to `execv` available without an extra
/// crate; on success this never returns.
fn restart_process() -> ! {
    info!("restarting process");
    let exe = std::env::current_exe().expect("cannot resolve current executable path");
    let args: Vec<String> = std::env::args().skip(1).collect();
    let err = std::process::Command::new(exe).args(args).exec_replace();
    error!(error = %err, "restart failed");
    std::process::exit(1);
}

#[cfg(unix)]
trait CommandExecReplace {
    fn exec_replace(&mut self) -> std::io::Error;
}

#[cfg(unix)]
impl CommandExecReplace for std::process::Command {
    fn exec_replace(&mut self) -> std::io::Error {
        use std::os::unix::process::CommandExt;
        self.exec()
    }
}

#[cfg(not(unix))]
trait CommandExecReplace {
    fn exec_replace(&mut self) -> std::io::Error;
}

#[cfg(not(unix))]
impl CommandExecReplace for std::process::Command {
    fn exec_replace(&mut self) -> std::io::Error {
        match self.spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => e,
        }
    }
}
