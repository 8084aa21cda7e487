//! Web Server UI（纯 HTML 前端）。

mod router;
mod routes;
mod state;
mod templates;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::download::extractor::YtDlp;
use crate::download::mux::Muxer;
use crate::download::tools;
use state::{AppState, JobStore};

/// Starts the server on `bind_override` or the configured `web_bind` and
/// blocks until Ctrl+C.
pub fn run(config: Config, bind_override: Option<&str>) -> Result<()> {
    let bind_raw = bind_override.unwrap_or(&config.web_bind).to_string();
    let bind_addrs: Vec<SocketAddr> = parse_bind_addrs(&bind_raw)?;

    let tool_report = tools::probe_all(&config);
    tools::log_tool_report(&tool_report);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let state = AppState {
        bind_addrs: Arc::new(bind_addrs.clone()),
        extractor: Arc::new(YtDlp::from_command(&config.ytdlp_command)),
        muxer: Arc::new(Muxer::from_config(&config)),
        config: Arc::new(config),
        tools: Arc::new(tool_report),
        jobs: Arc::new(JobStore::default()),
    };

    rt.block_on(run_async(bind_addrs, state))
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(anyhow!("empty bind addr"));
    }

    // Standard formats:
    // - IPv4: 127.0.0.1:18424
    // - IPv6: [::1]:18424
    if let Ok(a) = s.parse::<SocketAddr>() {
        return Ok(a);
    }

    // Tolerate missing brackets for IPv6, e.g. "::1:18424".
    if !s.starts_with('[')
        && let Some((host, port)) = s.rsplit_once(':')
        && host.contains(':')
        && !port.is_empty()
        && port.chars().all(|c| c.is_ascii_digit())
    {
        let wrapped = format!("[{host}]:{port}");
        if let Ok(a) = wrapped.parse::<SocketAddr>() {
            return Ok(a);
        }
    }

    Err(anyhow!(
        "invalid bind address: '{s}'. Use '127.0.0.1:18424' or '[::1]:18424' (IPv6 needs brackets). For multiple binds, separate by comma: '0.0.0.0:18424,[::]:18424'."
    ))
}

fn parse_bind_addrs(raw: &str) -> Result<Vec<SocketAddr>> {
    let mut out = Vec::new();
    for p in raw.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
        let a = parse_bind_addr(p)?;
        if !out.contains(&a) {
            out.push(a);
        }
    }

    if out.is_empty() {
        return Err(anyhow!("no bind address given"));
    }
    Ok(out)
}

async fn run_async(bind_addrs: Vec<SocketAddr>, state: AppState) -> Result<()> {
    // Shared shutdown trigger for all listeners.
    let notify = Arc::new(tokio::sync::Notify::new());
    {
        let notify = notify.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            notify.notify_waiters();
        });
    }

    let mut servers = Vec::new();
    for bind in bind_addrs {
        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                // [::]:PORT may already accept IPv4 on dual-stack hosts.
                if !servers.is_empty() && e.kind() == std::io::ErrorKind::AddrInUse {
                    warn!(target: "web", bind = %bind, error = %e, "bind failed (AddrInUse), likely already covered by another listener; skipping");
                    continue;
                }
                return Err(anyhow!(e).context(format!("bind failed: {bind}")));
            }
        };

        info!(target: "web", "Web UI listening on http://{bind}/");
        println!("Interface web : http://{bind}/");

        let app = router::build_router(state.clone());
        let notify = notify.clone();
        servers.push(tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                notify.notified().await;
            })
            .await
        }));
    }

    if servers.is_empty() {
        return Err(anyhow!("no listeners started"));
    }

    println!("Ctrl+C pour arrêter.");

    for h in servers {
        h.await
            .map_err(|e| anyhow!("server task join failed: {e}"))?
            .map_err(|e| anyhow!(e))?;
    }

    info!(target: "web", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    println!("Arrêt du serveur…");
}
