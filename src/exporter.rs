//! Metrics exposition: the `/metrics` scrape endpoint and the periodic
//! log reporter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::metrics::FetchMetrics;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(metrics: Arc<FetchMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<FetchMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        metrics.render_prometheus(),
    )
}

/// Binds `addr` and serves `/metrics` until `shutdown` fires.
///
/// Binding happens before the task is spawned so a busy port is
/// reported to the caller instead of being logged from the background.
pub async fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: Arc<FetchMetrics>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    log::info!("metrics endpoint listening on http://{local}/metrics");

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, router(metrics))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = served {
            log::error!("metrics endpoint failed: {err}");
        }
    });

    Ok((local, handle))
}

/// Logs one compact metrics line every `interval` until `shutdown`.
pub fn spawn_metrics_reporter(
    metrics: Arc<FetchMetrics>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = metrics.snapshot();
                    log::info!(
                        "[METRICS] workers={} completed={} transport_err={} decode_err={} restarts={} mean_latency={}",
                        snap.workers_active,
                        snap.completed,
                        snap.transport_errors,
                        snap.decode_errors,
                        snap.restarts,
                        snap.mean_latency()
                            .map(|s| format!("{:.3}s", s))
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
        }
    })
}
