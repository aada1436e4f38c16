// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use anyhow::Context;
use quote_fetch_pool::{
    config::Config,
    consumer, exporter,
    metrics::FetchMetrics,
    pool::{ExitReason, PoolParams, spawn_pool},
    source::get_source,
};

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging
// - Load and validate configuration
// - Start the metrics endpoint and reporter
// - Start the fetch pool and drive the consumer loop
// - Translate Ctrl-C into a graceful shutdown
//
// The process ends when the collector channel closes: either
// every worker has failed, or shutdown was requested.
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = load_config(&config_path)?;

    init_logging(config.debug_log());
    if !Path::new(&config_path).exists() {
        log::warn!("{config_path} not found, running with built-in defaults");
    }
    config.validate()?;

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(FetchMetrics::new());

    // --------------------------------------------------------
    // Metrics exposition (scrape endpoint + periodic log line)
    // --------------------------------------------------------
    let mut background = Vec::new();
    if let Some(addr) = config.metrics.listen {
        let (_, handle) = exporter::spawn_metrics_server(addr, metrics.clone(), shutdown.clone())
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
        background.push(handle);
    }
    if config.metrics.report_interval_secs > 0 {
        background.push(exporter::spawn_metrics_reporter(
            metrics.clone(),
            Duration::from_secs(config.metrics.report_interval_secs),
            shutdown.clone(),
        ));
    }

    // --------------------------------------------------------
    // Fetch pool
    // --------------------------------------------------------
    let source = get_source(&config.source)?;
    let (pool, records) = spawn_pool(PoolParams::from_config(
        &config,
        source,
        metrics.clone(),
        shutdown.clone(),
    )?);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
        }
    });

    // --------------------------------------------------------
    // Consumer loop (long-running driver of the process)
    // --------------------------------------------------------
    let mut sink = consumer::stdout_sink(config.output.format);
    let consumed = consumer::run_consumer(records, sink.as_mut(), &shutdown).await;
    if consumed.is_err() {
        // Sink is broken: stop producing as well.
        shutdown.cancel();
    }

    let report = pool.join().await?;

    // The pool is closed; stop the endpoint and reporter too.
    shutdown.cancel();
    for handle in background {
        let _ = handle.await;
    }

    let delivered = consumed?;
    let snap = metrics.snapshot();
    log::info!(
        "done: delivered={} completed={} failed_workers={} cancelled_workers={} restarts={}",
        delivered,
        snap.completed,
        report.count(ExitReason::Failed),
        report.count(ExitReason::Cancelled),
        report.restarts,
    );

    Ok(())
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// `RUST_LOG` wins when set; otherwise `info`, or `debug` when
// `debug.log` is enabled in the configuration.
//
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .format_timestamp_millis()
    .try_init();
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure. A missing
// file yields the defaults; a malformed one is an error.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    if !Path::new(path).exists() {
        return Ok(Config::default());
    }
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let cfg = serde_json::from_str(&data).with_context(|| format!("invalid config in {path}"))?;
    Ok(cfg)
}
