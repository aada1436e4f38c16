//! Fetch pool
//!
//! This module groups all logic responsible for:
//! - Spawning the fetch workers behind the shared rate gate
//! - Supervising each worker under the configured restart policy
//! - Closing the collector channel once every worker is gone
//!
//! The pool is the orchestration layer between:
//! - The record source (fetch + decode)
//! - The consumer loop (drains the collector channel)
//!
//! Pool state machine (never-restart policy):
//!   Running(N) -> Running(N-1) -> ... -> Closed
//! A worker that stopped never comes back, so the count only falls.
pub mod gate;
pub mod restart;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, ConfigError},
    metrics::MetricsSink,
    schema::Record,
    source::RecordSource,
    util,
};

use gate::RateGate;
use restart::{NeverRestart, RestartPolicy};
use worker::{FetchWorker, WorkerExit};

/// Observable pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Number of worker tasks still alive.
    Running(usize),
    /// Every worker is gone and the collector channel is closed.
    Closed,
}

impl PoolState {
    pub fn active_workers(&self) -> usize {
        match self {
            PoolState::Running(n) => *n,
            PoolState::Closed => 0,
        }
    }
}

/// How a worker task ended, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Failed,
    Cancelled,
    GateClosed,
    ChannelClosed,
    Panicked,
}

impl From<&WorkerExit> for ExitReason {
    fn from(exit: &WorkerExit) -> Self {
        match exit {
            WorkerExit::Failed(_) => ExitReason::Failed,
            WorkerExit::Cancelled => ExitReason::Cancelled,
            WorkerExit::GateClosed => ExitReason::GateClosed,
            WorkerExit::ChannelClosed => ExitReason::ChannelClosed,
        }
    }
}

/// Summary returned by the coordinator once the channel is closed.
///
/// `exits` is in termination order.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub exits: Vec<(usize, ExitReason)>,
    pub restarts: u32,
}

impl PoolReport {
    pub fn count(&self, reason: ExitReason) -> usize {
        self.exits.iter().filter(|(_, r)| *r == reason).count()
    }
}

pub struct PoolParams {
    pub workers: usize,
    pub channel_capacity: usize,
    pub max_rate: u32,
    pub period: Duration,
    pub burst: usize,
    pub source: Arc<dyn RecordSource>,
    pub metrics: Arc<dyn MetricsSink>,
    pub restart: Arc<dyn RestartPolicy>,
    pub shutdown: CancellationToken,
}

impl PoolParams {
    pub fn from_config(
        cfg: &Config,
        source: Arc<dyn RecordSource>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            workers: cfg.workers(),
            channel_capacity: cfg.channel_capacity(),
            max_rate: cfg.rate.max_rate,
            period: cfg.rate.period()?,
            burst: cfg.rate.burst,
            source,
            metrics,
            restart: restart::from_config(&cfg.restart),
            shutdown,
        })
    }

    /// Baseline parameters: pool size and capacity equal to `max_rate`,
    /// burst of one, no restarts.
    pub fn new(
        max_rate: u32,
        period: Duration,
        source: Arc<dyn RecordSource>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            workers: max_rate as usize,
            channel_capacity: max_rate as usize,
            max_rate,
            period,
            burst: 1,
            source,
            metrics,
            restart: Arc::new(NeverRestart),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Running pool: state subscription, shutdown and the coordinator.
pub struct PoolHandle {
    state: watch::Receiver<PoolState>,
    coordinator: JoinHandle<PoolReport>,
    shutdown: CancellationToken,
    interval: Duration,
}

impl PoolHandle {
    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolState> {
        self.state.clone()
    }

    /// Admission interval of the shared gate.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requests a graceful stop at every suspension point.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the coordinator, i.e. until the channel is closed.
    pub async fn join(self) -> anyhow::Result<PoolReport> {
        Ok(self.coordinator.await?)
    }
}

/// Spawns `workers` fetch workers, the shared rate gate and the
/// completion coordinator.
///
/// Returns the pool handle and the receiving end of the collector
/// channel (capacity `channel_capacity`).
pub fn spawn_pool(params: PoolParams) -> (PoolHandle, mpsc::Receiver<Record>) {
    let workers = params.workers.max(1);
    let (tx, rx) = mpsc::channel(params.channel_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(PoolState::Running(workers));

    let gate = Arc::new(RateGate::spawn(
        params.max_rate,
        params.period,
        params.burst,
        params.shutdown.clone(),
    ));
    let interval = gate.interval();

    log::info!(
        "starting {workers} workers on {} (one admission every {:?}, burst {}, channel capacity {})",
        params.source.name(),
        interval,
        gate.burst(),
        params.channel_capacity.max(1),
    );

    let handles = (0..workers)
        .map(|id| {
            let worker = FetchWorker::new(
                id,
                params.source.clone(),
                gate.clone(),
                params.metrics.clone(),
                tx.clone(),
                params.shutdown.clone(),
            );
            let policy = params.restart.clone();
            (id, tokio::spawn(supervise(worker, policy)))
        })
        .collect();

    // Workers own the only other references to the gate.
    drop(gate);

    let coordinator = tokio::spawn(coordinate(handles, tx, state_tx));

    (
        PoolHandle {
            state: state_rx,
            coordinator,
            shutdown: params.shutdown,
            interval,
        },
        rx,
    )
}

/// Runs one worker slot until its worker is gone for good.
///
/// Returns the last exit and the number of restarts performed.
async fn supervise(worker: FetchWorker, policy: Arc<dyn RestartPolicy>) -> (WorkerExit, u32) {
    let id = worker.id();
    let mut restarts = 0u32;

    loop {
        worker.metrics().worker_started();
        let exit = worker.run().await;
        worker.metrics().worker_stopped();

        if !exit.is_failure() {
            return (exit, restarts);
        }

        let Some(delay) = policy.next_delay(restarts) else {
            return (exit, restarts);
        };

        log::info!("worker {id} restarting in {delay:?} (restart #{})", restarts + 1);
        tokio::select! {
            biased;
            _ = worker.shutdown_token().cancelled() => return (WorkerExit::Cancelled, restarts),
            _ = tokio::time::sleep(delay) => {}
        }

        restarts += 1;
        worker.metrics().record_restart();
    }
}

/// Completion coordinator.
///
/// Watches every worker task, publishes the shrinking worker count and
/// drops the last collector sender once all of them have exited, which
/// closes the channel exactly once.
async fn coordinate(
    handles: Vec<(usize, JoinHandle<(WorkerExit, u32)>)>,
    closer: mpsc::Sender<Record>,
    state: watch::Sender<PoolState>,
) -> PoolReport {
    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .map(|(id, handle)| async move { (id, handle.await) })
        .collect();
    let mut remaining = pending.len();
    let mut report = PoolReport::default();

    while let Some((id, joined)) = pending.next().await {
        let reason = match joined {
            Ok((exit, restarts)) => {
                report.restarts += restarts;
                ExitReason::from(&exit)
            }
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                log::error!(
                    "worker {id} panicked: {}",
                    util::panic_message(payload.as_ref())
                );
                ExitReason::Panicked
            }
            Err(err) => {
                log::error!("worker {id} task aborted: {err}");
                ExitReason::Panicked
            }
        };

        remaining -= 1;
        report.exits.push((id, reason));
        log::info!("worker {id} exited ({reason:?}), {remaining} still running");
        let _ = state.send(PoolState::Running(remaining));
    }

    drop(closer);
    let _ = state.send(PoolState::Closed);
    log::info!("all workers stopped, collector channel closed");

    report
}
