use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    metrics::MetricsSink,
    schema::Record,
    source::{FetchError, RecordSource},
};

use super::gate::RateGate;

/// Why a worker left its fetch loop.
#[derive(Debug)]
pub enum WorkerExit {
    /// The fetch or decode failed; the worker does not retry.
    Failed(FetchError),

    /// Shutdown was requested.
    Cancelled,

    /// The rate gate stopped issuing admissions.
    GateClosed,

    /// The consumer side of the collector channel is gone.
    ChannelClosed,
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerExit::Failed(_))
    }
}

/// One fetch worker of the pool.
///
/// Loop:
/// 1. wait for an admission from the shared gate
/// 2. fetch and decode exactly one record
/// 3. record latency, then the completion, on the metrics sink
/// 4. hand the record to the collector channel (blocks while full)
///
/// The first failed fetch ends the loop. Siblings are not told and
/// nothing typed reaches the consumer; the exit value is the only
/// trace, and whoever supervises the worker decides what follows.
///
/// Every suspension point also watches the shutdown token.
pub struct FetchWorker {
    id: usize,
    source: Arc<dyn RecordSource>,
    gate: Arc<RateGate>,
    metrics: Arc<dyn MetricsSink>,
    output: mpsc::Sender<Record>,
    shutdown: CancellationToken,
}

impl FetchWorker {
    pub fn new(
        id: usize,
        source: Arc<dyn RecordSource>,
        gate: Arc<RateGate>,
        metrics: Arc<dyn MetricsSink>,
        output: mpsc::Sender<Record>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            source,
            gate,
            metrics,
            output,
            shutdown,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Runs the fetch loop until the first failure or shutdown.
    pub async fn run(&self) -> WorkerExit {
        let id = self.id;

        loop {
            // ------------------------------------------------
            // Admission
            // ------------------------------------------------
            let admitted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return WorkerExit::Cancelled,
                token = self.gate.admit() => token,
            };
            if admitted.is_none() {
                return WorkerExit::GateClosed;
            }
            let started = Instant::now();

            // ------------------------------------------------
            // Fetch + decode
            // ------------------------------------------------
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return WorkerExit::Cancelled,
                result = self.source.fetch(id) => result,
            };

            let record = match fetched {
                Ok(record) => record,
                Err(err) => {
                    log::warn!(
                        "worker {id} stopping after failed fetch from {}: {err}",
                        self.source.name()
                    );
                    self.metrics.record_failure(err.kind());
                    return WorkerExit::Failed(err);
                }
            };

            self.metrics
                .record_latency(started.elapsed().as_secs_f64());
            self.metrics.increment_completed();

            // ------------------------------------------------
            // Hand-off (backpressure: blocks while the channel is full)
            // ------------------------------------------------
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    log::debug!("worker {id} discarding record {} on shutdown", record.id);
                    return WorkerExit::Cancelled;
                }
                reserved = self.output.reserve() => match reserved {
                    Ok(permit) => permit,
                    Err(_) => return WorkerExit::ChannelClosed,
                },
            };
            permit.send(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FetchMetrics;
    use crate::pool::testing::{ScriptedSource, Step};
    use std::time::Duration;

    fn worker_with(
        source: Arc<dyn RecordSource>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (FetchWorker, mpsc::Receiver<Record>, Arc<FetchMetrics>) {
        let gate = Arc::new(RateGate::spawn(
            1,
            Duration::from_secs(1),
            1,
            shutdown.clone(),
        ));
        let metrics = Arc::new(FetchMetrics::new());
        let (tx, rx) = mpsc::channel(capacity);
        let worker = FetchWorker::new(7, source, gate, metrics.clone(), tx, shutdown);
        (worker, rx, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_records_until_the_first_failure() {
        let source = Arc::new(ScriptedSource::shared(vec![
            Step::ok("a", Duration::from_millis(100)),
            Step::ok("b", Duration::from_millis(100)),
            Step::transport_error(),
            Step::ok("never", Duration::ZERO),
        ]));
        let (worker, mut rx, metrics) = worker_with(source.clone(), 8, CancellationToken::new());

        let exit = worker.run().await;
        assert!(matches!(exit, WorkerExit::Failed(FetchError::Transport(_))));
        drop(worker);

        let mut ids = Vec::new();
        while let Some(record) = rx.recv().await {
            ids.push(record.id);
        }
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(metrics.completed(), 2);
        assert_eq!(metrics.snapshot().transport_errors, 1);
        assert_eq!(source.calls(), 3, "no retry after the failure");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_measured_from_admission() {
        let source = Arc::new(ScriptedSource::shared(vec![
            Step::ok("slow", Duration::from_millis(250)),
            Step::decode_error(),
        ]));
        let (worker, _rx, metrics) = worker_with(source, 8, CancellationToken::new());

        let exit = worker.run().await;
        assert!(matches!(exit, WorkerExit::Failed(FetchError::Decode(_))));

        let snap = metrics.snapshot();
        assert_eq!(snap.latency_count, 1);
        let mean = snap.mean_latency().unwrap();
        assert!((0.25..0.26).contains(&mean), "mean latency {mean}");
        assert_eq!(snap.decode_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_send_observes_shutdown() {
        let source = Arc::new(ScriptedSource::repeating(Duration::ZERO));
        let shutdown = CancellationToken::new();
        let (worker, rx, metrics) = worker_with(source, 1, shutdown.clone());

        let handle = tokio::spawn(async move { worker.run().await });

        // First record fills the channel, the second send blocks.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(rx.len(), 1);
        assert_eq!(metrics.completed(), 2);

        shutdown.cancel();
        assert!(matches!(handle.await.unwrap(), WorkerExit::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_fetch_drops_the_record() {
        let source = Arc::new(ScriptedSource::shared(vec![Step::ok(
            "late",
            Duration::from_secs(60),
        )]));
        let shutdown = CancellationToken::new();
        let (worker, mut rx, metrics) = worker_with(source.clone(), 8, shutdown.clone());

        let handle = tokio::spawn(async move { worker.run().await });

        // Admitted at 1s, fetch still outstanding at 1.5s.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(source.calls(), 1);

        shutdown.cancel();
        assert!(matches!(handle.await.unwrap(), WorkerExit::Cancelled));
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.completed(), 0);
        assert_eq!(metrics.snapshot().latency_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_consumer_ends_the_loop() {
        let source = Arc::new(ScriptedSource::repeating(Duration::ZERO));
        let (worker, rx, _metrics) = worker_with(source, 1, CancellationToken::new());
        drop(rx);
        assert!(matches!(worker.run().await, WorkerExit::ChannelClosed));
    }
}
