use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shared admission gate for the whole worker pool.
///
/// A single ticker task drops one admission token into a bucket every
/// `period / max_rate`. Workers claim tokens competitively; whoever asks
/// first gets the next one (the receiver sits behind a fair mutex).
///
/// GUARANTEES:
/// - The bucket starts empty: the first admission is only available
///   after one full interval
/// - At most `burst` unclaimed tokens are held; further ticks are lost
/// - Tokens are only ever produced by ticks, so the pool never exceeds
///   `max_rate` admissions per `period` in aggregate
///
/// NOT GUARANTEED:
/// - Even spacing between the fetches of one particular worker
pub struct RateGate {
    tokens: Mutex<mpsc::Receiver<Instant>>,
    interval: Duration,
    burst: usize,
    ticker: JoinHandle<()>,
}

impl RateGate {
    /// Starts the ticker; it stops when `shutdown` fires or the gate is dropped.
    pub fn spawn(
        max_rate: u32,
        period: Duration,
        burst: usize,
        shutdown: CancellationToken,
    ) -> Self {
        // `interval_at` panics on a zero period.
        let interval = admission_interval(max_rate, period).max(Duration::from_nanos(1));
        let burst = burst.max(1);
        let (tx, rx) = mpsc::channel(burst);

        let ticker = tokio::spawn(run_ticker(tx, interval, shutdown));

        Self {
            tokens: Mutex::new(rx),
            interval,
            burst,
            ticker,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Waits for the next admission token.
    ///
    /// Returns the instant the token was issued, or `None` once the
    /// ticker has stopped and the bucket is empty.
    pub async fn admit(&self) -> Option<Instant> {
        let mut tokens = self.tokens.lock().await;
        tokens.recv().await
    }
}

impl Drop for RateGate {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Time between two admissions: `period / max_rate`.
pub fn admission_interval(max_rate: u32, period: Duration) -> Duration {
    period / max_rate.max(1)
}

async fn run_ticker(tx: mpsc::Sender<Instant>, interval: Duration, shutdown: CancellationToken) {
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            at = ticks.tick() => match tx.try_send(at) {
                Ok(()) => {}
                // Bucket full: nobody claimed earlier tokens, this one is lost.
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::trace!("admission at {at:?} dropped, bucket full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
        }
    }

    log::debug!("rate gate ticker stopped");
}
