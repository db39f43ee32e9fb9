use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::attack::{worker, AttackContext};
use crate::outcome::Outcome;

/// Constant request rate: `freq` hits per `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub freq: u64,
    pub per: Duration,
}

impl Rate {
    pub fn new(freq: u64, per: Duration) -> Self {
        Self { freq, per }
    }

    pub fn per_second(freq: u64) -> Self {
        Self::new(freq, Duration::from_secs(1))
    }

    /// Interval between consecutive hits; zero for a degenerate rate.
    pub fn interval(&self) -> Duration {
        if self.freq == 0 || self.per.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.per.as_nanos() / u128::from(self.freq)) as u64)
    }

    /// Total hits over `duration`; 0 means unbounded.
    pub(crate) fn hits(&self, duration: Duration) -> u64 {
        if duration.is_zero() || self.per.is_zero() {
            return 0;
        }
        (duration.as_nanos() * u128::from(self.freq) / self.per.as_nanos()) as u64
    }
}

pub(crate) struct Pacer {
    interval: Duration,
    total_hits: u64,
}

impl Pacer {
    pub(crate) fn new(rate: Rate, duration: Duration) -> Self {
        Self { interval: rate.interval(), total_hits: rate.hits(duration) }
    }

    pub(crate) fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Absolute deadline offset of hit `seq`. Scheduling from the attack
    /// start keeps drift bounded; a late pacer issues back-to-back ticks
    /// until it catches up to wall time.
    fn tick_offset(&self, seq: u64) -> Duration {
        let nanos = self.interval.as_nanos().saturating_mul(u128::from(seq));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Drive one attack: emit gap-free sequence numbers on schedule, grow the
/// worker pool when every worker is busy, and close the result stream once
/// all workers have drained.
pub(crate) async fn run(
    ctx: Arc<AttackContext>,
    pacer: Pacer,
    initial_workers: usize,
    ticks_tx: flume::Sender<u64>,
    ticks_rx: flume::Receiver<u64>,
    results_tx: flume::Sender<Outcome>,
) {
    let tracker = TaskTracker::new();
    let mut workers = 0usize;
    for _ in 0..initial_workers {
        spawn_worker(&tracker, &mut workers, &ctx, &ticks_rx, &results_tx);
    }
    // Let the fresh workers park on the tick channel before the first hit.
    tokio::task::yield_now().await;

    let start = Instant::now();
    let mut seq: u64 = 0;
    loop {
        if pacer.total_hits > 0 && seq == pacer.total_hits {
            break;
        }
        sleep_until(start + pacer.tick_offset(seq)).await;
        if ctx.stop.is_cancelled() {
            break;
        }
        match ticks_tx.try_send(seq) {
            // A parked worker took the tick.
            Ok(()) => seq += 1,
            // Every worker is busy: grow the pool and retry the same tick.
            Err(flume::TrySendError::Full(_)) => {
                spawn_worker(&tracker, &mut workers, &ctx, &ticks_rx, &results_tx);
                tokio::task::yield_now().await;
            }
            Err(flume::TrySendError::Disconnected(_)) => break,
        }
    }

    drop(ticks_tx);
    drop(ticks_rx);
    tracker.close();
    tracker.wait().await;
    info!(attack = %ctx.name, hits = seq, workers, "attack finished");
    // results_tx drops here: the stream closes only after every worker exited.
}

fn spawn_worker(
    tracker: &TaskTracker,
    workers: &mut usize,
    ctx: &Arc<AttackContext>,
    ticks: &flume::Receiver<u64>,
    results: &flume::Sender<Outcome>,
) {
    *workers += 1;
    debug!(attack = %ctx.name, count = *workers, "spawning worker");
    tracker.spawn(worker::run(Arc::clone(ctx), ticks.clone(), results.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_divides_the_period() {
        assert_eq!(Rate::per_second(100).interval(), Duration::from_millis(10));
        assert_eq!(
            Rate::new(2, Duration::from_secs(1)).interval(),
            Duration::from_millis(500)
        );
        assert_eq!(Rate::per_second(0).interval(), Duration::ZERO);
    }

    #[test]
    fn hits_scale_with_duration() {
        assert_eq!(Rate::per_second(100).hits(Duration::from_secs(1)), 100);
        assert_eq!(Rate::per_second(50).hits(Duration::from_millis(2500)), 125);
        assert_eq!(Rate::per_second(100).hits(Duration::ZERO), 0);
    }

    #[test]
    fn offsets_are_absolute_multiples_of_the_interval() {
        let pacer = Pacer::new(Rate::per_second(10), Duration::from_secs(1));
        assert_eq!(pacer.total_hits(), 10);
        assert_eq!(pacer.tick_offset(0), Duration::ZERO);
        assert_eq!(pacer.tick_offset(7), Duration::from_millis(700));
    }
}
