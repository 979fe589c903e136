use serde::Serialize;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

#[derive(Debug)]
struct InnerProgress {
    started: Instant,
    partitions_total: AtomicU64,
    partitions_succeeded: AtomicU64,
    partitions_failed: AtomicU64,
    rows_expected: AtomicU64,
    rows_transferred: AtomicU64,
    batches_loaded: AtomicU64,
    retries: AtomicU64,
}

/// Job-wide counters shared by every worker. Updates never block.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<InnerProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub rows_transferred: u64,
    pub rows_expected: u64,
    pub rows_per_sec: f64,
    pub eta: Option<Duration>,
    pub batches_loaded: u64,
    pub retries: u64,
    pub partitions_total: u64,
    pub partitions_succeeded: u64,
    pub partitions_failed: u64,
}

impl ProgressSnapshot {
    pub fn partitions_done(&self) -> u64 {
        self.partitions_succeeded + self.partitions_failed
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker {
            inner: Arc::new(InnerProgress {
                started: Instant::now(),
                partitions_total: AtomicU64::new(0),
                partitions_succeeded: AtomicU64::new(0),
                partitions_failed: AtomicU64::new(0),
                rows_expected: AtomicU64::new(0),
                rows_transferred: AtomicU64::new(0),
                batches_loaded: AtomicU64::new(0),
                retries: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_plan(&self, partitions: u64, rows_expected: u64) {
        self.inner
            .partitions_total
            .store(partitions, Ordering::Relaxed);
        self.inner
            .rows_expected
            .store(rows_expected, Ordering::Relaxed);
    }

    pub fn record_batch(&self, rows: u64) {
        self.inner
            .rows_transferred
            .fetch_add(rows, Ordering::Relaxed);
        self.inner.batches_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, count: u64) {
        self.inner.retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn partition_succeeded(&self) {
        self.inner
            .partitions_succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn partition_failed(&self) {
        self.inner.partitions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        let rows_transferred = self.inner.rows_transferred.load(Ordering::Relaxed);
        let rows_expected = self.inner.rows_expected.load(Ordering::Relaxed);

        let secs = elapsed.as_secs_f64();
        let rows_per_sec = if secs > 0.0 {
            rows_transferred as f64 / secs
        } else {
            0.0
        };

        let eta = (rows_per_sec > 0.0 && rows_expected > rows_transferred).then(|| {
            Duration::from_secs_f64((rows_expected - rows_transferred) as f64 / rows_per_sec)
        });

        ProgressSnapshot {
            elapsed,
            rows_transferred,
            rows_expected,
            rows_per_sec,
            eta,
            batches_loaded: self.inner.batches_loaded.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            partitions_total: self.inner.partitions_total.load(Ordering::Relaxed),
            partitions_succeeded: self.inner.partitions_succeeded.load(Ordering::Relaxed),
            partitions_failed: self.inner.partitions_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} rows, {:.0} rows/s, partitions {}/{} ({} failed), elapsed {:.1}s",
            self.rows_transferred,
            self.rows_expected,
            self.rows_per_sec,
            self.partitions_done(),
            self.partitions_total,
            self.partitions_failed,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(eta) = self.eta {
            write!(f, ", eta {:.0}s", eta.as_secs_f64())?;
        }
        Ok(())
    }
}
