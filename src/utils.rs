use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Cooperative stop signal shared between a running pipeline and whoever
/// wants to interrupt it. Pipelines only look at it on their reporting
/// interval, never mid-row.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Row counter that reports progress through `tracing` whenever an interval
/// boundary is crossed.
pub struct ProgressCounter {
    label: &'static str,
    interval: u64,
    total: Option<u64>,
    count: u64,
    started: Instant,
}

impl ProgressCounter {
    pub fn new(label: &'static str, interval: u64) -> Self {
        Self {
            label,
            interval: interval.max(1),
            total: None,
            count: 0,
            started: Instant::now(),
        }
    }

    /// Counter sized for a known row total, reporting once per percent.
    pub fn with_total(label: &'static str, total: u64) -> Self {
        let mut counter = Self::new(label, total / 100);
        counter.total = Some(total);
        counter
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Adds `delta` rows and returns true if an interval boundary was crossed.
    pub fn inc(&mut self, delta: u64) -> bool {
        let prev = self.count;
        self.count += delta;
        let crossed = prev / self.interval < self.count / self.interval;
        if crossed {
            self.report();
        }
        crossed
    }

    /// Rows per hour since the counter was created.
    pub fn rate_per_hour(&self) -> u64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }
        (self.count as f64 / elapsed * 3600.0).round() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn report(&self) {
        match self.total {
            Some(total) if total > 0 => tracing::info!(
                "{}: {} of {} ({:.0}%)",
                self.label,
                self.count,
                total,
                self.count as f64 / total as f64 * 100.0
            ),
            _ => tracing::info!(
                "{}: {} rows at a rate of {} per hour",
                self.label,
                self.count,
                self.rate_per_hour()
            ),
        }
    }

    pub fn finish(&self) {
        tracing::info!(
            "{}: {} rows in {:.2}s",
            self.label,
            self.count,
            self.elapsed_secs()
        );
    }
}
