use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use hdrhistogram::Histogram;
use tokio::sync::Mutex;
use tracing::info;

use crate::phase::{Timeline, UNATTRIBUTED};

struct Aggregator {
    histogram: Mutex<Histogram<u64>>,
    count: AtomicU64,
}

impl Aggregator {
    fn new() -> Self {
        Self {
            histogram: Mutex::new(Histogram::<u64>::new_with_bounds(1, 60_000, 3).unwrap()),
            count: AtomicU64::new(0),
        }
    }

    async fn record(&self, duration_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.histogram.lock().await.record(duration_ms).ok();
    }
}

struct PhaseSlot {
    name: String,
    nominal_secs: u64,
    agg: Aggregator,
}

struct Inner {
    phases: Vec<PhaseSlot>,
    overall: Aggregator,
    failed: AtomicU64,
    credential_failures: AtomicU64,
    active_vus: AtomicUsize,
}

/// Shared metrics router. Every sample lands in the overall aggregator
/// and, unless unattributed, in exactly one phase aggregator. Each
/// aggregator serializes its own updates; no cross-aggregator locking.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub name: String,
    pub nominal_secs: u64,
    pub count: u64,
    pub rate: f64,
    pub mean_ms: f64,
    pub p95_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub total: u64,
    pub failed: u64,
    pub failure_rate: f64,
    pub credential_failures: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
    pub phases: Vec<PhaseReport>,
}

impl Metrics {
    /// One aggregator per timeline stage plus the overall one. The keyed
    /// set is fixed at construction; `record` never creates new slots.
    pub fn new(timeline: &Timeline) -> Self {
        let phases = timeline
            .stages()
            .iter()
            .map(|s| PhaseSlot {
                name: s.name.clone(),
                nominal_secs: (s.end - s.start).max(1),
                agg: Aggregator::new(),
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                phases,
                overall: Aggregator::new(),
                failed: AtomicU64::new(0),
                credential_failures: AtomicU64::new(0),
                active_vus: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn record(&self, phase: &str, duration_ms: u64, passed: bool) {
        self.inner.overall.record(duration_ms).await;
        if !passed {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
        }
        if phase == UNATTRIBUTED {
            return;
        }
        if let Some(slot) = self.inner.phases.iter().find(|s| s.name == phase) {
            slot.agg.record(duration_ms).await;
        }
    }

    pub fn record_credential_failure(&self) {
        self.inner.credential_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vu_started(&self) {
        self.inner.active_vus.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vu_finished(&self) {
        self.inner.active_vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_vus(&self) -> usize {
        self.inner.active_vus.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.inner.overall.count.load(Ordering::Relaxed)
    }

    /// Percentiles come from the histogram's `value_at_quantile`, exact
    /// within its three-significant-figure resolution.
    pub async fn report(&self) -> RunReport {
        let mut phases = Vec::with_capacity(self.inner.phases.len());
        for slot in &self.inner.phases {
            let hist = slot.agg.histogram.lock().await;
            let count = slot.agg.count.load(Ordering::Relaxed);
            phases.push(PhaseReport {
                name: slot.name.clone(),
                nominal_secs: slot.nominal_secs,
                count,
                rate: count as f64 / slot.nominal_secs as f64,
                mean_ms: hist.mean(),
                p95_ms: hist.value_at_quantile(0.95),
            });
        }

        let overall = self.inner.overall.histogram.lock().await;
        let total = self.inner.overall.count.load(Ordering::Relaxed);
        let failed = self.inner.failed.load(Ordering::Relaxed);
        RunReport {
            total,
            failed,
            failure_rate: if total == 0 {
                0.0
            } else {
                failed as f64 / total as f64
            },
            credential_failures: self.inner.credential_failures.load(Ordering::Relaxed),
            mean_ms: overall.mean(),
            p50_ms: overall.value_at_quantile(0.50),
            p95_ms: overall.value_at_quantile(0.95),
            p99_ms: overall.value_at_quantile(0.99),
            max_ms: overall.max(),
            phases,
        }
    }

    pub async fn print_summary(&self) {
        let report = self.report().await;

        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                       RUN SUMMARY                          ║");
        info!("╚════════════════════════════════════════════════════════════╝");
        info!("");
        info!("Overall:");
        info!("  Requests:            {}", report.total);
        info!(
            "  Failed Checks:       {} ({:.2}%)",
            report.failed,
            report.failure_rate * 100.0
        );
        info!("  Credential Failures: {}", report.credential_failures);
        if report.total > 0 {
            info!("  Mean:   {:.2} ms", report.mean_ms);
            info!("  p50:    {} ms", report.p50_ms);
            info!("  p95:    {} ms", report.p95_ms);
            info!("  p99:    {} ms", report.p99_ms);
            info!("  Max:    {} ms", report.max_ms);
        } else {
            info!("  No data");
        }

        for phase in &report.phases {
            info!("");
            info!("Phase {} ({}s):", phase.name, phase.nominal_secs);
            if phase.count > 0 {
                info!("  Requests: {}", phase.count);
                info!("  Rate:     {:.1} req/s", phase.rate);
                info!("  Mean:     {:.2} ms", phase.mean_ms);
                info!("  p95:      {} ms", phase.p95_ms);
            } else {
                info!("  No data");
            }
        }

        info!("");
        info!("═══════════════════════════════════════════════════════════");
    }
}
