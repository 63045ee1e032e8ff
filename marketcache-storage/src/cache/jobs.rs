//! Cache Maintenance Background Tasks
//!
//! Two periodic tasks, both optional for correctness:
//!
//! - [`memory_eviction_task`]: trims the memory tier when it grows past its
//!   configured capacity (oldest entries first).
//! - [`compaction_task`]: deletes durable records that are stale under their
//!   own stored TTL, or that no longer decode. Reads already expire records
//!   lazily; compaction only reclaims space for keys nobody reads again.
//!
//! Both run until the shutdown watch channel carries `true` (or its sender
//! is dropped) and return their metrics.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let jobs = cache.spawn_background_jobs(&settings, shutdown_rx);
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let (eviction, compaction) = jobs.join().await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::durable::DurableStore;
use super::memory::MemoryTier;
use super::tier::DurableCacheTier;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the memory eviction task.
#[derive(Debug, Default)]
pub struct EvictionMetrics {
    /// Eviction passes run.
    pub passes: AtomicU64,
    /// Entries removed across all passes.
    pub entries_evicted: AtomicU64,
}

impl EvictionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EvictionSnapshot {
        EvictionSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionSnapshot {
    pub passes: u64,
    pub entries_evicted: u64,
}

/// Counters for the durable compaction task.
#[derive(Debug, Default)]
pub struct CompactionMetrics {
    /// Compaction passes run (one pass covers every configured collection).
    pub passes: AtomicU64,
    pub records_scanned: AtomicU64,
    pub records_removed: AtomicU64,
}

impl CompactionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CompactionSnapshot {
        CompactionSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionSnapshot {
    pub passes: u64,
    pub records_scanned: u64,
    pub records_removed: u64,
}

// ============================================================================
// HANDLES
// ============================================================================

/// Handles to spawned maintenance tasks.
#[derive(Debug)]
pub struct BackgroundJobs {
    eviction: JoinHandle<Arc<EvictionMetrics>>,
    compaction: Option<JoinHandle<Arc<CompactionMetrics>>>,
}

impl BackgroundJobs {
    pub(crate) fn new(
        eviction: JoinHandle<Arc<EvictionMetrics>>,
        compaction: Option<JoinHandle<Arc<CompactionMetrics>>>,
    ) -> Self {
        Self {
            eviction,
            compaction,
        }
    }

    /// Whether a compaction task was spawned.
    pub fn has_compaction(&self) -> bool {
        self.compaction.is_some()
    }

    /// Wait for the tasks to stop and collect their final metrics.
    ///
    /// Call after signalling shutdown. A task that panicked or was aborted
    /// reports default (zero) metrics.
    pub async fn join(self) -> (EvictionSnapshot, Option<CompactionSnapshot>) {
        let eviction = match self.eviction.await {
            Ok(metrics) => metrics.snapshot(),
            Err(e) => {
                tracing::error!(error = %e, "Memory eviction task did not finish cleanly");
                EvictionSnapshot::default()
            }
        };

        let compaction = match self.compaction {
            Some(handle) => Some(match handle.await {
                Ok(metrics) => metrics.snapshot(),
                Err(e) => {
                    tracing::error!(error = %e, "Compaction task did not finish cleanly");
                    CompactionSnapshot::default()
                }
            }),
            None => None,
        };

        (eviction, compaction)
    }

    /// Abort both tasks without waiting.
    pub fn abort(&self) {
        self.eviction.abort();
        if let Some(handle) = &self.compaction {
            handle.abort();
        }
    }
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

/// Period used in place of a zero interval, which `tokio::time::interval` rejects.
pub const MIN_JOB_INTERVAL: Duration = Duration::from_secs(1);

fn job_ticker(every: Duration, job: &'static str) -> Interval {
    let every = if every.is_zero() {
        tracing::warn!(
            job,
            fallback_ms = MIN_JOB_INTERVAL.as_millis() as u64,
            "Zero job interval, using fallback"
        );
        MIN_JOB_INTERVAL
    } else {
        every
    };

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Periodically trim `memory` back under its capacity.
///
/// The first pass runs immediately.
pub async fn memory_eviction_task(
    memory: Arc<MemoryTier>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<EvictionMetrics> {
    let metrics = Arc::new(EvictionMetrics::new());

    let mut ticker = job_ticker(every, "memory_eviction");

    tracing::info!(
        interval_secs = ticker.period().as_secs(),
        max_entries = memory.max_entries(),
        "Memory eviction task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Memory eviction task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_eviction_pass(&memory, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        passes = snapshot.passes,
        entries_evicted = snapshot.entries_evicted,
        "Memory eviction task completed"
    );

    metrics
}

/// Run one eviction pass and record it. Returns the number of entries removed.
pub fn run_eviction_pass(memory: &MemoryTier, metrics: &EvictionMetrics) -> usize {
    metrics.passes.fetch_add(1, Ordering::Relaxed);

    let before = memory.len();
    let removed = memory.evict_if_over_capacity();

    if removed > 0 {
        metrics
            .entries_evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::info!(
            before,
            removed,
            max_entries = memory.max_entries(),
            "Memory eviction pass completed"
        );
    } else {
        tracing::trace!(entries = before, "Memory tier under capacity, nothing evicted");
    }

    removed
}

/// Periodically compact `collections` in the durable tier.
///
/// The first pass runs immediately.
pub async fn compaction_task<S: DurableStore>(
    tier: DurableCacheTier<S>,
    collections: Vec<String>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CompactionMetrics> {
    let metrics = Arc::new(CompactionMetrics::new());

    let mut ticker = job_ticker(every, "durable_compaction");

    tracing::info!(
        interval_secs = ticker.period().as_secs(),
        collections = ?collections,
        "Durable compaction task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Durable compaction task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_compaction_pass(&tier, &collections, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        passes = snapshot.passes,
        records_scanned = snapshot.records_scanned,
        records_removed = snapshot.records_removed,
        "Durable compaction task completed"
    );

    metrics
}

/// Compact every collection once. Returns the number of records removed.
pub async fn run_compaction_pass<S: DurableStore>(
    tier: &DurableCacheTier<S>,
    collections: &[String],
    metrics: &CompactionMetrics,
) -> u64 {
    metrics.passes.fetch_add(1, Ordering::Relaxed);

    let mut removed = 0u64;
    for collection in collections {
        let report = tier.compact(collection).await;
        metrics
            .records_scanned
            .fetch_add(report.scanned, Ordering::Relaxed);
        metrics
            .records_removed
            .fetch_add(report.removed, Ordering::Relaxed);

        if report.removed > 0 {
            tracing::info!(
                collection = %collection,
                scanned = report.scanned,
                removed = report.removed,
                "Compacted durable collection"
            );
        } else {
            tracing::trace!(collection = %collection, scanned = report.scanned, "Nothing to compact");
        }
        removed += report.removed;
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::durable::InMemoryDurableStore;
    use marketcache_core::{Clock, ManualClock};
    use serde_json::json;

    fn filled_memory(count: usize, max: usize) -> Arc<MemoryTier> {
        let clock = ManualClock::starting_now();
        let memory = MemoryTier::new(Arc::new(clock.clone()), Duration::from_secs(60), max);
        for i in 0..count {
            memory.set(format!("k{i}"), json!(i));
            clock.advance_ms(1);
        }
        Arc::new(memory)
    }

    #[test]
    fn test_eviction_pass_metrics() {
        let memory = filled_memory(10, 8);
        let metrics = EvictionMetrics::new();

        assert_eq!(run_eviction_pass(&memory, &metrics), 2);
        assert_eq!(run_eviction_pass(&memory, &metrics), 0);

        assert_eq!(
            metrics.snapshot(),
            EvictionSnapshot {
                passes: 2,
                entries_evicted: 2
            }
        );
    }

    #[tokio::test]
    async fn test_compaction_pass_covers_each_collection() {
        let clock = ManualClock::starting_now();
        let handle: Arc<dyn Clock> = Arc::new(clock.clone());
        let tier = DurableCacheTier::new(Arc::new(InMemoryDurableStore::new()), handle);

        assert!(tier.put("holders", "a", json!(1), 10).await);
        assert!(tier.put("trades", "b", json!(2), 10).await);
        assert!(tier.put("prices", "c", json!(3), 10).await);
        clock.advance_ms(50);

        let metrics = CompactionMetrics::new();
        let collections = vec!["holders".to_string(), "trades".to_string()];
        assert_eq!(run_compaction_pass(&tier, &collections, &metrics).await, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.passes, 1);
        assert_eq!(snap.records_scanned, 2);
        assert_eq!(snap.records_removed, 2);
        assert_eq!(tier.store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_runs_until_shutdown() {
        let memory = filled_memory(10, 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(memory_eviction_task(
            Arc::clone(&memory),
            Duration::from_secs(300),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();

        assert!(metrics.passes >= 1);
        assert_eq!(metrics.entries_evicted, 2);
        assert_eq!(memory.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_sender_dropped() {
        let memory = filled_memory(1, 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(memory_eviction_task(memory, Duration::from_secs(1), shutdown_rx));
        drop(shutdown_tx);

        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.entries_evicted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_falls_back_instead_of_panicking() {
        let memory = filled_memory(10, 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(memory_eviction_task(
            Arc::clone(&memory),
            Duration::ZERO,
            shutdown_rx,
        ));

        // Immediate pass, then one per fallback period.
        tokio::time::sleep(MIN_JOB_INTERVAL * 2 + Duration::from_millis(1)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();

        assert!(metrics.passes >= 2);
        assert_eq!(memory.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compaction_task_runs_until_shutdown() {
        let clock = ManualClock::starting_now();
        let handle: Arc<dyn Clock> = Arc::new(clock.clone());
        let tier = DurableCacheTier::new(Arc::new(InMemoryDurableStore::new()), handle);
        assert!(tier.put("holders", "old", json!(1), 5).await);
        assert!(tier.put("holders", "new", json!(2), 600_000).await);
        clock.advance_ms(10);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(compaction_task(
            tier.clone(),
            vec!["holders".to_string()],
            Duration::from_secs(60),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = task.await.unwrap().snapshot();

        assert!(metrics.passes >= 1);
        assert_eq!(metrics.records_removed, 1);
        assert_eq!(tier.store().len(), 1);
    }
}
