use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Byte-level position within a compressed input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadProgress {
    pub total_bytes: u64,
    pub current_bytes: u64,
}

/// Cheap handle onto a reader's byte counter. The reader thread owns the
/// writing side; any number of clones may take snapshots.
#[derive(Debug, Clone)]
pub struct ProgressWatch {
    total_bytes: u64,
    current: Arc<AtomicU64>,
}

impl ProgressWatch {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The counter the producing thread increments as it consumes input.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current)
    }

    pub fn snapshot(&self) -> ReadProgress {
        ReadProgress {
            total_bytes: self.total_bytes,
            current_bytes: self.current.load(Ordering::Relaxed),
        }
    }
}

/// Gates progress callbacks to a refresh interval and computes the
/// records-per-second rate since the stage started.
pub struct ProgressThrottle {
    start: Instant,
    last: Instant,
    refresh_rate: Duration,
}

impl ProgressThrottle {
    pub fn new(refresh_rate: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            refresh_rate,
        }
    }

    /// Invoke `sink` if the refresh interval elapsed, or unconditionally
    /// when `force` is set (used for the final tick of a stage).
    pub fn tick(
        &mut self,
        count: usize,
        read: ReadProgress,
        sink: &mut impl FnMut(usize, f64, ReadProgress),
        force: bool,
    ) {
        let now = Instant::now();
        if force || now.duration_since(self.last) >= self.refresh_rate {
            let seconds = now.duration_since(self.start).as_secs_f64().max(1e-6);
            sink(count, count as f64 / seconds, read);
            self.last = now;
        }
    }
}

/// Snapshot of CSR construction progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphBuildProgress {
    pub processed_edges: u64,
    pub total_edges: u64,
    pub edges_per_second: u64,
}

/// Snapshot of a running breadth-first search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BfsProgress {
    pub current_layer: u32,
    pub layer_size: u32,
    pub layer_explored: u32,
    pub total_explored: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Pages,
    LinkTargets,
    Links,
    Graph,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadStage::Pages => "pages",
            LoadStage::LinkTargets => "linktargets",
            LoadStage::Links => "links",
            LoadStage::Graph => "graph",
        };
        f.write_str(name)
    }
}

/// Events published by the loader pipeline for UI consumption.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    StageStarted(LoadStage),
    Records {
        stage: LoadStage,
        count: usize,
        per_second: f64,
        read: ReadProgress,
    },
    GraphBuild(GraphBuildProgress),
    StageFinished {
        stage: LoadStage,
        duration: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_snapshot_reflects_counter() {
        let watch = ProgressWatch::new(1000);
        assert_eq!(
            watch.snapshot(),
            ReadProgress {
                total_bytes: 1000,
                current_bytes: 0
            }
        );

        watch.counter().store(250, Ordering::Relaxed);
        assert_eq!(watch.snapshot().current_bytes, 250);
    }

    #[test]
    fn throttle_suppresses_rapid_ticks() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(3600));
        let calls = std::cell::Cell::new(0);
        let mut sink = |_count: usize, _rate: f64, _read: ReadProgress| calls.set(calls.get() + 1);

        for i in 0..100 {
            throttle.tick(i, ReadProgress::default(), &mut sink, false);
        }
        assert_eq!(calls.get(), 0);

        throttle.tick(100, ReadProgress::default(), &mut sink, true);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn forced_tick_reports_final_count() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(3600));
        let mut seen = None;
        let mut sink = |count: usize, rate: f64, _read: ReadProgress| seen = Some((count, rate));

        throttle.tick(42, ReadProgress::default(), &mut sink, true);
        let (count, rate) = seen.expect("forced tick must fire");
        assert_eq!(count, 42);
        assert!(rate > 0.0);
    }

    #[test]
    fn zero_interval_throttle_always_fires() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        let mut calls = 0;
        let mut sink = |_count: usize, _rate: f64, _read: ReadProgress| calls += 1;

        throttle.tick(1, ReadProgress::default(), &mut sink, false);
        throttle.tick(2, ReadProgress::default(), &mut sink, false);
        assert_eq!(calls, 2);
    }
}
