use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

/// Stable error kind, attached to failed outcomes and keyed in the error
/// histogram.
pub type ErrorKind = &'static str;

/// A single finished request.
///
/// Timestamps are monotonic nanoseconds relative to the dispatch epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub begin_ns: u64,
    pub end_ns: u64,
    pub status: Result<u16, ErrorKind>,
}

impl Outcome {
    #[inline]
    pub fn latency_ns(&self) -> u64 {
        self.end_ns - self.begin_ns
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }
}

/// Shared run counters.
///
/// Bumped with relaxed stores from the workers and read only by the verbose
/// ticker; the authoritative numbers live in the per-worker buffers.
#[derive(Debug, Default)]
pub struct RunCounters {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    #[inline]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Per-worker outcome log.
///
/// Owned by exactly one worker for its lifetime, then moved to the
/// dispatcher for merging. Never shared.
#[derive(Debug, Default)]
pub struct StatsBuffer {
    completed: u64,
    failed: u64,
    outcomes: Vec<Outcome>,
    statuses: BTreeMap<u16, u64>,
    errors: BTreeMap<ErrorKind, u64>,
}

impl StatsBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    #[inline]
    pub fn on_success(&mut self, begin_ns: u64, end_ns: u64, code: u16, counters: &RunCounters) {
        self.completed += 1;
        self.outcomes.push(Outcome {
            begin_ns,
            end_ns,
            status: Ok(code),
        });
        *self.statuses.entry(code).or_insert(0) += 1;
        counters.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn on_error(&mut self, begin_ns: u64, end_ns: u64, kind: ErrorKind, counters: &RunCounters) {
        self.failed += 1;
        self.outcomes.push(Outcome {
            begin_ns,
            end_ns,
            status: Err(kind),
        });
        *self.errors.entry(kind).or_insert(0) += 1;
        counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    #[inline]
    pub fn failed(&self) -> u64 {
        self.failed
    }

    #[inline]
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }
}

/// All worker buffers combined, in worker-id order.
#[derive(Debug, Default)]
pub struct MergedStats {
    pub completed: u64,
    pub failed: u64,
    pub outcomes: Vec<Outcome>,
    pub statuses: BTreeMap<u16, u64>,
    pub errors: BTreeMap<ErrorKind, u64>,
}

/// Merges worker buffers.
///
/// The caller passes buffers in worker-id order; outcomes are concatenated
/// in that order with no sorting, making the merge deterministic and linear
/// in the total outcome count.
pub fn merge(buffers: Vec<StatsBuffer>) -> MergedStats {
    let total = buffers.iter().map(|b| b.outcomes.len()).sum();

    let mut merged = MergedStats {
        outcomes: Vec::with_capacity(total),
        ..Default::default()
    };

    for buffer in buffers {
        merged.completed += buffer.completed;
        merged.failed += buffer.failed;
        merged.outcomes.extend_from_slice(&buffer.outcomes);

        for (code, count) in buffer.statuses {
            *merged.statuses.entry(code).or_insert(0) += count;
        }
        for (kind, count) in buffer.errors {
            *merged.errors.entry(kind).or_insert(0) += count;
        }
    }

    merged
}
