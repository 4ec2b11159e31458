use core::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use std::collections::BTreeMap;

use crate::stat::{ErrorKind, MergedStats};

/// Final aggregate of one dispatch.
#[derive(Debug, Clone)]
pub struct Report {
    pub completed: u64,
    pub failed: u64,
    /// Wall time from barrier release to the last worker returning.
    pub elapsed: Duration,
    /// Completed requests per second over the whole run.
    pub throughput: f64,
    /// Latency summary over successful requests.
    pub latency: LatencySummary,
    /// Status code -> count.
    pub statuses: BTreeMap<u16, u64>,
    /// Error kind -> count.
    pub errors: BTreeMap<ErrorKind, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LatencySummary {
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub p999: Duration,
}

impl Report {
    pub fn build(stats: MergedStats, elapsed: Duration) -> Self {
        let mut latencies: Vec<u64> = stats
            .outcomes
            .iter()
            .filter(|outcome| outcome.is_success())
            .map(|outcome| outcome.latency_ns())
            .collect();
        latencies.sort_unstable();

        let throughput = match elapsed.as_secs_f64() {
            secs if secs > 0.0 => stats.completed as f64 / secs,
            _ => 0.0,
        };

        Self {
            completed: stats.completed,
            failed: stats.failed,
            elapsed,
            throughput,
            latency: LatencySummary::from_sorted(&latencies),
            statuses: stats.statuses,
            errors: stats.errors,
        }
    }
}

impl LatencySummary {
    fn from_sorted(sorted: &[u64]) -> Self {
        let mean = match sorted.len() {
            0 => 0,
            n => (sorted.iter().map(|&v| v as u128).sum::<u128>() / n as u128) as u64,
        };

        Self {
            min: Duration::from_nanos(sorted.first().copied().unwrap_or(0)),
            max: Duration::from_nanos(sorted.last().copied().unwrap_or(0)),
            mean: Duration::from_nanos(mean),
            p50: Duration::from_nanos(nearest_rank(sorted, 0.50)),
            p75: Duration::from_nanos(nearest_rank(sorted, 0.75)),
            p90: Duration::from_nanos(nearest_rank(sorted, 0.90)),
            p95: Duration::from_nanos(nearest_rank(sorted, 0.95)),
            p99: Duration::from_nanos(nearest_rank(sorted, 0.99)),
            p999: Duration::from_nanos(nearest_rank(sorted, 0.999)),
        }
    }
}

/// Nearest-rank percentile with ceil tie-break: p(q) = sorted[⌈q·n⌉ − 1].
fn nearest_rank(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }

    let rank = (q * sorted.len() as f64).ceil() as usize;

    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl Display for Report {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "completed:  {}", self.completed)?;
        writeln!(fmt, "failed:     {}", self.failed)?;
        writeln!(fmt, "elapsed:    {:.2?}", self.elapsed)?;
        writeln!(fmt, "throughput: {:.2} req/s", self.throughput)?;

        let lat = &self.latency;
        writeln!(fmt)?;
        writeln!(
            fmt,
            "latency:    min {:?} / mean {:?} / max {:?}",
            lat.min, lat.mean, lat.max
        )?;
        writeln!(
            fmt,
            "            p50 {:?}  p75 {:?}  p90 {:?}  p95 {:?}  p99 {:?}  p99.9 {:?}",
            lat.p50, lat.p75, lat.p90, lat.p95, lat.p99, lat.p999
        )?;

        if !self.statuses.is_empty() {
            writeln!(fmt)?;
            writeln!(fmt, "responses:")?;
            for (code, count) in &self.statuses {
                writeln!(fmt, "    {code}: {count}")?;
            }
        }

        if !self.errors.is_empty() {
            writeln!(fmt)?;
            writeln!(fmt, "errors:")?;
            for (kind, count) in &self.errors {
                writeln!(fmt, "    {kind}: {count}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::{RunCounters, StatsBuffer};

    fn merged(outcomes: &[(u64, u64, Result<u16, ErrorKind>)]) -> MergedStats {
        let counters = RunCounters::default();
        let mut buffer = StatsBuffer::with_capacity(outcomes.len());
        for &(begin, end, status) in outcomes {
            match status {
                Ok(code) => buffer.on_success(begin, end, code, &counters),
                Err(kind) => buffer.on_error(begin, end, kind, &counters),
            }
        }
        crate::stat::merge(vec![buffer])
    }

    #[test]
    fn nearest_rank_uses_ceil() {
        let sorted: Vec<u64> = (1..=100).collect();

        assert_eq!(nearest_rank(&sorted, 0.50), 50);
        assert_eq!(nearest_rank(&sorted, 0.75), 75);
        assert_eq!(nearest_rank(&sorted, 0.99), 99);
        assert_eq!(nearest_rank(&sorted, 0.999), 100);

        // ⌈0.5 · 3⌉ = 2, the middle element.
        assert_eq!(nearest_rank(&[10, 20, 30], 0.50), 20);
        assert_eq!(nearest_rank(&[10], 0.999), 10);
    }

    #[test]
    fn empty_run_reports_zeros() {
        let report = Report::build(MergedStats::default(), Duration::from_secs(1));

        assert_eq!(report.completed, 0);
        assert_eq!(report.latency.p50, Duration::ZERO);
        assert_eq!(report.latency.p999, Duration::ZERO);
        assert_eq!(report.latency.max, Duration::ZERO);
        assert_eq!(report.throughput, 0.0);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let outcomes: Vec<(u64, u64, Result<u16, ErrorKind>)> =
            (0..1000).map(|i| (i, i + 1 + (i * 7919) % 100_000, Ok(200))).collect();
        let report = Report::build(merged(&outcomes), Duration::from_secs(1));

        let lat = &report.latency;
        assert!(lat.p50 <= lat.p75);
        assert!(lat.p75 <= lat.p90);
        assert!(lat.p90 <= lat.p95);
        assert!(lat.p95 <= lat.p99);
        assert!(lat.p99 <= lat.p999);
        assert!(lat.p999 <= lat.max);
        assert!(lat.min <= lat.p50);
    }

    #[test]
    fn percentiles_skip_failed_samples() {
        let report = Report::build(
            merged(&[
                (0, 100, Ok(200)),
                (0, 200, Ok(200)),
                // A slow timeout must not drag the percentiles up.
                (0, 5_000_000_000, Err("read_timeout")),
            ]),
            Duration::from_secs(1),
        );

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.latency.max, Duration::from_nanos(200));
        assert_eq!(report.errors["read_timeout"], 1);
    }

    #[test]
    fn throughput_counts_completed_only() {
        let report = Report::build(
            merged(&[(0, 1, Ok(200)), (0, 1, Ok(200)), (0, 1, Err("connect"))]),
            Duration::from_secs(2),
        );

        assert!((report.throughput - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mean_is_arithmetic() {
        let report = Report::build(
            merged(&[(0, 100, Ok(200)), (0, 200, Ok(200)), (0, 300, Ok(200))]),
            Duration::from_secs(1),
        );

        assert_eq!(report.latency.mean, Duration::from_nanos(200));
    }
}
