//! Two-point sampling of cumulative counters
//!
//! Deltas are raw subtractions: a server restart between the two snapshots can
//! produce a negative delta, which is returned as-is.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::snapshot::{self, MetricFilter, MetricSnapshot, SnapshotView};
use super::{DiagnosticError, QueryExecutor};

/// Two snapshots of the same view, `second` taken after `first`
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub first: MetricSnapshot,
    pub second: MetricSnapshot,
    pub interval: Duration,
}

impl MetricSample {
    pub fn new(first: MetricSnapshot, second: MetricSnapshot, interval: Duration) -> Self {
        Self {
            first,
            second,
            interval,
        }
    }

    /// `second[name] - first[name]`, absent values count as zero
    pub fn delta(&self, name: &str) -> i64 {
        self.second
            .integer_or_zero(name)
            .saturating_sub(self.first.integer_or_zero(name))
    }

    pub fn sum_delta(&self, names: &[&str]) -> i64 {
        names
            .iter()
            .fold(0i64, |acc, name| acc.saturating_add(self.delta(name)))
    }

    /// Sum of numerator deltas over sum of denominator deltas; 0.0 when the denominator is zero
    pub fn ratio(&self, numerators: &[&str], denominators: &[&str]) -> f64 {
        let denominator = self.sum_delta(denominators);
        if denominator == 0 {
            return 0.0;
        }
        self.sum_delta(numerators) as f64 / denominator as f64
    }

    /// Per-second rate of one counter over the sampling interval
    pub fn rate(&self, name: &str) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delta(name) as f64 / secs
    }
}

/// Sleep for `interval` unless the token fires first
pub async fn wait(interval: Duration, cancel: &CancellationToken) -> Result<(), DiagnosticError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiagnosticError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Capture `view`, wait `interval`, capture it again
pub async fn sample(
    executor: &mut dyn QueryExecutor,
    view: SnapshotView,
    filter: Option<&MetricFilter>,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<MetricSample, DiagnosticError> {
    let first = snapshot::read(executor, view, filter).await?;
    tracing::debug!("Waiting {:?} before second {:?} snapshot", interval, view);
    wait(interval, cancel).await?;
    let second = snapshot::read(executor, view, filter).await?;
    Ok(MetricSample::new(first, second, interval))
}

#[cfg(test)]
mod tests {
    use super::super::test_providers::*;
    use super::*;

    fn sample_of(first: &[(&str, &str)], second: &[(&str, &str)]) -> MetricSample {
        MetricSample::new(
            MetricSnapshot::from_pairs(first.iter().copied()),
            MetricSnapshot::from_pairs(second.iter().copied()),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_delta_of_identical_snapshots_is_zero() {
        let pairs = [("Select_scan", "120"), ("Sort_merge_passes", "3"), ("Uptime", "x")];
        let sample = sample_of(&pairs, &pairs);
        for (name, _) in pairs {
            assert_eq!(sample.delta(name), 0);
        }
    }

    #[test]
    fn test_delta_defaults_absent_to_zero() {
        let sample = sample_of(&[("a", "10")], &[("b", "4")]);
        assert_eq!(sample.delta("a"), -10);
        assert_eq!(sample.delta("b"), 4);
        assert_eq!(sample.delta("missing"), 0);
    }

    #[test]
    fn test_negative_delta_is_not_clamped() {
        let sample = sample_of(&[("Select_scan", "500")], &[("Select_scan", "20")]);
        assert_eq!(sample.delta("Select_scan"), -480);
    }

    #[test]
    fn test_ratio_of_deltas() {
        let sample = sample_of(
            &[("rnd", "10"), ("rnd_next", "10"), ("key", "100")],
            &[("rnd", "20"), ("rnd_next", "40"), ("key", "200")],
        );
        let ratio = sample.ratio(&["rnd", "rnd_next"], &["key"]);
        assert!((ratio - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_self_ratio_is_zero_sentinel() {
        let pairs = [("rnd", "10"), ("key", "100")];
        let sample = sample_of(&pairs, &pairs);
        assert_eq!(sample.ratio(&["rnd"], &["key"]), 0.0);
    }

    #[test]
    fn test_rate() {
        let sample = sample_of(&[("q", "100")], &[("q", "150")]);
        assert_eq!(sample.rate("q"), 10.0);
    }

    #[tokio::test]
    async fn test_sample_reads_twice() {
        let mut executor = MockExecutor::new().with_sequence(
            "global_status",
            vec![
                variable_rows(&[("Created_tmp_disk_tables", "10")]),
                variable_rows(&[("Created_tmp_disk_tables", "35")]),
            ],
        );
        let cancel = CancellationToken::new();
        let sample = sample(
            &mut executor,
            SnapshotView::GlobalStatus,
            None,
            Duration::ZERO,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(sample.delta("Created_tmp_disk_tables"), 25);
        assert_eq!(executor.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sample_cancelled_during_wait() {
        let mut executor = MockExecutor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = sample(
            &mut executor,
            SnapshotView::GlobalStatus,
            None,
            Duration::from_secs(3600),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(DiagnosticError::Cancelled)));
        assert_eq!(executor.executed.lock().unwrap().len(), 1);
    }
}
