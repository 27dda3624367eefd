//! Average response time of a fixed CPU-bound statement

use std::time::Instant;

use super::sample;
use super::thresholds::{classify_finding, AVERAGE_RESPONSE_MS};
use super::{DiagnosticContext, DiagnosticError, Finding, QueryExecutor};

pub const BENCHMARK_STATEMENT: &str =
    "SELECT BENCHMARK(1000000,AES_ENCRYPT('hello','GreatSQL'))";

pub const METRIC_NAME: &str = "avg_response_ms";

/// Run the benchmark statement `benchmark_iterations` times and return the mean in milliseconds
pub async fn measure_average(
    executor: &mut dyn QueryExecutor,
    context: &DiagnosticContext,
) -> Result<f64, DiagnosticError> {
    let iterations = context.settings.benchmark_iterations;
    if iterations == 0 {
        return Err(DiagnosticError::InvalidParameter(
            "benchmark_iterations must be at least 1".to_string(),
        ));
    }

    let mut total_ms = 0.0;
    for i in 0..iterations {
        let started = Instant::now();
        executor.fetch_rows(BENCHMARK_STATEMENT).await?;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!("Benchmark iteration {} took {:.2}ms", i + 1, elapsed);
        total_ms += elapsed;

        if i + 1 < iterations {
            sample::wait(context.settings.benchmark_pause(), &context.cancel).await?;
        }
    }

    Ok(total_ms / f64::from(iterations))
}

pub fn classify_average(avg_ms: f64) -> Option<Finding> {
    classify_finding("avg_response_time", avg_ms, AVERAGE_RESPONSE_MS, |_| {
        format!("Average SQL response time is {:.2}ms", avg_ms)
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_providers::*;
    use super::super::{DiagnosticSettings, Severity};
    use super::*;

    #[test]
    fn test_classify_average() {
        assert_eq!(
            classify_average(75.0).unwrap().severity,
            Severity::Critical
        );
        assert_eq!(
            classify_average(12.5).unwrap().severity,
            Severity::Warning
        );
        assert!(classify_average(3.0).is_none());
        assert!(classify_average(12.5).unwrap().message.contains("12.50ms"));
    }

    #[tokio::test]
    async fn test_measure_runs_configured_iterations() {
        let mut executor = MockExecutor::new();
        let avg = measure_average(&mut executor, &fast_context()).await.unwrap();

        assert!(avg >= 0.0);
        let executed = executor.executed.lock().unwrap();
        assert_eq!(executed.len(), 3);
        assert!(executed.iter().all(|sql| sql == BENCHMARK_STATEMENT));
    }

    #[tokio::test]
    async fn test_measure_propagates_failure() {
        let mut executor = MockExecutor::new().with_failure("BENCHMARK", "Access denied");
        let result = measure_average(&mut executor, &fast_context()).await;
        assert!(matches!(result, Err(DiagnosticError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn test_measure_cancelled_between_iterations() {
        let mut executor = MockExecutor::new();
        let context = DiagnosticContext::new(DiagnosticSettings {
            sample_interval_secs: 0,
            benchmark_iterations: 5,
            benchmark_pause_ms: 60_000,
        });
        context.cancel.cancel();

        let result = measure_average(&mut executor, &context).await;
        assert!(matches!(result, Err(DiagnosticError::Cancelled)));
        assert_eq!(executor.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_iterations_rejected() {
        let mut executor = MockExecutor::new();
        let context = DiagnosticContext::new(DiagnosticSettings {
            sample_interval_secs: 0,
            benchmark_iterations: 0,
            benchmark_pause_ms: 0,
        });
        let result = measure_average(&mut executor, &context).await;
        assert!(matches!(result, Err(DiagnosticError::InvalidParameter(_))));
    }
}
