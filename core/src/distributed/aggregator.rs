// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Aggregator (§4.8): folds a test's per-worker results into one
//! [`AggregatedResult`], upserted on every `SubmitResult` for that test.

use chrono::Utc;

use crate::distributed::types::{
    AggregatedResult, AggregatedStatus, StatusCodeHistogram, TestId, TestResult,
};

/// Compute the aggregate for `test_id` from its current result set.
///
/// Returns `None` if `results` is empty — there is nothing to aggregate yet.
/// Re-running on an unchanged `results` slice yields a value equal in every
/// field but `completed_at` (§8 invariant 7: idempotent modulo timestamp).
pub fn aggregate(test_id: &TestId, results: &[TestResult]) -> Option<AggregatedResult> {
    if results.is_empty() {
        return None;
    }

    let n = results.len() as f64;
    let total_requests: u64 = results.iter().map(|r| r.total_requests).sum();
    let successful_requests: u64 = results.iter().map(|r| r.completed_requests).sum();
    let failed_requests = total_requests.saturating_sub(successful_requests);

    let avg_latency_ms = results.iter().map(|r| r.average_latency_ms).sum::<f64>() / n;
    let p95_latency_ms = results.iter().map(|r| r.p95_latency_ms).sum::<f64>() / n;
    let avg_duration_ms = results.iter().map(|r| r.duration_ms as f64).sum::<f64>() / n;

    let mut error_rate_histogram: StatusCodeHistogram = StatusCodeHistogram::new();
    for result in results {
        for (code, count) in &result.status_code_counts {
            if !code.starts_with('2') {
                *error_rate_histogram.entry(code.clone()).or_insert(0) += count;
            }
        }
    }

    let overall_status = if failed_requests > 0 {
        AggregatedStatus::CompletedWithErrors
    } else {
        AggregatedStatus::CompletedSuccess
    };

    Some(AggregatedResult {
        test_id: test_id.clone(),
        total_requests,
        successful_requests,
        failed_requests,
        avg_latency_ms,
        p95_latency_ms,
        error_rate_histogram,
        avg_duration_ms,
        overall_status,
        completed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn result(worker_id: &str, total: u64, completed: u64, codes: &[(&str, u64)]) -> TestResult {
        TestResult {
            id: format!("r-{worker_id}"),
            test_id: "t1".into(),
            worker_id: worker_id.into(),
            engine_metrics_base64: String::new(),
            timestamp: Utc::now(),
            total_requests: total,
            completed_requests: completed,
            duration_ms: 1000,
            success_rate: completed as f64 / total as f64,
            average_latency_ms: 50.0,
            p95_latency_ms: 80.0,
            status_code_counts: codes
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn empty_results_yield_no_aggregate() {
        assert!(aggregate(&"t1".to_string(), &[]).is_none());
    }

    #[test]
    fn sums_totals_and_latencies_across_workers() {
        let results = vec![
            result("w1", 10, 10, &[("200", 10)]),
            result("w2", 10, 10, &[("200", 10)]),
            result("w3", 10, 10, &[("200", 10)]),
        ];
        let agg = aggregate(&"t1".to_string(), &results).unwrap();
        assert_eq!(agg.total_requests, 30);
        assert_eq!(agg.successful_requests, 30);
        assert_eq!(agg.failed_requests, 0);
        assert_eq!(agg.avg_latency_ms, 50.0);
        assert_eq!(agg.overall_status, AggregatedStatus::CompletedSuccess);
    }

    #[test]
    fn non_2xx_codes_feed_error_histogram() {
        let results = vec![
            result("w1", 10, 8, &[("200", 8), ("500", 2)]),
            result("w2", 10, 10, &[("200", 10)]),
        ];
        let agg = aggregate(&"t1".to_string(), &results).unwrap();
        assert_eq!(agg.failed_requests, 2);
        assert_eq!(agg.error_rate_histogram.get("500"), Some(&2));
        assert!(agg.error_rate_histogram.get("200").is_none());
        assert_eq!(agg.overall_status, AggregatedStatus::CompletedWithErrors);
    }

    #[test]
    fn aggregate_is_idempotent_modulo_timestamp() {
        let results = vec![result("w1", 10, 10, &[("200", 10)])];
        let first = aggregate(&"t1".to_string(), &results).unwrap();
        let second = aggregate(&"t1".to_string(), &results).unwrap();
        assert_eq!(first.total_requests, second.total_requests);
        assert_eq!(first.avg_latency_ms, second.avg_latency_ms);
        assert_eq!(first.overall_status, second.overall_status);
    }
}
