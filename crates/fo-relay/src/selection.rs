//! Reduce the results of a broadcast to the single response returned

use fo_common::{BroadcastOutcome, JobResult, SelectionPolicy};

use crate::error::DispatchError;

/// Apply `policy` to `results`, which must be in completion order.
///
/// Every strategy returns the body of exactly one result; bodies are never
/// merged. Only `All` can turn downstream failures into an error.
pub fn select(
    policy: SelectionPolicy,
    mut results: Vec<JobResult>,
) -> Result<BroadcastOutcome, DispatchError> {
    let total = results.len();
    if total == 0 {
        return Err(DispatchError::NoEndpoints);
    }
    let failed = results.iter().filter(|r| r.is_failure()).count();

    let position = match policy {
        SelectionPolicy::LastCompleted => total - 1,
        SelectionPolicy::FirstSuccess => results
            .iter()
            .position(JobResult::is_success)
            .unwrap_or(total - 1),
        SelectionPolicy::All => {
            let unsuccessful = results.iter().filter(|r| !r.is_success()).count();
            if unsuccessful > 0 {
                return Err(DispatchError::PartialFailure {
                    failed: unsuccessful,
                    total,
                });
            }
            total - 1
        }
    };

    let chosen = results.swap_remove(position);
    Ok(BroadcastOutcome::from_result(chosen, total, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fo_common::{BroadcastRequest, DispatchJob, JobFailure, ServiceEndpoint};
    use reqwest::Method;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(index: usize) -> DispatchJob {
        let request = Arc::new(BroadcastRequest::new(Method::POST, "/hook", Bytes::new()));
        DispatchJob::new(index, ServiceEndpoint::new(format!("10.0.0.{}", index), 80), request)
    }

    fn ok(index: usize, status: u16, body: &'static str) -> JobResult {
        JobResult::completed(
            &job(index),
            status,
            None,
            Bytes::from_static(body.as_bytes()),
            Duration::from_millis(1),
        )
    }

    fn err(index: usize) -> JobResult {
        JobResult::failed(
            &job(index),
            JobFailure::Transport("connection refused".to_string()),
            Duration::from_millis(1),
        )
    }

    fn in_completion_order(results: Vec<JobResult>) -> Vec<JobResult> {
        results
            .into_iter()
            .enumerate()
            .map(|(completion, mut r)| {
                r.completion = completion;
                r
            })
            .collect()
    }

    #[test]
    fn test_last_completed_picks_last() {
        let results = in_completion_order(vec![ok(1, 200, "A"), ok(0, 200, "B")]);
        let outcome = select(SelectionPolicy::LastCompleted, results).unwrap();
        assert_eq!(outcome.body, "B");
        assert_eq!(outcome.selected, 0);
        assert_eq!(outcome.total, 2);
    }

    #[test]
    fn test_last_completed_may_pick_failure() {
        let results = in_completion_order(vec![ok(0, 200, "A"), err(1)]);
        let outcome = select(SelectionPolicy::LastCompleted, results).unwrap();
        assert!(outcome.body.is_empty());
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.status, None);
    }

    #[test]
    fn test_all_failed_is_empty_body_not_error() {
        let results = in_completion_order(vec![err(0), err(1), err(2)]);
        let outcome = select(SelectionPolicy::LastCompleted, results).unwrap();
        assert!(outcome.body.is_empty());
        assert_eq!(outcome.failed, 3);
    }

    #[test]
    fn test_first_success_skips_failures_and_errors() {
        let results = in_completion_order(vec![err(0), ok(1, 500, "oops"), ok(2, 200, "A"), ok(3, 200, "B")]);
        let outcome = select(SelectionPolicy::FirstSuccess, results).unwrap();
        assert_eq!(outcome.body, "A");
        assert_eq!(outcome.selected, 2);
    }

    #[test]
    fn test_first_success_falls_back_to_last() {
        let results = in_completion_order(vec![ok(0, 503, "busy"), err(1)]);
        let outcome = select(SelectionPolicy::FirstSuccess, results).unwrap();
        assert_eq!(outcome.selected, 1);
        assert!(outcome.body.is_empty());
    }

    #[test]
    fn test_all_requires_every_success() {
        let results = in_completion_order(vec![ok(0, 200, "A"), ok(1, 204, "")]);
        let outcome = select(SelectionPolicy::All, results).unwrap();
        assert_eq!(outcome.selected, 1);

        let results = in_completion_order(vec![ok(0, 200, "A"), ok(1, 500, "x"), err(2)]);
        match select(SelectionPolicy::All, results) {
            Err(DispatchError::PartialFailure { failed, total }) => {
                assert_eq!(failed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
    }

    #[test]
    fn test_no_results_is_an_error() {
        assert!(matches!(
            select(SelectionPolicy::LastCompleted, Vec::new()),
            Err(DispatchError::NoEndpoints)
        ));
    }
}
