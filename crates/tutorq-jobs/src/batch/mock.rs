//! Mock batch API for deterministic testing.
//!
//! Batches stay running until the test script completes, expires or fails
//! them, so reconciliation can be driven step by step.
//!
//! ```rust,ignore
//! let api = MockBatchApi::new();
//! let batch_id = api.submit(&requests).await?;
//! api.fail_item(&batch_id, 1, "refused");
//! api.complete(&batch_id);
//! assert!(matches!(api.poll(&batch_id).await?, BatchPoll::Complete(_)));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use tutorq_core::{
    item_custom_id, BatchApi, BatchItemOutcome, BatchItemResult, BatchPoll, BatchRequest, Error,
    Result,
};

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBatchCall {
    Submit { requests: usize },
    Poll { batch_id: String },
}

#[derive(Debug, Clone, PartialEq)]
enum MockBatchState {
    Running,
    Complete,
    Failed(String),
}

#[derive(Debug, Clone)]
struct MockBatch {
    requests: Vec<BatchRequest>,
    state: MockBatchState,
    failed_items: HashMap<usize, String>,
    missing_items: HashSet<usize>,
    outputs: HashMap<usize, JsonValue>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    batches: HashMap<String, MockBatch>,
    submit_failure: Option<String>,
    poll_failures: HashMap<String, String>,
    auto_complete: bool,
    calls: Vec<MockBatchCall>,
}

/// In-process [`BatchApi`] with scriptable outcomes and a call log.
#[derive(Clone, Default)]
pub struct MockBatchApi {
    state: Arc<Mutex<MockState>>,
}

impl MockBatchApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every batch as soon as it is submitted.
    pub fn with_auto_complete(self) -> Self {
        self.lock().auto_complete = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_batch<F>(&self, batch_id: &str, update: F)
    where
        F: FnOnce(&mut MockBatch),
    {
        if let Some(batch) = self.lock().batches.get_mut(batch_id) {
            update(batch);
        }
    }

    /// Make every subsequent submission fail with `message`; `None` clears it.
    pub fn set_submit_failure(&self, message: Option<&str>) {
        self.lock().submit_failure = message.map(str::to_string);
    }

    /// Make polls of `batch_id` fail with `message`; `None` clears it.
    pub fn set_poll_failure(&self, batch_id: &str, message: Option<&str>) {
        let mut state = self.lock();
        match message {
            Some(message) => {
                state
                    .poll_failures
                    .insert(batch_id.to_string(), message.to_string());
            }
            None => {
                state.poll_failures.remove(batch_id);
            }
        }
    }

    /// Mark the batch as ended.
    pub fn complete(&self, batch_id: &str) {
        self.with_batch(batch_id, |batch| batch.state = MockBatchState::Complete);
    }

    /// End the batch as a whole failure (expired, cancelled upstream).
    pub fn fail_batch(&self, batch_id: &str, reason: &str) {
        self.with_batch(batch_id, |batch| {
            batch.state = MockBatchState::Failed(reason.to_string())
        });
    }

    /// Report the item at `index` as errored once the batch completes.
    pub fn fail_item(&self, batch_id: &str, index: usize, message: &str) {
        self.with_batch(batch_id, |batch| {
            batch.failed_items.insert(index, message.to_string());
        });
    }

    /// Leave the item at `index` out of the results entirely.
    pub fn drop_item(&self, batch_id: &str, index: usize) {
        self.with_batch(batch_id, |batch| {
            batch.missing_items.insert(index);
        });
    }

    /// Output reported for a successful item instead of the default echo.
    pub fn set_item_output(&self, batch_id: &str, index: usize, output: JsonValue) {
        self.with_batch(batch_id, |batch| {
            batch.outputs.insert(index, output);
        });
    }

    /// Requests received for `batch_id`.
    pub fn submitted(&self, batch_id: &str) -> Option<Vec<BatchRequest>> {
        self.lock().batches.get(batch_id).map(|b| b.requests.clone())
    }

    /// Number of batches accepted so far.
    pub fn batch_count(&self) -> usize {
        self.lock().batches.len()
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockBatchCall> {
        self.lock().calls.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockBatchCall::Poll { .. }))
            .count()
    }

    fn results_for(batch: &MockBatch) -> Vec<BatchItemResult> {
        batch
            .requests
            .iter()
            .enumerate()
            .filter(|(index, _)| !batch.missing_items.contains(index))
            .map(|(index, request)| {
                let outcome = match batch.failed_items.get(&index) {
                    Some(message) => BatchItemOutcome::Errored {
                        message: message.clone(),
                    },
                    None => BatchItemOutcome::Succeeded {
                        output: batch.outputs.get(&index).cloned().unwrap_or_else(|| {
                            json!({"custom_id": request.custom_id, "echo": request.params})
                        }),
                    },
                };
                BatchItemResult {
                    custom_id: item_custom_id(index),
                    outcome,
                }
            })
            .collect()
    }
}

#[async_trait]
impl BatchApi for MockBatchApi {
    async fn submit(&self, requests: &[BatchRequest]) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(MockBatchCall::Submit {
            requests: requests.len(),
        });

        if let Some(message) = state.submit_failure.clone() {
            return Err(Error::ExternalBatch(message));
        }

        state.next_id += 1;
        let batch_id = format!("mock_batch_{}", state.next_id);
        let initial = if state.auto_complete {
            MockBatchState::Complete
        } else {
            MockBatchState::Running
        };
        state.batches.insert(
            batch_id.clone(),
            MockBatch {
                requests: requests.to_vec(),
                state: initial,
                failed_items: HashMap::new(),
                missing_items: HashSet::new(),
                outputs: HashMap::new(),
            },
        );
        Ok(batch_id)
    }

    async fn poll(&self, batch_id: &str) -> Result<BatchPoll> {
        let mut state = self.lock();
        state.calls.push(MockBatchCall::Poll {
            batch_id: batch_id.to_string(),
        });

        if let Some(message) = state.poll_failures.get(batch_id) {
            return Err(Error::ExternalBatch(message.clone()));
        }

        let batch = match state.batches.get(batch_id) {
            Some(batch) => batch,
            None => return Ok(BatchPoll::Failed(format!("batch {} not found", batch_id))),
        };

        Ok(match &batch.state {
            MockBatchState::Running => BatchPoll::Running,
            MockBatchState::Complete => BatchPoll::Complete(Self::results_for(batch)),
            MockBatchState::Failed(reason) => BatchPoll::Failed(reason.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests(n: usize) -> Vec<BatchRequest> {
        (0..n)
            .map(|i| BatchRequest::for_item(i, json!({"n": i})))
            .collect()
    }

    #[tokio::test]
    async fn test_batch_runs_until_completed() {
        let api = MockBatchApi::new();
        let batch_id = api.submit(&requests(2)).await.unwrap();
        assert_eq!(api.poll(&batch_id).await.unwrap(), BatchPoll::Running);

        api.fail_item(&batch_id, 1, "refused");
        api.complete(&batch_id);

        match api.poll(&batch_id).await.unwrap() {
            BatchPoll::Complete(results) => {
                assert_eq!(results.len(), 2);
                assert!(matches!(
                    results[0].outcome,
                    BatchItemOutcome::Succeeded { .. }
                ));
                assert_eq!(
                    results[1].outcome,
                    BatchItemOutcome::Errored {
                        message: "refused".to_string()
                    }
                );
            }
            other => panic!("expected complete, got {:?}", other),
        }
        assert_eq!(api.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let api = MockBatchApi::new();
        api.set_submit_failure(Some("quota exceeded"));
        let err = api.submit(&requests(1)).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(api.batch_count(), 0);
        assert_eq!(api.calls(), vec![MockBatchCall::Submit { requests: 1 }]);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_failed() {
        let api = MockBatchApi::new();
        assert!(matches!(
            api.poll("nope").await.unwrap(),
            BatchPoll::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_auto_complete_and_dropped_items() {
        let api = MockBatchApi::new().with_auto_complete();
        let batch_id = api.submit(&requests(3)).await.unwrap();
        api.drop_item(&batch_id, 2);

        match api.poll(&batch_id).await.unwrap() {
            BatchPoll::Complete(results) => {
                let ids: Vec<&str> = results.iter().map(|r| r.custom_id.as_str()).collect();
                assert_eq!(ids, vec!["item-0", "item-1"]);
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }
}
