//! Dispatcher - fan one request out to every endpoint and pick one answer

use fo_common::{BroadcastOutcome, BroadcastRequest, DispatchJob, SelectionPolicy, ServiceEndpoint};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::pool::{WorkerPool, DEFAULT_POOL_SIZE};
use crate::relay::Relay;
use crate::relay_metrics;
use crate::selection;

/// Runs broadcasts over a shared [`Relay`].
///
/// Each call to [`dispatch`](Self::dispatch) gets its own worker pool and
/// cancellation token; nothing is shared between broadcasts except the relay.
pub struct Dispatcher {
    relay: Arc<dyn Relay>,
    pool_size: usize,
    selection: SelectionPolicy,
}

impl Dispatcher {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self {
            relay,
            pool_size: DEFAULT_POOL_SIZE,
            selection: SelectionPolicy::default(),
        }
    }

    /// Workers per broadcast; 0 is treated as 1.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn selection(&self) -> SelectionPolicy {
        self.selection
    }

    /// Send `request` to every endpoint and wait for all of them.
    ///
    /// Exactly one job is created per endpoint and exactly that many results
    /// are collected before the selection policy runs. Dropping the returned
    /// future cancels every call still in flight.
    pub async fn dispatch(
        &self,
        request: BroadcastRequest,
        endpoints: Vec<ServiceEndpoint>,
    ) -> Result<BroadcastOutcome, DispatchError> {
        let expected = endpoints.len();
        if expected == 0 {
            return Err(DispatchError::NoEndpoints);
        }
        relay_metrics::record_broadcast_endpoints(expected);

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let request = Arc::new(request);
        let mut pool = WorkerPool::spawn(self.pool_size, expected, self.relay.clone(), cancel);

        debug!(
            endpoints = expected,
            workers = pool.workers(),
            selection = %self.selection,
            "Dispatching broadcast"
        );

        for (index, endpoint) in endpoints.into_iter().enumerate() {
            pool.submit(DispatchJob::new(index, endpoint, request.clone()))
                .await?;
        }
        pool.close();

        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            let Some(mut result) = pool.recv().await else {
                warn!(expected, received = results.len(), "Worker pool stopped early");
                return Err(DispatchError::Incomplete {
                    expected,
                    received: results.len(),
                });
            };
            result.completion = results.len();
            if let Some(failure) = &result.failure {
                warn!(index = result.index, url = %result.url, error = %failure, "Downstream call failed");
            }
            results.push(result);
        }

        selection::select(self.selection, results)
    }
}
