//! WorkerPool - bounded set of workers for one broadcast
//!
//! A pool is created per inbound request and never reused:
//! - `size` workers (at least 1, never more than the job count) share one
//!   input queue
//! - each worker takes one job at a time, runs it through the [`Relay`] and
//!   publishes exactly one [`JobResult`]
//! - workers stop once the input queue is closed and drained, or when the
//!   broadcast's cancellation token fires

use fo_common::{DispatchJob, JobFailure, JobResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::relay::Relay;
use crate::relay_metrics;

/// Workers per broadcast when not configured
pub const DEFAULT_POOL_SIZE: usize = 10;

pub struct WorkerPool {
    jobs_tx: Option<mpsc::Sender<DispatchJob>>,
    results_rx: mpsc::Receiver<JobResult>,
    workers: usize,
}

impl WorkerPool {
    /// Start the workers for a broadcast of `job_count` jobs.
    ///
    /// Both queues are sized to the job count, so submitting never waits on
    /// the workers.
    pub fn spawn(
        size: usize,
        job_count: usize,
        relay: Arc<dyn Relay>,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = job_count.max(1);
        let workers = size.max(1).min(capacity);

        let (jobs_tx, jobs_rx) = mpsc::channel::<DispatchJob>(capacity);
        let (results_tx, results_rx) = mpsc::channel::<JobResult>(capacity);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        for worker_id in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let results_tx = results_tx.clone();
            let relay = relay.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                run_worker(worker_id, jobs_rx, results_tx, relay, cancel).await;
            });
        }

        debug!(workers, job_count, "Worker pool started");

        Self {
            jobs_tx: Some(jobs_tx),
            results_rx,
            workers,
        }
    }

    /// Number of workers actually spawned
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a job for the workers.
    pub async fn submit(&self, job: DispatchJob) -> Result<(), DispatchError> {
        let index = job.index;
        match &self.jobs_tx {
            Some(tx) => tx
                .send(job)
                .await
                .map_err(|_| DispatchError::PoolClosed(index)),
            None => Err(DispatchError::PoolClosed(index)),
        }
    }

    /// Close the input queue. Workers finish what is queued, then stop.
    pub fn close(&mut self) {
        self.jobs_tx = None;
    }

    /// Next result in completion order; `None` once every worker has stopped.
    pub async fn recv(&mut self) -> Option<JobResult> {
        self.results_rx.recv().await
    }
}

async fn run_worker(
    worker_id: usize,
    jobs_rx: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    results_tx: mpsc::Sender<JobResult>,
    relay: Arc<dyn Relay>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = jobs_rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker_id, index = job.index, url = %job.url, "Job cancelled");
                JobResult::failed(&job, JobFailure::Cancelled, started.elapsed())
            }
            outcome = relay.relay(&job) => match outcome {
                Ok(response) => JobResult::completed(
                    &job,
                    response.status,
                    response.content_type,
                    response.body,
                    started.elapsed(),
                ),
                Err(e) if e.is_timeout() => {
                    JobResult::failed(&job, JobFailure::Timeout, started.elapsed())
                }
                Err(e) => JobResult::failed(&job, JobFailure::Transport(e.to_string()), started.elapsed()),
            },
        };

        relay_metrics::record_job(result.label(), result.elapsed);

        if results_tx.send(result).await.is_err() {
            warn!(worker_id, "Result receiver dropped, stopping worker");
            break;
        }
    }

    debug!(worker_id, "Worker stopped");
}
