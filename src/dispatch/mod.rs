//! Synchronous and asynchronous front doors over one job controller
//!
//! Both modes share the same acceptance check and the same execution path;
//! synchronous mode is asynchronous mode plus a wait.

mod queue;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::job::{JobController, JobKind, JobRequest, ProcessingResponse};

pub use queue::{JobQueue, LocalQueue};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Concurrently executing jobs
    pub workers: usize,
    /// Longest pause between two status checks while waiting
    pub poll_interval_ms: u64,
    /// How long a synchronous caller waits before getting a non-terminal
    /// response back
    pub wait_timeout_secs: u64,
    /// How long finished and failed jobs stay pollable
    pub retention_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            wait_timeout_secs: 600,
            retention_secs: 3600,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Clone)]
pub struct JobService {
    controller: JobController,
    queue: Arc<dyn JobQueue>,
    config: DispatchConfig,
}

impl JobService {
    pub fn new(controller: JobController, queue: Arc<dyn JobQueue>, config: DispatchConfig) -> Self {
        Self {
            controller,
            queue,
            config,
        }
    }

    /// Service backed by a [`LocalQueue`] with `config.workers` workers
    pub fn local(controller: JobController, config: DispatchConfig) -> Self {
        let queue = Arc::new(LocalQueue::new(controller.clone(), config.workers));
        Self::new(controller, queue, config)
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// Accept and enqueue a job, answering `accepted` right away
    pub async fn submit_async(
        &self,
        kind: JobKind,
        request: JobRequest,
    ) -> Result<ProcessingResponse, ProcessingResponse> {
        let job = self
            .controller
            .submit(kind, request)
            .await
            .map_err(|e| ProcessingResponse::rejected(kind, &e))?;

        if let Err(e) = self.queue.enqueue(&job.id).await {
            warn!("Could not queue job {}: {}", job.id, e);
            self.controller.abandon(&job.id, &e).await;
            return Err(self.poll(&job.id).await.unwrap_or_else(|| {
                ProcessingResponse::rejected(kind, &e)
            }));
        }

        info!("Job {} queued", job.id);
        Ok(ProcessingResponse::from_job(&job))
    }

    /// Accept, enqueue and wait for the job to reach a terminal state
    ///
    /// If the wait runs out first the job keeps running and the response is
    /// its current, non-terminal state with HTTP code 202.
    pub async fn submit_sync(&self, kind: JobKind, request: JobRequest) -> ProcessingResponse {
        match self.submit_async(kind, request).await {
            Ok(accepted) => {
                let mut response = self
                    .wait_until_finished(&accepted.resource_id)
                    .await
                    .unwrap_or(accepted);
                if !response.is_terminal() {
                    response.http_code = 202;
                }
                response
            }
            Err(response) => response,
        }
    }

    /// Current view of a job, `None` when the id is unknown
    pub async fn poll(&self, job_id: &str) -> Option<ProcessingResponse> {
        self.controller
            .job(job_id)
            .await
            .map(|job| ProcessingResponse::from_job(&job))
    }

    /// Block the calling task until the job is terminal or the wait times
    /// out; either way the latest response is returned
    pub async fn wait_until_finished(&self, job_id: &str) -> Option<ProcessingResponse> {
        let mut status = self.controller.store().subscribe(job_id).await?;
        let poll_interval = self.config.poll_interval();

        let wait = async {
            loop {
                if status.borrow_and_update().is_terminal() {
                    break;
                }
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        debug!("Still waiting for job {}", job_id);
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.wait_timeout(), wait)
            .await
            .is_err()
        {
            warn!(
                "Gave up waiting for job {} after {:?}",
                job_id,
                self.config.wait_timeout()
            );
        }

        self.poll(job_id).await
    }
}
