use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::error::{JobError, Result};
use crate::job::JobController;

/// Deferred execution of accepted jobs
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a pending job over for execution. Returns once it is queued,
    /// not when it has run.
    async fn enqueue(&self, job_id: &str) -> Result<()>;
}

/// Runs jobs on the current tokio runtime, at most `workers` at a time
#[derive(Clone)]
pub struct LocalQueue {
    controller: JobController,
    permits: Arc<Semaphore>,
}

impl LocalQueue {
    pub fn new(controller: JobController, workers: usize) -> Self {
        Self {
            controller,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn close(&self) {
        self.permits.close();
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, job_id: &str) -> Result<()> {
        if self.permits.is_closed() {
            return Err(JobError::ResourceExhausted("Job queue is closed".to_string()));
        }

        let controller = self.controller.clone();
        let permits = self.permits.clone();
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let closed = JobError::ResourceExhausted("Job queue is closed".to_string());
                    controller.abandon(&job_id, &closed).await;
                    return;
                }
            };

            debug!("Worker picked up job {}", job_id);
            if let Err(e) = controller.execute(&job_id).await {
                error!("Job {} could not be executed: {}", job_id, e);
            }
        });

        Ok(())
    }
}
