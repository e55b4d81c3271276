use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::kind::{
    discover_raster, import_and_sample, StatsKind, REGION, SAMPLED_MAPS, STATISTICS,
};
use super::{Job, JobKind, JobOutcome, JobRequest, JobStatus, JobStore, TIMESTAMP_FORMAT};
use crate::error::{JobError, Result};
use crate::executor::ExecutionLogEntry;
use crate::extract::StatRecord;
use crate::runner::{ChainLog, ChainRunner, StepObserver, ValidationOptions};
use crate::workspace::{Region, Workspace, WorkspaceManager};

/// File the polygon is written to inside the workspace
const GEOMETRY_FILE: &str = "polygon.geojson";

/// Drives jobs from submission to a terminal outcome
#[derive(Clone)]
pub struct JobController {
    workspaces: Arc<WorkspaceManager>,
    runner: ChainRunner,
    store: JobStore,
    budget: Option<Duration>,
}

/// Copies every log entry into the job record as soon as it exists, so a
/// job cut short by its budget still reports what ran
struct JobLog {
    store: JobStore,
    job_id: String,
}

#[async_trait]
impl StepObserver for JobLog {
    async fn on_entry(&self, entry: &ExecutionLogEntry) {
        self.store.append_log(&self.job_id, entry.clone()).await;
    }
}

impl JobController {
    pub fn new(workspaces: Arc<WorkspaceManager>, runner: ChainRunner, store: JobStore) -> Self {
        Self {
            workspaces,
            runner,
            store,
            budget: None,
        }
    }

    /// Wall-clock budget for `execute`; unlimited when unset
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub async fn job(&self, id: &str) -> Option<Job> {
        self.store.get(id).await
    }

    /// Terminal outcome, once there is one
    pub async fn result(&self, id: &str) -> Option<JobOutcome> {
        self.store.get(id).await.and_then(|j| j.result)
    }

    /// Fail a job that will never be executed, e.g. because it could not be
    /// queued
    pub async fn abandon(&self, id: &str, error: &JobError) -> Option<JobOutcome> {
        let job = self.store.get(id).await?;
        if job.status != JobStatus::Pending {
            return None;
        }

        let outcome = JobOutcome::from_error(error, vec![]);
        warn!("Job {} abandoned: {}", id, error);
        self.store
            .update(id, |j| j.finish(outcome.clone()))
            .await
            .then_some(outcome)
    }

    /// Check the request and record a pending job. Allocates nothing.
    pub async fn submit(&self, kind: JobKind, request: JobRequest) -> Result<Job> {
        check_request(&request)?;

        let job = Job::new(kind, request);
        info!(
            "Accepted {} job {} for {}@{} at {}",
            kind, job.id, job.request.dataset, job.request.dataset_group, job.request.timestamp
        );
        self.store.insert(job.clone()).await;
        Ok(job)
    }

    /// Run a pending job to completion and store its outcome
    pub async fn execute(&self, job_id: &str) -> Result<JobOutcome> {
        // Check and transition under one lock
        let job = self.store.start(job_id).await.ok_or_else(|| {
            JobError::Environment(format!("Job {} is unknown or not pending", job_id))
        })?;
        info!("Running {} job {}", job.kind, job_id);

        let work = self.process(job_id, job.kind.stats(), &job.request);
        let result = match self.budget {
            Some(budget) => match tokio::time::timeout(budget, work).await {
                Ok(result) => result,
                Err(_) => Err(JobError::Timeout {
                    seconds: budget.as_secs_f64().ceil() as u64,
                }),
            },
            None => work.await,
        };

        let outcome = match result {
            Ok(records) => {
                info!("Job {} finished with {} records", job_id, records.len());
                JobOutcome::success(records)
            }
            Err(error) => {
                warn!("Job {} failed: {}", job_id, error);
                let log = self
                    .store
                    .get(job_id)
                    .await
                    .map(|j| j.process_log)
                    .unwrap_or_default();
                JobOutcome::from_error(&error, log)
            }
        };

        self.store
            .update(job_id, |j| j.finish(outcome.clone()))
            .await;
        Ok(outcome)
    }

    /// Owns the workspace for the whole job. If this future is dropped on
    /// timeout the workspace is released by its destructor.
    async fn process(
        &self,
        job_id: &str,
        kind: &dyn StatsKind,
        request: &JobRequest,
    ) -> Result<Vec<StatRecord>> {
        let mut workspace = self.workspaces.allocate(job_id)?;
        let result = self.run_stages(&mut workspace, kind, request).await;
        self.workspaces.release(&mut workspace);
        result
    }

    async fn run_stages(
        &self,
        workspace: &mut Workspace,
        kind: &dyn StatsKind,
        request: &JobRequest,
    ) -> Result<Vec<StatRecord>> {
        self.workspaces
            .declare_required_scope(workspace, &request.dataset_group)?;
        let geometry = workspace.write_temp_file(GEOMETRY_FILE, request.geometry.trim())?;

        // Extent is unknown until the polygon is imported
        let sampled = self
            .run_chain(
                workspace,
                import_and_sample(&geometry, request),
                ValidationOptions::default().skip_permissions().skip_region(),
            )
            .await?;
        let map_list = sampled
            .output(SAMPLED_MAPS)
            .map(|e| e.stdout.as_str())
            .unwrap_or_default();
        debug!("Maplist: {}", map_list);

        let raster = discover_raster(map_list, &request.timestamp)?;
        info!(
            "Job {} computes {} statistics of {}",
            workspace.job_id(),
            kind.name(),
            raster
        );

        // Region is known now; stage two is checked against it
        let lookup = self
            .run_chain(
                workspace,
                kind.region_lookup(&raster),
                ValidationOptions::default().skip_permissions().skip_region(),
            )
            .await?;
        match lookup
            .output(REGION)
            .and_then(|e| Region::from_shell_output(&e.stdout))
        {
            Some(region) => {
                debug!(
                    "Job {} region is {}x{} cells",
                    workspace.job_id(),
                    region.rows,
                    region.cols
                );
                workspace.set_region(region);
            }
            None => warn!("Could not read the region of job {}", workspace.job_id()),
        }

        let stats = self
            .run_chain(
                workspace,
                kind.stage_two(&raster),
                ValidationOptions::default().skip_permissions(),
            )
            .await?;
        let table = stats
            .output(STATISTICS)
            .or_else(|| stats.last())
            .map(|e| e.stdout.as_str())
            .unwrap_or_default();

        kind.extract(table)
    }

    async fn run_chain(
        &self,
        workspace: &Workspace,
        chain: crate::chain::ProcessChain,
        options: ValidationOptions,
    ) -> Result<ChainLog> {
        let validated = self.runner.validate(chain, workspace, options)?;
        let observer = JobLog {
            store: self.store.clone(),
            job_id: workspace.job_id().to_string(),
        };

        self.runner
            .run_observed(&validated, workspace, &observer)
            .await
            .map_err(|failure| failure.error)
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Request-level preconditions, checked before anything is allocated
pub(crate) fn check_request(request: &JobRequest) -> Result<()> {
    for (field, value) in [
        ("project", &request.project),
        ("dataset group", &request.dataset_group),
        ("dataset", &request.dataset),
    ] {
        if !is_identifier(value) {
            return Err(JobError::BadRequest(format!("Invalid {} name '{}'", field, value)));
        }
    }

    NaiveDateTime::parse_from_str(&request.timestamp, TIMESTAMP_FORMAT).map_err(|_| {
        JobError::BadRequest(
            "Wrong timestamp format. Required format is: YYYY-MM-DDTHH:MM:SS \
             for example 2001-03-16T12:30:15"
                .to_string(),
        )
    })?;

    match serde_json::from_str::<serde_json::Value>(&request.geometry) {
        Ok(value) if value.is_object() => Ok(()),
        Ok(_) => Err(JobError::BadRequest(
            "Geometry must be a GeoJSON object".to_string(),
        )),
        Err(e) => Err(JobError::BadRequest(format!("Geometry is not valid JSON: {}", e))),
    }
}
