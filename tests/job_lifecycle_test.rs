//! End-to-end job lifecycle tests
//!
//! Jobs run through the real controller, runner and workspace manager with a
//! scripted tool executor standing in for the geoprocessing tools.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use geochain::dispatch::{DispatchConfig, JobService};
use geochain::error::ErrorKind;
use geochain::executor::{ScriptedExecutor, StepExecutor, ToolOutput};
use geochain::extract::StatRecord;
use geochain::job::{JobController, JobKind, JobOutcome, JobRequest, JobStatus, JobStore, ResponseStatus};
use geochain::runner::{ChainRunner, GuardConfig, ScopeGuard};
use geochain::workspace::{ScopeAllowList, ScopeAccess, WorkspaceConfig, WorkspaceManager};

const SAMPLED: &str = "polygon@ephemeral|precip_daily_2001_03_16@X|2001-03-16 12:30:15|None\n";
const CATEGORIES: &str = "1|Forest|300|30|30.00%\n2|Water|200|20|20.00%\n*|no data|500|50|50.00%\n";

fn request() -> JobRequest {
    JobRequest {
        project: "nc_spm_08".to_string(),
        dataset_group: "X".to_string(),
        dataset: "precip_daily".to_string(),
        timestamp: "2001-03-16T12:30:15".to_string(),
        geometry: r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}]}"#.to_string(),
    }
}

struct Harness {
    base: TempDir,
    workspaces: Arc<WorkspaceManager>,
    service: JobService,
}

impl Harness {
    fn build(
        tools: ScriptedExecutor,
        workspace: WorkspaceConfig,
        access: Option<Arc<dyn ScopeAccess>>,
        budget: Option<Duration>,
    ) -> Result<Self> {
        let base = TempDir::new()?;
        let config = WorkspaceConfig {
            base_dir: Some(base.path().to_path_buf()),
            ..workspace
        };
        let workspaces = Arc::new(match access {
            Some(access) => WorkspaceManager::with_access(config, access),
            None => WorkspaceManager::new(config),
        });
        let runner = ChainRunner::new(
            StepExecutor::new(Arc::new(tools)),
            Arc::new(ScopeGuard::new(GuardConfig::default())),
        );
        let controller = JobController::new(workspaces.clone(), runner, JobStore::new())
            .with_budget(budget);

        Ok(Self {
            base,
            workspaces,
            service: JobService::local(controller, DispatchConfig::default()),
        })
    }

    fn new(tools: ScriptedExecutor) -> Result<Self> {
        Self::build(tools, WorkspaceConfig::default(), None, None)
    }

    fn base_is_empty(&self) -> Result<bool> {
        Ok(std::fs::read_dir(self.base.path())?.next().is_none())
    }
}

fn categorical_tools() -> ScriptedExecutor {
    ScriptedExecutor::new()
        .on_stdout("t.sample", SAMPLED)
        .on_stdout("r.stats", CATEGORIES)
}

// ============================================================================
// Acceptance
// ============================================================================

#[tokio::test]
async fn test_malformed_timestamp_allocates_nothing() -> Result<()> {
    let h = Harness::new(categorical_tools())?;

    for timestamp in ["2001-03-16 12:30:15", "2001-03-16", "16/03/2001T12:30:15", ""] {
        let mut req = request();
        req.timestamp = timestamp.to_string();

        let response = h.service.submit_sync(JobKind::Categorical, req).await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.http_code, 400);
        assert_eq!(response.error_kind, Some(ErrorKind::BadRequest));
        assert!(response.message.contains("2001-03-16T12:30:15"));
    }

    assert_eq!(h.workspaces.allocations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_well_formed_timestamp_reaches_allocation() -> Result<()> {
    let h = Harness::new(categorical_tools())?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.status, ResponseStatus::Finished);
    assert_eq!(h.workspaces.allocations(), 1);
    Ok(())
}

// ============================================================================
// Categorical and univariate jobs
// ============================================================================

#[tokio::test]
async fn test_categorical_end_to_end() -> Result<()> {
    let tools = categorical_tools();
    let h = Harness::new(tools.clone())?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.status, ResponseStatus::Finished);
    assert_eq!(response.http_code, 200);

    let records: Vec<_> = response
        .process_results
        .iter()
        .map(|r| match r {
            StatRecord::Categorical(c) => c.clone(),
            other => panic!("unexpected record {other:?}"),
        })
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].category, "*");

    let total: f64 = records.iter().map(|r| r.percent).sum();
    assert!((total - 100.0).abs() < 0.01);

    // Stage two ran against the discovered raster
    let calls = tools.calls().await;
    let stats = calls.iter().find(|c| c.tool == "r.stats").unwrap();
    assert!(stats
        .args
        .contains(&"input=precip_daily_2001_03_16@X".to_string()));
    assert_eq!(
        tools.tools_called().await,
        vec![
            "v.import", "t.create", "t.register", "t.sample", "g.region", "g.region", "r.mask",
            "r.stats",
        ]
    );

    // All of it happened in one workspace, which is gone now
    assert!(calls.iter().all(|c| c.job_id == response.resource_id));
    assert_eq!(h.workspaces.live(), 0);
    assert!(h.base_is_empty()?);
    Ok(())
}

#[tokio::test]
async fn test_univariate_end_to_end() -> Result<()> {
    let tools = ScriptedExecutor::new()
        .on_stdout("t.sample", SAMPLED)
        .on_stdout(
            "v.db.select",
            "cat|fid|raster_number|raster_minimum|raster_maximum|raster_average\n\
             1|swwake_10m.0|2025000|1|6|4.27381481481481\n\
             2|outside||||\n",
        );
    let h = Harness::new(tools.clone())?;

    let response = h.service.submit_sync(JobKind::Univariate, request()).await;
    assert_eq!(response.status, ResponseStatus::Finished);
    assert_eq!(response.process_results.len(), 2);

    match &response.process_results[0] {
        StatRecord::Univariate(r) => {
            assert_eq!(r.get("raster_number"), Some(2025000.0));
            assert_eq!(r.fid.as_deref(), Some("swwake_10m.0"));
        }
        other => panic!("unexpected record {other:?}"),
    }

    let json = serde_json::to_value(&response.process_results[1])?;
    assert_eq!(json, serde_json::json!({"cat": "2", "fid": "outside"}));

    let called = tools.tools_called().await;
    assert_eq!(&called[4..], &["g.region", "g.region", "v.rast.stats", "v.db.select"]);
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_no_data_for_timestamp() -> Result<()> {
    let tools = ScriptedExecutor::new().on_stdout("t.sample", "polygon@ephemeral|None|2001-03-16 12:30:15|None\n");
    let h = Harness::new(tools.clone())?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.http_code, 400);
    assert_eq!(response.error_kind, Some(ErrorKind::NoDataForTimestamp));
    assert_eq!(
        response.message,
        "No raster maps found for timestamp: 2001-03-16T12:30:15"
    );
    assert_eq!(response.process_log.len(), 4);
    assert!(!tools.tools_called().await.contains(&"g.region".to_string()));
    assert_eq!(h.workspaces.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_step_keeps_log() -> Result<()> {
    let tools = ScriptedExecutor::new()
        .on_stdout("t.sample", SAMPLED)
        .fail("r.mask", 1, "ERROR: Vector map <polygon> not found");
    let h = Harness::new(tools.clone())?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.error_kind, Some(ErrorKind::StepFailed));
    assert_eq!(response.http_code, 400);
    assert!(response.message.contains("r_mask_6"));

    // Four stage-one entries, the region lookup, then g.region and the
    // failing r.mask
    assert_eq!(response.process_log.len(), 7);
    let last = response.process_log.last().unwrap();
    assert_eq!(last.tool, "r.mask");
    assert_eq!(last.exit_status, 1);
    assert!(!tools.tools_called().await.contains(&"r.stats".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_malformed_statistics() -> Result<()> {
    let tools = ScriptedExecutor::new()
        .on_stdout("t.sample", SAMPLED)
        .on_stdout("r.stats", "1|Forest|lots|30|30%\n");
    let h = Harness::new(tools)?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.error_kind, Some(ErrorKind::MalformedOutput));
    assert_eq!(response.http_code, 500);
    assert_eq!(response.process_log.len(), 8);
    Ok(())
}

#[tokio::test]
async fn test_missing_tool_is_environment_error() -> Result<()> {
    let tools = ScriptedExecutor::new().missing("v.import");
    let h = Harness::new(tools)?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.error_kind, Some(ErrorKind::Environment));
    assert!(response.message.contains("v.import"));
    assert!(response.process_log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_workspace_quota() -> Result<()> {
    let h = Harness::build(
        categorical_tools(),
        WorkspaceConfig {
            max_live: 0,
            ..Default::default()
        },
        None,
        None,
    )?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.error_kind, Some(ErrorKind::ResourceExhausted));
    assert_eq!(response.http_code, 503);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_scope() -> Result<()> {
    let tools = categorical_tools();
    let h = Harness::build(
        tools.clone(),
        WorkspaceConfig::default(),
        Some(Arc::new(ScopeAllowList::new(["climate"]))),
        None,
    )?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.error_kind, Some(ErrorKind::ValidationError));
    assert!(tools.calls().await.is_empty());
    assert_eq!(h.workspaces.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_timeout_releases_workspace() -> Result<()> {
    let tools = categorical_tools().with_delay(Duration::from_millis(200));
    let h = Harness::build(
        tools,
        WorkspaceConfig::default(),
        None,
        Some(Duration::from_millis(300)),
    )?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(response.http_code, 504);
    assert!(response.process_log.len() < 8);

    assert_eq!(h.workspaces.live(), 0);
    assert!(h.base_is_empty()?);
    Ok(())
}

// ============================================================================
// Execution modes
// ============================================================================

#[tokio::test]
async fn test_sync_and_async_outcomes_are_identical() -> Result<()> {
    let sync = Harness::new(categorical_tools())?;
    let deferred = Harness::new(categorical_tools())?;

    let finished = sync.service.submit_sync(JobKind::Categorical, request()).await;

    let accepted = deferred
        .service
        .submit_async(JobKind::Categorical, request())
        .await
        .map_err(|r| anyhow::anyhow!(r.message))?;
    assert_eq!(accepted.status, ResponseStatus::Accepted);
    assert!(accepted.process_results.is_empty());

    let polled = deferred
        .service
        .wait_until_finished(&accepted.resource_id)
        .await
        .unwrap();
    assert_eq!(polled.status, ResponseStatus::Finished);

    let a = sync.service.controller().result(&finished.resource_id).await.unwrap();
    let b = deferred.service.controller().result(&accepted.resource_id).await.unwrap();
    assert_eq!(serde_json::to_vec(&a)?, serde_json::to_vec(&b)?);
    assert!(matches!(a, JobOutcome::Success { .. }));
    Ok(())
}

#[tokio::test]
async fn test_failed_outcomes_are_identical_across_modes() -> Result<()> {
    let tools = || {
        ScriptedExecutor::new()
            .on_stdout("t.sample", SAMPLED)
            .on("r.stats", |_| ToolOutput::failure(3, "ERROR: out of memory"))
    };
    let sync = Harness::new(tools())?;
    let deferred = Harness::new(tools())?;

    let finished = sync.service.submit_sync(JobKind::Categorical, request()).await;
    let accepted = deferred
        .service
        .submit_async(JobKind::Categorical, request())
        .await
        .map_err(|r| anyhow::anyhow!(r.message))?;
    deferred.service.wait_until_finished(&accepted.resource_id).await;

    let a = sync.service.controller().result(&finished.resource_id).await.unwrap();
    let b = deferred.service.controller().result(&accepted.resource_id).await.unwrap();
    assert_eq!(serde_json::to_vec(&a)?, serde_json::to_vec(&b)?);
    Ok(())
}

#[tokio::test]
async fn test_terminal_job_stays_terminal() -> Result<()> {
    let h = Harness::new(categorical_tools())?;

    let response = h.service.submit_sync(JobKind::Categorical, request()).await;
    let controller = h.service.controller();

    assert!(controller.execute(&response.resource_id).await.is_err());
    let job = controller.job(&response.resource_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(h.workspaces.allocations(), 1);
    Ok(())
}
