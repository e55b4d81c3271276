pub mod api;
pub mod chain;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod extract;
pub mod job;
pub mod runner;
pub mod workspace;

pub use api::ApiServer;
pub use chain::{ProcessChain, Step};
pub use config::Config;
pub use dispatch::{JobQueue, JobService, LocalQueue};
pub use error::{ErrorKind, JobError, Result};
pub use executor::{ExecutionLogEntry, ProcessToolExecutor, ScriptedExecutor, ToolExecutor};
pub use extract::{CategoricalRecord, StatRecord, UnivariateRecord};
pub use job::{Job, JobController, JobKind, JobOutcome, JobRequest, JobStatus, ProcessingResponse};
pub use runner::{ChainRunner, ValidationOptions};
pub use workspace::{Workspace, WorkspaceManager};
