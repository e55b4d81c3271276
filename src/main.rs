use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geochain::api::ApiServer;
use geochain::chain::ProcessChain;
use geochain::config::Config;
use geochain::executor::{ProcessToolExecutor, ScriptedExecutor, StepExecutor, ToolExecutor};
use geochain::job::{JobKind, JobRequest};
use geochain::runner::{ChainRunner, ScopeGuard, ValidationOptions};
use geochain::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(name = "geochain")]
#[command(about = "Ephemeral geoprocessing job orchestration", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start API server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Compute area statistics of one dataset inside a polygon
    Stats {
        /// categorical or univariate
        #[arg(short, long, default_value = "categorical")]
        kind: JobKind,

        #[arg(long)]
        project: String,

        /// Dataset group (scope) holding the dataset
        #[arg(long)]
        group: String,

        /// Space-time raster dataset
        #[arg(long)]
        dataset: String,

        /// Format: YYYY-MM-DDTHH:MM:SS
        #[arg(short, long)]
        timestamp: String,

        /// GeoJSON file with the polygon
        #[arg(short, long)]
        geometry: PathBuf,

        /// Print the acknowledgement before waiting for the result
        #[arg(long = "async")]
        run_async: bool,

        /// Print tool invocations instead of running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a process chain file (JSON or YAML) in an ephemeral workspace
    Chain {
        file: PathBuf,

        /// Scope the chain reads from; repeatable
        #[arg(short, long = "scope")]
        scopes: Vec<String>,

        /// Print tool invocations instead of running them
        #[arg(long)]
        dry_run: bool,
    },
}

fn tools(config: &Config, dry_run: bool) -> Arc<dyn ToolExecutor> {
    if dry_run {
        Arc::new(ScriptedExecutor::echo())
    } else {
        Arc::new(ProcessToolExecutor::new(config.process.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging; stdout is reserved for JSON output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "geochain=info".into())
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let service = config.job_service(tools(&config, false));
            ApiServer::new(config.server.clone(), service).start().await?;
        }

        Commands::Stats {
            kind,
            project,
            group,
            dataset,
            timestamp,
            geometry,
            run_async,
            dry_run,
        } => {
            let geometry = std::fs::read_to_string(&geometry)
                .with_context(|| format!("Failed to read geometry {:?}", geometry))?;
            let request = JobRequest {
                project,
                dataset_group: group,
                dataset,
                timestamp,
                geometry,
            };

            let service = config.job_service(tools(&config, dry_run));
            let response = if run_async {
                match service.submit_async(kind, request).await {
                    Ok(accepted) => {
                        println!("{}", serde_json::to_string_pretty(&accepted)?);
                        service
                            .wait_until_finished(&accepted.resource_id)
                            .await
                            .unwrap_or(accepted)
                    }
                    Err(rejected) => rejected,
                }
            } else {
                service.submit_sync(kind, request).await
            };

            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_terminal() {
                bail!("Gave up waiting for job {}, it is still {:?}", response.resource_id, response.status);
            }
            if response.http_code != 200 {
                bail!("Job {} ended with HTTP code {}", response.resource_id, response.http_code);
            }
        }

        Commands::Chain { file, scopes, dry_run } => {
            let chain = ProcessChain::load(&file)?;
            let workspaces = WorkspaceManager::new(config.workspace.clone());
            let runner = ChainRunner::new(
                StepExecutor::new(tools(&config, dry_run)),
                Arc::new(ScopeGuard::new(config.guard.clone())),
            );

            let job_id = format!("chain-{}", uuid::Uuid::new_v4());
            let mut workspace = workspaces.allocate(&job_id)?;
            for scope in &scopes {
                workspaces.declare_required_scope(&mut workspace, scope)?;
            }
            let validated = runner.validate(chain, &workspace, ValidationOptions::full())?;
            let result = runner.run(&validated, &workspace).await;
            workspaces.release(&mut workspace);

            match result {
                Ok(log) => println!("{}", serde_json::to_string_pretty(log.entries())?),
                Err(failure) => {
                    println!("{}", serde_json::to_string_pretty(failure.log.entries())?);
                    return Err(failure.error.into());
                }
            }
        }
    }

    Ok(())
}
