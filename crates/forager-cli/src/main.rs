mod output;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use forager_client::BuiltinToolFactory;
use forager_core::job::CreateScrapeJobRequest;
use forager_core::{
    ConfigPackage, EngineConfig, ExecutionOptions, JobExecutionState, JobRepository, JobStatus,
    NullJobRepository, RateLimiter, ScrapeExecutor,
};
use forager_db::{Database, DatabaseConfig};

use crate::output::{OutputFormat, write_results};

#[derive(Parser)]
#[command(name = "forager", version, about = "Batch scrape execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scrape job in this process
    Run {
        /// Path to the configuration package (JSON)
        #[arg(short, long)]
        package: PathBuf,

        /// File with one URL per line; blank lines and `#` comments are skipped
        #[arg(short, long)]
        urls: PathBuf,

        /// Short description stored with the job record
        #[arg(long, default_value = "ad hoc run")]
        objective: String,

        /// Store the job record and its outcome (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,

        #[command(flatten)]
        tuning: Tuning,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        output: OutputFormat,
    },

    /// Run a stored job record (requires DATABASE_URL)
    Start {
        #[arg(long)]
        job_id: Uuid,

        #[command(flatten)]
        tuning: Tuning,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        output: OutputFormat,
    },

    /// Show a stored job record
    Show {
        #[arg(long)]
        job_id: Uuid,

        /// Include per-URL results
        #[arg(long, default_value_t = false)]
        results: bool,
    },

    /// List recent job records
    List {
        /// Only records in this status (e.g. "running", "failed")
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Per-run overrides of the FORAGER_* environment defaults.
#[derive(Args, Debug)]
struct Tuning {
    /// URLs per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Requests per second across the job (0 disables limiting)
    #[arg(long)]
    rps: Option<f64>,

    /// Whole-job timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retry attempts per failed URL
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Tuning {
    fn apply(&self, mut options: ExecutionOptions) -> ExecutionOptions {
        if let Some(size) = self.batch_size {
            options = options.with_batch_size(size);
        }
        if let Some(rps) = self.rps {
            options = options.with_rate_limit(rps);
        }
        if let Some(secs) = self.timeout_secs {
            options = options.with_timeout(Duration::from_secs(secs.max(1)));
        }
        if let Some(retries) = self.max_retries {
            options = options.with_max_retry_attempts(retries);
        }
        options
    }

    fn options(&self) -> Result<ExecutionOptions> {
        let config = EngineConfig::from_env().context("Invalid FORAGER_* configuration")?;
        Ok(self.apply(config.options))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("forager=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            package,
            urls,
            objective,
            save,
            tuning,
            output,
        } => {
            let package = ConfigPackage::from_file(&package)
                .with_context(|| format!("Failed to load package {}", package.display()))?;
            let urls = read_urls(&urls)?;
            let options = tuning.options()?;

            let state = if save {
                let repo = connect_db().await?.job_repo();
                let request = CreateScrapeJobRequest::new(objective, urls.clone())
                    .with_config_package(package.clone());
                let job = repo.create_job(request).await?;
                tracing::info!(job_id = %job.id, "Job record created");
                let executor = build_executor(repo, &options);
                executor.start(job.id, package, urls, options);
                supervise(&executor, job.id).await?
            } else {
                let job_id = Uuid::new_v4();
                let executor = build_executor(NullJobRepository, &options);
                executor.start(job_id, package, urls, options);
                supervise(&executor, job_id).await?
            };
            finish(state, output)?;
        }
        Commands::Start {
            job_id,
            tuning,
            output,
        } => {
            let options = tuning.options()?;
            let repo = connect_db().await?.job_repo();
            let executor = build_executor(repo, &options);
            executor
                .start_from_record(job_id, options)
                .await
                .with_context(|| format!("Cannot start job {job_id}"))?;
            let state = supervise(&executor, job_id).await?;
            finish(state, output)?;
        }
        Commands::Show { job_id, results } => {
            let repo = connect_db().await?.job_repo();
            let job = repo
                .find_job(job_id)
                .await?
                .with_context(|| format!("No job record {job_id}"))?;
            let mut summary = serde_json::json!({
                "id": job.id,
                "objective": job.objective,
                "status": job.status,
                "urls": job.urls.len(),
                "tool": job.config_package.as_ref().map(|p| p.scraper.tool_id.clone()),
                "createdAt": job.created_at,
                "startedAt": job.started_at,
                "completedAt": job.completed_at,
                "error": job.error_message,
                "errorDetails": job.error_details,
                "resultCount": job.results.as_ref().map(Vec::len),
            });
            if results {
                summary["results"] = serde_json::to_value(&job.results)?;
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List { status, limit } => {
            let status = status
                .as_deref()
                .map(JobStatus::from_str)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let repo = connect_db().await?.job_repo();
            let jobs = repo.list_jobs(status, limit).await?;
            if jobs.is_empty() {
                println!("No jobs found");
                return Ok(());
            }
            for job in &jobs {
                println!(
                    "  {}  {:<22} {:>5} urls  {}  {}",
                    job.id,
                    job.status.as_str(),
                    job.urls.len(),
                    job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    job.objective,
                );
            }
            println!("\nTotal: {} jobs", jobs.len());
        }
    }

    Ok(())
}

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_executor<R: JobRepository + 'static>(
    repo: R,
    options: &ExecutionOptions,
) -> ScrapeExecutor<R, BuiltinToolFactory> {
    ScrapeExecutor::new(
        repo,
        BuiltinToolFactory,
        RateLimiter::new(options.rate_limit_rps),
    )
}

fn read_urls(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    let urls: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    anyhow::ensure!(!urls.is_empty(), "{} contains no URLs", path.display());
    Ok(urls)
}

/// Commands an operator can type while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Pause,
    Resume,
    Cancel,
    Status,
}

impl FromStr for OperatorCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pause" | "p" => Ok(Self::Pause),
            "resume" | "r" => Ok(Self::Resume),
            "cancel" | "c" | "stop" => Ok(Self::Cancel),
            "status" | "s" => Ok(Self::Status),
            other => Err(format!(
                "Unknown command '{other}' (pause, resume, cancel, status)"
            )),
        }
    }
}

fn spawn_stdin_commands() -> mpsc::UnboundedReceiver<OperatorCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match line.parse() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped reading stdin");
                    break;
                }
            }
        }
    });
    rx
}

/// Relay operator commands and Ctrl-C to the job until it ends.
async fn supervise<R: JobRepository + 'static>(
    executor: &ScrapeExecutor<R, BuiltinToolFactory>,
    job_id: Uuid,
) -> Result<JobExecutionState> {
    eprintln!("Job {job_id} running. Commands: pause, resume, cancel, status");
    let mut commands = spawn_stdin_commands();
    let mut stdin_open = true;
    let finished = executor.wait(job_id);
    tokio::pin!(finished);

    loop {
        tokio::select! {
            biased;
            state = &mut finished => {
                return state.with_context(|| format!("Job {job_id} is not tracked"));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(%job_id, "Ctrl-C received, cancelling");
                executor.cancel(job_id).await;
            }
            command = commands.recv(), if stdin_open => {
                let Some(command) = command else {
                    stdin_open = false;
                    continue;
                };
                let applied = match command {
                    OperatorCommand::Pause => executor.pause(job_id).await,
                    OperatorCommand::Resume => executor.resume(job_id).await,
                    OperatorCommand::Cancel => executor.cancel(job_id).await,
                    OperatorCommand::Status => {
                        if let Some(report) = executor.status_report(job_id) {
                            eprintln!("{}", serde_json::to_string_pretty(&report)?);
                        }
                        true
                    }
                };
                if !applied {
                    eprintln!("'{command:?}' does not apply in the job's current state");
                }
            }
        }
    }
}

fn finish(state: JobExecutionState, output: OutputFormat) -> Result<()> {
    let progress = state.progress;
    tracing::info!(
        job_id = %state.job_id,
        status = %state.status,
        processed = progress.processed_urls,
        successful = progress.successful_urls,
        failed = progress.failed_urls,
        retried = progress.retried_urls,
        "Job finished"
    );

    let results = state.results.unwrap_or_default();
    write_results(std::io::stdout().lock(), output, &results)?;

    match state.status {
        JobStatus::Completed | JobStatus::CompletedWithErrors => Ok(()),
        status => anyhow::bail!(
            "Job {} ended {status}: {}",
            state.job_id,
            state.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}
