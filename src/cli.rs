//! Command-line front end: argument model, logging setup, and the run loop.

use crate::cancel::{CancelHandle, Cancellation};
use crate::error::{BuildError, PaginationError};
use crate::http::{ApiVariant, HttpPolicySearch, SearchError, DEFAULT_ENDPOINT};
use crate::paginate::Paginator;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::telemetry::{HarvestEvent, LogObserver, Observer, PageEvent, SharedObserver};
use crate::types::{PolicyRecord, Scope};
use clap::Parser;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status for a run stopped by Ctrl-C or the deadline.
pub const EXIT_CANCELLED: i32 = 130;

/// Fetch every IAM policy binding visible to an organization.
#[derive(Debug, Clone, Parser)]
#[command(name = "iam-harvest", version, about)]
pub struct Cli {
    /// Organization id (e.g. 123456789012) or a full organizations/, folders/ or projects/ scope.
    #[arg(value_name = "ORGANIZATION")]
    pub scope: Scope,

    /// OAuth2 access token sent as a bearer token.
    #[arg(long, env = "IAM_HARVEST_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Endpoint URL template; `{scope}` is replaced by the scope.
    #[arg(long, env = "IAM_HARVEST_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Response schema: `search-all` (results) or `parent` (policies).
    #[arg(long, default_value_t = ApiVariant::SearchAll)]
    pub variant: ApiVariant,

    /// Page size requested from the API.
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Search filter forwarded to the API.
    #[arg(long)]
    pub query: Option<String>,

    /// Total attempts per page, including the first.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,

    /// Upper bound on any single backoff wait.
    #[arg(long, default_value_t = 60.0)]
    pub max_delay_secs: f64,

    /// Timeout for each HTTP request.
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Give up on the whole run after this many seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Write the collected records to this file as a JSON array.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

/// Errors that end a CLI run.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid retry configuration: {0}")]
    Retry(#[from] BuildError),
    #[error(transparent)]
    Fetch(#[from] PaginationError<SearchError>),
    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Retry(_) => 2,
            CliError::Fetch(err) if err.is_cancelled() => EXIT_CANCELLED,
            CliError::Fetch(_) | CliError::Output { .. } => 1,
        }
    }

    /// One-line failure report for stderr. Server bodies spanning several lines are folded.
    pub fn report(&self) -> String {
        let message = self.to_string();
        let folded: Vec<&str> =
            message.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
        format!("iam-harvest: {}", folded.join(" "))
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub scope: Scope,
    pub records: usize,
    pub pages: usize,
    pub output: Option<PathBuf>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {} IAM policy records for {} ({} pages)",
            self.records, self.scope, self.pages
        )?;
        if let Some(path) = &self.output {
            write!(f, "; written to {}", path.display())?;
        }
        Ok(())
    }
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Cancel on Ctrl-C, and on the deadline when one is set.
pub fn spawn_cancel_triggers(handle: CancelHandle, deadline: Option<Duration>) {
    let handle = Arc::new(handle);
    let on_signal = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping");
            on_signal.cancel();
        }
    });
    if let Some(deadline) = deadline {
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::warn!(deadline_secs = deadline.as_secs(), "deadline reached; stopping");
            handle.cancel();
        });
    }
}

/// Build the transport and retry policy from `cli`, walk every page, and write the output.
pub async fn run(cli: Cli, cancel: Cancellation) -> Result<Summary, CliError> {
    let max_delay = Duration::try_from_secs_f64(cli.max_delay_secs)
        .map_err(|err| CliError::Config(format!("--max-delay-secs: {err}")))?;
    if cli.access_token.trim().is_empty() {
        return Err(CliError::Config("access token is empty".to_string()));
    }

    let mut search = HttpPolicySearch::new(&cli.access_token)
        .with_endpoint(cli.endpoint.clone())
        .with_variant(cli.variant)
        .with_request_timeout(Duration::from_secs(cli.request_timeout_secs));
    if let Some(size) = cli.page_size {
        search = search.with_page_size(size);
    }
    if let Some(query) = &cli.query {
        search = search.with_query(query.clone());
    }

    let log: SharedObserver = Arc::new(LogObserver);
    let retry = RetryPolicy::builder()
        .max_attempts(cli.max_attempts)
        .max_delay(max_delay)
        .with_shared_observer(log.clone())
        .build()?;

    let pages = Arc::new(AtomicUsize::new(0));
    let page_counter = pages.clone();
    let paginator = Paginator::new(search, retry)
        .with_observer(move |event: &HarvestEvent| {
            if let HarvestEvent::Page(PageEvent::Fetched { .. }) = event {
                page_counter.fetch_add(1, Ordering::Relaxed);
            }
            log.observe(event);
        })
        .with_cancellation(cancel);

    tracing::info!(scope = %cli.scope, variant = %cli.variant, "fetching IAM policies");
    let records = paginator.fetch_all(&cli.scope).await?;

    if let Some(path) = &cli.output {
        write_records(path, &records)?;
    }

    Ok(Summary {
        scope: cli.scope,
        records: records.len(),
        pages: pages.load(Ordering::Relaxed),
        output: cli.output,
    })
}

fn write_records(path: &Path, records: &[PolicyRecord]) -> Result<(), CliError> {
    let to_output_error =
        |source: std::io::Error| CliError::Output { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(to_output_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|err| to_output_error(err.into()))?;
    writer.write_all(b"\n").map_err(to_output_error)?;
    writer.flush().map_err(to_output_error)
}
