mod export;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hermes_client::{FetchOptions, ProductExtractor, ReqwestFetcher};
use hermes_core::input::{apply_limit, load_addresses};
use hermes_core::job::{BatchConfig, BatchJob, ExistingOutputPolicy};
use hermes_core::models::Document;
use hermes_core::report::{ANALYSIS_FILE, AnalysisReport, SummaryReport, analyze, load_records};
use hermes_core::sink::{JsonDirSink, RECORDS_DIR, load_failed_addresses, write_json_atomic};
use hermes_core::traits::{Extractor, Fetcher};
use hermes_core::{BatchOrchestrator, BatchReport, TracingBatchReporter, run_batch};

#[derive(Parser)]
#[command(name = "hermes", version, about = "Batch product-page extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and extract every address in a list
    Run(RunArgs),

    /// Rebuild statistics from the records already in an output directory
    Report {
        /// Output directory of a previous run
        #[arg(short, long, env = "HERMES_OUTPUT_DIR", default_value = "output")]
        output_dir: PathBuf,

        /// Also export the records as a flat CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Extract a single page and print the record with its warnings
    Extract {
        /// Address of the page (used for relative URLs and the product id)
        #[arg(short, long)]
        url: String,

        /// Read HTML from this file instead of fetching the address
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Fetch timeout in seconds
        #[arg(long, env = "HERMES_TIMEOUT_SECS", default_value_t = 30)]
        timeout_secs: u64,

        #[command(flatten)]
        fetch: FetchArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Address list: one URL per line, or a JSON array
    #[arg(short, long, env = "HERMES_INPUT", required_unless_present = "from_failures")]
    input: Option<PathBuf>,

    /// Re-run the addresses listed in the output directory's failure log
    #[arg(long, default_value_t = false, conflicts_with = "input")]
    from_failures: bool,

    /// Directory for records, failure log and summary
    #[arg(short, long, env = "HERMES_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// What to do when an address already has a record: overwrite | skip
    #[arg(long, env = "HERMES_ON_EXISTING")]
    on_existing: ExistingOutputPolicy,

    /// Number of pages processed concurrently
    #[arg(short, long, env = "HERMES_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Minimum milliseconds between any two fetches (0 disables)
    #[arg(long, env = "HERMES_RATE_LIMIT_MS", default_value_t = 5000)]
    rate_limit_ms: u64,

    /// Per-attempt fetch timeout in seconds
    #[arg(long, env = "HERMES_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Retries after the first attempt, for timeouts and network failures
    #[arg(long, env = "HERMES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff in milliseconds, grown linearly per retry
    #[arg(long, env = "HERMES_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Process only the first N addresses
    #[arg(short, long)]
    limit: Option<usize>,

    #[command(flatten)]
    fetch: FetchArgs,
}

#[derive(Args)]
struct FetchArgs {
    /// Proxy endpoint handed to the fetcher
    #[arg(long, env = "HERMES_PROXY")]
    proxy: Option<String>,

    /// User agent handed to the fetcher
    #[arg(long, env = "HERMES_USER_AGENT")]
    user_agent: Option<String>,

    /// Render pages in headless Chromium (requires the `browser` feature)
    #[arg(long, env = "HERMES_BROWSER", default_value_t = false)]
    browser: bool,
}

impl FetchArgs {
    fn options(&self) -> FetchOptions {
        let mut options = FetchOptions {
            proxy: self.proxy.clone(),
            ..FetchOptions::default()
        };
        if let Some(ua) = &self.user_agent {
            options.user_agent = ua.clone();
        }
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hermes=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await?,
        Commands::Report { output_dir, csv } => cmd_report(&output_dir, csv.as_deref()).await?,
        Commands::Extract {
            url,
            file,
            timeout_secs,
            fetch,
        } => cmd_extract(&url, file.as_deref(), Duration::from_secs(timeout_secs), &fetch).await?,
    }

    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    // The failure log is truncated when the sink opens, so read it first.
    let addresses = if args.from_failures {
        load_failed_addresses(&args.output_dir)
            .await
            .context("Failed to read the previous failure log")?
    } else {
        let input = args.input.as_deref().context("--input is required")?;
        load_addresses(input)
            .with_context(|| format!("Failed to load addresses from {}", input.display()))?
    };
    let addresses = apply_limit(addresses, args.limit);

    let config = BatchConfig::new(&args.output_dir, args.on_existing)
        .with_concurrency(args.concurrency)
        .with_rate_limit(Duration::from_millis(args.rate_limit_ms))
        .with_fetch_timeout(Duration::from_secs(args.timeout_secs))
        .with_max_retries(args.max_retries)
        .with_retry_backoff(Duration::from_millis(args.retry_backoff_ms));
    let job = BatchJob::new(addresses, config).context("Invalid run configuration")?;

    let sink = JsonDirSink::create(&args.output_dir).await.with_context(|| {
        format!(
            "Failed to prepare output directory {}",
            args.output_dir.display()
        )
    })?;

    tracing::info!(
        job_id = %job.id,
        addresses = job.len(),
        concurrency = job.config.concurrency_limit,
        on_existing = %job.config.on_existing,
        output_dir = %args.output_dir.display(),
        "Starting run"
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            signal_token.cancel();
        }
    });

    let options = args.fetch.options();
    let report = if args.fetch.browser {
        run_with_browser(&options, &job, &sink, cancel).await?
    } else {
        let fetcher = ReqwestFetcher::with_options(&options).context("Failed to create HTTP client")?;
        execute(fetcher, &job, &sink, cancel).await?
    };

    let records = load_records(&sink.records_dir()).await?;
    let summary = SummaryReport {
        summary: report.summary,
        statistics: analyze(&records),
        failures: report.failures,
    };
    write_json_atomic(&sink.summary_path(), &summary)
        .await
        .context("Failed to write batch summary")?;

    let s = &summary.summary;
    println!(
        "Processed {} pages: {} succeeded, {} failed, {} skipped, {} cancelled ({:.1}% success) in {:.1}s",
        s.total, s.succeeded, s.failed, s.skipped, s.cancelled, s.success_rate, s.duration_secs
    );
    println!("Summary written to {}", sink.summary_path().display());

    Ok(())
}

async fn execute<F: Fetcher + 'static>(
    fetcher: F,
    job: &BatchJob,
    sink: &JsonDirSink,
    cancel: CancellationToken,
) -> Result<BatchReport> {
    let orchestrator = BatchOrchestrator::new(fetcher, ProductExtractor::new(), &job.config);
    run_batch(&orchestrator, job, sink, &TracingBatchReporter, cancel)
        .await
        .context("Batch run failed")
}

#[cfg(feature = "browser")]
async fn run_with_browser(
    options: &FetchOptions,
    job: &BatchJob,
    sink: &JsonDirSink,
    cancel: CancellationToken,
) -> Result<BatchReport> {
    let fetcher = hermes_client::BrowserFetcher::launch(options)
        .await
        .context("Failed to launch headless browser")?;
    execute(fetcher, job, sink, cancel).await
}

#[cfg(not(feature = "browser"))]
async fn run_with_browser(
    _options: &FetchOptions,
    _job: &BatchJob,
    _sink: &JsonDirSink,
    _cancel: CancellationToken,
) -> Result<BatchReport> {
    anyhow::bail!("--browser requires hermes to be built with the `browser` feature")
}

async fn cmd_report(output_dir: &Path, csv: Option<&Path>) -> Result<()> {
    let records = load_records(&output_dir.join(RECORDS_DIR))
        .await
        .context("Failed to load records")?;
    if records.is_empty() {
        tracing::warn!(dir = %output_dir.display(), "No records found");
    }

    let report = AnalysisReport {
        generated_at: Utc::now(),
        data_directory: output_dir.to_path_buf(),
        statistics: analyze(&records),
    };
    let path = output_dir.join(ANALYSIS_FILE);
    write_json_atomic(&path, &report)
        .await
        .context("Failed to write analysis report")?;
    println!("{}", serde_json::to_string_pretty(&report.statistics)?);
    println!("Analysis written to {}", path.display());

    if let Some(csv) = csv {
        export::write_csv(csv, &records)?;
        println!("Exported {} records to {}", records.len(), csv.display());
    }

    Ok(())
}

async fn cmd_extract(
    url: &str,
    file: Option<&Path>,
    timeout: Duration,
    fetch: &FetchArgs,
) -> Result<()> {
    let document = match file {
        Some(path) => {
            let html = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read HTML file: {}", path.display()))?;
            Document::new(url, html)
        }
        None => fetch_one(url, timeout, fetch).await?,
    };

    tracing::info!("Extracting {} bytes of HTML", document.html.len());
    let extraction = ProductExtractor::new().extract(&document);

    let output = serde_json::json!({
        "record": extraction.record,
        "warnings": extraction.warnings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn fetch_one(url: &str, timeout: Duration, fetch: &FetchArgs) -> Result<Document> {
    tracing::info!("Fetching {}", url);
    let options = fetch.options();

    if fetch.browser {
        #[cfg(feature = "browser")]
        {
            let fetcher = hermes_client::BrowserFetcher::launch(&options)
                .await
                .context("Failed to launch headless browser")?;
            return Ok(fetcher.fetch(url, timeout).await?);
        }
        #[cfg(not(feature = "browser"))]
        anyhow::bail!("--browser requires hermes to be built with the `browser` feature");
    }

    let fetcher = ReqwestFetcher::with_options(&options).context("Failed to create HTTP client")?;
    Ok(fetcher.fetch(url, timeout).await?)
}
