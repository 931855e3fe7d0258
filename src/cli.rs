//! Command-line interface and export orchestration

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth;
use crate::batch::BatchScheduler;
use crate::client::{GmailApiClient, MailApi};
use crate::config::Config;
use crate::error::Result;
use crate::models::MessageId;
use crate::normalize::ContentNormalizer;
use crate::paginator::Paginator;
use crate::pipeline::{ExportPipeline, ExportStats, MessageOutcome};
use crate::rate_limiter::{FixedWindowLimiter, QuotaCost};
use crate::sink::FileSink;

#[derive(Parser, Debug)]
#[command(name = "gmail-export")]
#[command(version = "0.1.0")]
#[command(about = "Export Gmail messages as Markdown files", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-export/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// List, fetch and export matching messages
    Export {
        /// Gmail search query (default: messages received today)
        #[arg(short, long)]
        query: Option<String>,

        /// Export messages from the last N days
        #[arg(short, long, conflicts_with = "query")]
        days: Option<u32>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many messages
        #[arg(long)]
        max: Option<usize>,

        /// Report file names without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch and export a single message by id
    Fetch {
        /// Gmail message id
        id: String,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report the file name without writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Command-line overrides for one export
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub query: Option<String>,
    pub days: Option<u32>,
    pub output: Option<PathBuf>,
    pub max: Option<usize>,
    pub dry_run: bool,
}

impl ExportOptions {
    /// Flags win over the config file; `--days` replaces a configured query
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(query) = &self.query {
            config.fetch.query = Some(query.clone());
        } else if let Some(days) = self.days {
            config.fetch.query = None;
            config.fetch.days = Some(days);
        }
        if let Some(output) = &self.output {
            config.output.dir = output.clone();
        }
        if self.max.is_some() {
            config.fetch.max_messages = self.max;
        }
        config.validate()
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the log writer so lines print above bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        // Use {elapsed} for human-readable format (e.g., "1s", "234ms")
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    /// Draws nothing
    pub fn hidden() -> Self {
        Self::with_multi_progress(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one export run
#[derive(Debug, Clone)]
pub struct Report {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub query: String,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub listed: usize,
    pub windows_submitted: usize,
    pub windows_failed: usize,
    pub quota_units: u64,
    pub stats: ExportStats,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========================================")?;
        writeln!(f, "Export Summary{}", if self.dry_run { " (dry run)" } else { "" })?;
        writeln!(f, "========================================")?;
        writeln!(f, "Run ID: {}", self.run_id)?;
        writeln!(f, "Query: {}", self.query)?;
        writeln!(f, "Output: {}", self.output_dir.display())?;
        writeln!(f, "Duration: {} seconds", self.duration_seconds)?;
        writeln!(f, "Messages listed: {}", self.listed)?;
        writeln!(
            f,
            "Batches: {} ({} failed, {} quota units)",
            self.windows_submitted, self.windows_failed, self.quota_units
        )?;
        writeln!(f, "Messages fetched: {}", self.stats.fetched)?;
        if self.dry_run {
            writeln!(f, "Files planned: {}", self.stats.planned)?;
        } else {
            writeln!(f, "Files written: {}", self.stats.written)?;
        }
        writeln!(f, "Drafts skipped: {}", self.stats.drafts)?;
        writeln!(f, "No content: {}", self.stats.no_content)?;
        writeln!(f, "Decode failures: {}", self.stats.decode_failures)?;
        writeln!(f, "Render failures: {}", self.stats.render_failures)?;
        writeln!(f, "Transport failures: {}", self.stats.transport_failures)?;
        writeln!(f, "Write failures: {}", self.stats.sink_failures)?;
        write!(f, "========================================")
    }
}

fn build_pipeline(config: &Config, dry_run: bool) -> ExportPipeline {
    let sink = FileSink::new(config.output.dir.clone())
        .with_manifest(config.output.manifest)
        .with_dry_run(dry_run);
    let normalizer = ContentNormalizer::default()
        .with_base_url(config.output.base_url.clone())
        .with_tidy(config.output.tidy_markdown);
    ExportPipeline::new(normalizer, Arc::new(sink))
}

async fn connect(cli: &Cli, config: &Config) -> Result<Arc<dyn MailApi>> {
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    Ok(Arc::new(GmailApiClient::new(
        hub,
        config.fetch.max_concurrent_requests,
    )))
}

/// List, fetch and persist every message the configured query matches
pub async fn export_messages(
    api: Arc<dyn MailApi>,
    config: &Config,
    dry_run: bool,
    reporter: &ProgressReporter,
) -> Result<Report> {
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    let query = config.fetch.effective_query_now();
    info!("Starting export run {} with query '{}'", run_id, query);

    let light = FixedWindowLimiter::new(config.quota.light_policy());
    let heavy = FixedWindowLimiter::new(config.quota.heavy_policy());

    let list_spinner = reporter.add_spinner("Listing messages...");
    let paginator = Paginator::new(Arc::clone(&api), light.clone(), config.fetch.page_size)
        .with_max_messages(config.fetch.max_messages);
    let ids = paginator.list(&query).await?;
    reporter.finish_spinner(&list_spinner, &format!("Found {} messages", ids.len()));

    let fetch_bar = reporter.add_progress_bar(ids.len() as u64, "Exporting messages...");
    let mut pipeline = build_pipeline(config, dry_run).with_progress(fetch_bar.clone());

    let scheduler = BatchScheduler::new(
        api,
        heavy.clone(),
        config.fetch.batch_size,
        config.quota.cost_per_batch,
    )
    .with_cooldown(config.fetch.cooldown());
    let state = scheduler.run(&ids, &mut pipeline).await;

    let stats = pipeline.into_stats();
    fetch_bar.finish_with_message(format!(
        "Exported {} of {} messages",
        stats.written + stats.planned,
        ids.len()
    ));

    let light_stats = light.stats().await;
    let heavy_stats = heavy.stats().await;
    let completed_at = Utc::now();

    Ok(Report {
        run_id,
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_seconds(),
        query,
        output_dir: config.output.dir.clone(),
        dry_run,
        listed: ids.len(),
        windows_submitted: state.windows_submitted,
        windows_failed: state.windows_failed,
        quota_units: light_stats.total_consumed + heavy_stats.total_consumed,
        stats,
    })
}

/// Fetch one message under the light policy and run it through the pipeline
pub async fn fetch_one(
    api: Arc<dyn MailApi>,
    config: &Config,
    id: &MessageId,
    dry_run: bool,
) -> Result<MessageOutcome> {
    let light = FixedWindowLimiter::new(config.quota.light_policy());
    light.acquire(QuotaCost::Call).await;

    let message = api.get_message(id).await?;
    build_pipeline(config, dry_run).process(&message, 1).await
}

/// `export` command
pub async fn run_export(
    cli: &Cli,
    options: &ExportOptions,
    multi: MultiProgress,
) -> Result<Report> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    options.apply(&mut config)?;
    reporter.finish_spinner(
        &config_spinner,
        &format!("Configuration loaded from {:?}", cli.config),
    );

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let api = connect(cli, &config).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated successfully");

    export_messages(api, &config, options.dry_run, &reporter).await
}

/// `fetch` command
pub async fn run_fetch(
    cli: &Cli,
    id: &str,
    output: Option<PathBuf>,
    dry_run: bool,
) -> Result<MessageOutcome> {
    let mut config = Config::load(&cli.config).await?;
    ExportOptions {
        output,
        ..Default::default()
    }
    .apply(&mut config)?;

    let api = connect(cli, &config).await?;
    fetch_one(api, &config, &MessageId::from(id), dry_run).await
}
