//! Gmail Export
//!
//! Lists the messages matching a Gmail search query, fetches them in rate-limited
//! batches, and writes each one as a cleaned Markdown file.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 with a cached, read-only token
//! - **Listing**: cursor-based pagination under a light call quota
//! - **Fetching**: grouped fetches under a heavy cost-unit quota
//! - **Extraction**: MIME tree walk isolating plain, html and attachments
//! - **Normalization**: html sanitizing and Markdown rendering
//! - **Persistence**: one Markdown file per message plus a JSON-lines manifest
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_export::{auth, cli, client::GmailApiClient, config::Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-export/token.json".as_ref(),
//!     ).await?;
//!     let api = Arc::new(GmailApiClient::new(hub, config.fetch.max_concurrent_requests));
//!
//!     let reporter = cli::ProgressReporter::new();
//!     let report = cli::export_messages(api, &config, false, &reporter).await?;
//!     println!("{}", report);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`batch`] - Grouped fetching and per-message delivery
//! - [`cli`] - Command-line interface and export orchestration
//! - [`client`] - The `MailApi` seam and the Gmail implementation
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`metadata`] - Record assembly from headers and labels
//! - [`mime`] - MIME tree extraction
//! - [`models`] - Core data structures
//! - [`normalize`] - Sanitizing and Markdown rendering
//! - [`paginator`] - Message listing
//! - [`pipeline`] - Per-message processing and run statistics
//! - [`rate_limiter`] - Fixed-window quota gate
//! - [`sink`] - File output

pub mod auth;
pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metadata;
pub mod mime;
pub mod models;
pub mod normalize;
pub mod paginator;
pub mod pipeline;
pub mod rate_limiter;
pub mod sink;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{
    AttachmentRef, EmailRecord, ExtractedContent, Headers, Labels, MessageId, NormalizedContent,
    PayloadNode, RawMessage, RequestId,
};

// Remote access
pub use client::{GmailApiClient, MailApi, MessagePage};
pub use rate_limiter::{FixedWindowLimiter, QuotaCost, RatePolicy};

// Processing stages
pub use batch::{BatchScheduler, Delivery, ResultHandler, SchedulerState};
pub use metadata::MetadataBuilder;
pub use mime::MimeExtractor;
pub use normalize::{ContentNormalizer, HtmdRenderer, MarkdownRenderer, Sanitizer, ScriptStyleSanitizer};
pub use paginator::Paginator;
pub use pipeline::{ExportPipeline, ExportStats, MessageOutcome};
pub use sink::{FileSink, RecordSink, SinkOutcome};

// Config types
pub use config::{Config, FetchConfig, OutputConfig, QuotaConfig};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ExportOptions, ProgressReporter, Report};
