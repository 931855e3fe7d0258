//! Per-message processing: extract, normalize, build, persist

use async_trait::async_trait;
use indicatif::ProgressBar;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::{Delivery, ResultHandler};
use crate::error::{GmailError, Result};
use crate::metadata::MetadataBuilder;
use crate::mime::MimeExtractor;
use crate::models::{RawMessage, RequestId};
use crate::normalize::ContentNormalizer;
use crate::sink::{RecordSink, SinkOutcome};

/// Outcome counters for one export run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub delivered: usize,
    pub fetched: usize,
    pub written: usize,
    pub planned: usize,
    pub drafts: usize,
    pub no_content: usize,
    pub decode_failures: usize,
    pub render_failures: usize,
    pub transport_failures: usize,
    pub sink_failures: usize,
}

impl ExportStats {
    pub fn failures(&self) -> usize {
        self.decode_failures + self.render_failures + self.transport_failures + self.sink_failures
    }
}

/// What became of one fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Draft,
    Sunk(SinkOutcome),
}

pub struct ExportPipeline {
    extractor: MimeExtractor,
    normalizer: ContentNormalizer,
    builder: MetadataBuilder,
    sink: Arc<dyn RecordSink>,
    stats: ExportStats,
    progress: Option<ProgressBar>,
}

impl ExportPipeline {
    pub fn new(normalizer: ContentNormalizer, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            extractor: MimeExtractor::new(),
            normalizer,
            builder: MetadataBuilder::new(),
            sink,
            stats: ExportStats::default(),
            progress: None,
        }
    }

    /// Tick `progress` once per delivery
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    pub fn into_stats(self) -> ExportStats {
        self.stats
    }

    /// Run one message through the pipeline
    ///
    /// Drafts are skipped before any extraction happens.
    pub async fn process(
        &self,
        message: &RawMessage,
        request_id: RequestId,
    ) -> Result<MessageOutcome> {
        if message.labels.is_draft() {
            debug!("[{}] Skipping draft", message.id);
            return Ok(MessageOutcome::Draft);
        }

        let content = self.extractor.extract(&message.payload)?;
        let normalized = self.normalizer.normalize(&content)?;
        let record = self.builder.build(message, request_id, &content, normalized);

        let outcome = self.sink.write(&record).await?;
        Ok(MessageOutcome::Sunk(outcome))
    }

    fn record_outcome(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Draft => self.stats.drafts += 1,
            MessageOutcome::Sunk(SinkOutcome::Written(_)) => self.stats.written += 1,
            MessageOutcome::Sunk(SinkOutcome::Planned(_)) => self.stats.planned += 1,
            MessageOutcome::Sunk(SinkOutcome::NoContent) => self.stats.no_content += 1,
        }
    }

    fn record_failure(&mut self, error: &GmailError) {
        match error {
            GmailError::Decode { .. } | GmailError::InvalidMessageFormat(_) => {
                self.stats.decode_failures += 1
            }
            GmailError::Render(_) => self.stats.render_failures += 1,
            GmailError::IoError(_) | GmailError::SerializationError(_) => {
                self.stats.sink_failures += 1
            }
            _ => self.stats.transport_failures += 1,
        }
    }
}

#[async_trait]
impl ResultHandler for ExportPipeline {
    async fn on_result(&mut self, delivery: Delivery) {
        self.stats.delivered += 1;
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }

        let message = match delivery.result {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] Fetch failed: {}", delivery.id, e);
                self.record_failure(&e);
                return;
            }
        };
        self.stats.fetched += 1;

        match self.process(&message, delivery.request_id).await {
            Ok(outcome) => self.record_outcome(outcome),
            Err(e) => {
                warn!("[{}] Skipped: {}", delivery.id, e);
                self.record_failure(&e);
            }
        }
    }
}
