//! Persists records as Markdown files plus a JSON-lines manifest

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::EmailRecord;

pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Longest sender or subject component kept in a file name
pub const MAX_COMPONENT_CHARS: usize = 50;

/// What happened to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Written(PathBuf),
    /// Dry run: the file that would have been written
    Planned(PathBuf),
    /// No Markdown body, nothing written
    NoContent,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &EmailRecord) -> Result<SinkOutcome>;
}

/// Truncate to `max_chars` and replace anything outside `[A-Za-z0-9_.\- ]`
pub fn safe_component(value: &str, max_chars: usize) -> String {
    value
        .chars()
        .take(max_chars)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `email_<requestId>_<sender email>_<subject>.md`
pub fn record_file_name(record: &EmailRecord) -> String {
    format!(
        "email_{}_{}_{}.md",
        record.request_id,
        safe_component(&record.sender_email, MAX_COMPONENT_CHARS),
        safe_component(&record.subject, MAX_COMPONENT_CHARS)
    )
}

/// Writes each record's Markdown into one directory
pub struct FileSink {
    dir: PathBuf,
    manifest: bool,
    dry_run: bool,
    manifest_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifest: true,
            dry_run: false,
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn with_manifest(mut self, manifest: bool) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    async fn append_manifest(&self, record: &EmailRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.manifest_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.manifest_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Write to a temporary sibling, then rename over `path`
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl RecordSink for FileSink {
    async fn write(&self, record: &EmailRecord) -> Result<SinkOutcome> {
        let Some(markdown) = record.clean_markdown.as_deref() else {
            debug!("[{}] No Markdown body, nothing written", record.id);
            return Ok(SinkOutcome::NoContent);
        };

        let path = self.dir.join(record_file_name(record));

        if self.dry_run {
            info!("[dry run] {}", record.metadata_line());
            return Ok(SinkOutcome::Planned(path));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, markdown.as_bytes()).await?;

        info!("{}", record.metadata_line());
        if self.manifest {
            self.append_manifest(record).await?;
        }

        debug!("Wrote {:?}", path);
        Ok(SinkOutcome::Written(path))
    }
}
