use crate::core::audit::AuditSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::format_record;

/// Appends audit records to a text file, opening it for every write.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, text: &str) -> Result<()> {
        let mut line = format_record(Local::now(), text);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;

        // Single write so concurrent appenders never split a line.
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write audit log: {}", self.path.display()))?;
        file.flush().await?;

        debug!(path = %self.path.display(), "Audit record written");
        Ok(())
    }
}
