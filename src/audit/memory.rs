use crate::core::audit::AuditSink;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use tokio::sync::Mutex;

use super::format_record;

/// Keeps audit records in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<String>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<String> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, text: &str) -> Result<()> {
        self.records
            .lock()
            .await
            .push(format_record(Local::now(), text));
        Ok(())
    }
}
