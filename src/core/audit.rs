//! Audit trail abstraction for accepted socket commands

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, text: &str) -> Result<()>;
}
