use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::command::{Command, UNKNOWN_COMMAND};
use crate::aggregator::RateAggregator;
use crate::core::audit::AuditSink;
use crate::core::rates::{CurrencyCode, render_batch};

/// Turns one line of client input into one response.
pub struct CommandHandler {
    aggregator: Arc<RateAggregator>,
    audit: Arc<dyn AuditSink>,
    currencies: BTreeSet<CurrencyCode>,
}

impl CommandHandler {
    pub fn new(
        aggregator: Arc<RateAggregator>,
        audit: Arc<dyn AuditSink>,
        currencies: BTreeSet<CurrencyCode>,
    ) -> Self {
        Self {
            aggregator,
            audit,
            currencies,
        }
    }

    /// Returns `None` for blank input, which gets no reply.
    pub async fn handle(&self, raw: &str) -> Option<String> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        let days = match Command::parse(line) {
            Command::Exchange { days } => days,
            Command::Unknown => {
                debug!(command = %line, "Unknown command");
                return Some(UNKNOWN_COMMAND.to_string());
            }
        };

        let batch = match self.aggregator.get_rates(days, &self.currencies).await {
            Ok(batch) => batch,
            Err(e) => return Some(format!("Invalid input: {e}")),
        };

        let response = match render_batch(&batch) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to render rates");
                return Some(format!("Failed to render rates: {e}"));
            }
        };

        if let Err(e) = self.audit.append(line).await {
            warn!(error = %e, command = %line, "Failed to write audit record");
        }

        Some(response)
    }
}
