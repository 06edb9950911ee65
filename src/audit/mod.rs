pub mod file;
pub mod memory;

pub use file::FileAuditSink;
pub use memory::MemoryAuditSink;

use chrono::{DateTime, Local};

/// Formats one audit line, `[<timestamp>] <command>`, without the newline.
pub fn format_record(at: DateTime<Local>, command: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S%.6f"), command)
}
