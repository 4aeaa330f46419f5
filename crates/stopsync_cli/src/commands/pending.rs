//! Pending command implementation.

use super::{open_read_only, OutputFormat};
use serde::Serialize;
use std::path::Path;
use stopsync_protocol::{OperationKind, PendingOperation};

/// One queued operation as printed.
#[derive(Debug, Serialize)]
pub struct PendingRow {
    /// Enqueue sequence number.
    pub seq: u64,
    /// Target stop.
    pub stop_id: String,
    /// `upsert` or `delete`.
    pub kind: &'static str,
    /// Push attempts so far.
    pub attempts: u32,
    /// Enqueue time, epoch millis.
    pub enqueued_at: i64,
    /// Last attempt, epoch millis.
    pub last_attempt_at: Option<i64>,
}

impl From<&PendingOperation> for PendingRow {
    fn from(op: &PendingOperation) -> Self {
        Self {
            seq: op.seq,
            stop_id: op.stop_id.to_string(),
            kind: match op.kind {
                OperationKind::Upsert => "upsert",
                OperationKind::Delete => "delete",
            },
            attempts: op.attempt_count,
            enqueued_at: op.enqueued_at.as_millis(),
            last_attempt_at: op.last_attempt_at.map(|t| t.as_millis()),
        }
    }
}

/// Runs the pending command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_read_only(path)?;
    let rows: Vec<PendingRow> = store.list_pending().iter().map(PendingRow::from).collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("Nothing waiting to be pushed");
            }
            for row in &rows {
                println!(
                    "#{:<6} {:<7} {:<12} attempts={}",
                    row.seq, row.kind, row.stop_id, row.attempts
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn rows_follow_enqueue_order() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let store = open_read_only(dir.path()).unwrap();
        let rows: Vec<_> = store.list_pending().iter().map(PendingRow::from).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stop_id, "1002");
        assert_eq!(rows[0].kind, "upsert");
        assert_eq!(rows[1].kind, "delete");
        assert!(rows[0].seq < rows[1].seq);
    }
}
