//! List command implementation.

use super::{open_read_only, OutputFormat};
use serde::Serialize;
use std::path::Path;
use stopsync_protocol::{FavouriteStop, SyncState};

/// One printed row.
#[derive(Debug, Serialize)]
pub struct StopRow {
    /// Stop identifier.
    pub stop_id: String,
    /// User label.
    pub description: String,
    /// Pinned to the top.
    pub preferred: bool,
    /// Last edit, epoch millis.
    pub last_modified: i64,
    /// Local sync state.
    pub sync_state: String,
    /// Server change tag.
    pub remote_version: Option<u64>,
}

impl From<&FavouriteStop> for StopRow {
    fn from(stop: &FavouriteStop) -> Self {
        Self {
            stop_id: stop.stop_id.to_string(),
            description: stop.description.clone(),
            preferred: stop.preferred,
            last_modified: stop.last_modified.as_millis(),
            sync_state: format!("{:?}", stop.sync_state),
            remote_version: stop.remote_version,
        }
    }
}

/// Collects the rows to print, in display order.
///
/// Records awaiting a confirmed delete are hidden unless `all` is set.
pub fn collect(path: &Path, all: bool) -> Result<Vec<StopRow>, Box<dyn std::error::Error>> {
    let store = open_read_only(path)?;
    Ok(store
        .list_all()
        .iter()
        .filter(|stop| all || stop.sync_state != SyncState::PendingDelete)
        .map(StopRow::from)
        .collect())
}

/// Runs the list command.
pub fn run(path: &Path, all: bool, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let rows = collect(path, all)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => print_text_output(&rows),
    }
    Ok(())
}

fn print_text_output(rows: &[StopRow]) {
    if rows.is_empty() {
        println!("No favourite stops");
        return;
    }
    for row in rows {
        let pin = if row.preferred { "*" } else { " " };
        println!(
            "{} {:<12} {:<32} {:<13} v{}",
            pin,
            row.stop_id,
            row.description,
            row.sync_state,
            row.remote_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
    println!("{} stop(s)", rows.len());
}
