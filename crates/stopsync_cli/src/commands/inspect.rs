//! Inspect command implementation.

use super::{open_read_only, OutputFormat};
use stopsync_engine::StoreSummary;
use std::path::Path;

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_read_only(path)?;
    let summary = store.summary()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text_output(path, &summary),
    }
    Ok(())
}

fn print_text_output(path: &Path, summary: &StoreSummary) {
    println!("StopSync cache: {}", path.display());
    println!();
    println!("Records:");
    println!("  Total:           {}", summary.records);
    println!("  Pending push:    {}", summary.pending_push);
    println!("  Pending delete:  {}", summary.pending_delete);
    println!("  Queued ops:      {}", summary.queued_operations);
    println!();
    println!("Sync:");
    println!("  Change token:    {}", yes_no(summary.has_change_token));
    println!("  Cloud data:      {}", yes_no(summary.cloud_data_received));
    println!("  Legacy imported: {}", yes_no(summary.legacy_migrated));
    println!();
    println!("Journal:");
    println!("  Size:            {} bytes", summary.journal_size);
    println!("  Frames since compaction: {}", summary.frames_since_compaction);
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
