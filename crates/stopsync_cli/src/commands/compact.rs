//! Compact command implementation.

use super::open_existing;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    let before = store.summary()?;

    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Records:      {}", before.records);
    println!("  Queued ops:   {}", before.queued_operations);
    println!("  Size before:  {} bytes", before.journal_size);
    println!("  Frames since last compaction: {}", before.frames_since_compaction);

    if dry_run {
        return Ok(());
    }
    if before.frames_since_compaction <= 1 {
        println!();
        println!("No compaction needed - journal is already a single snapshot");
        return Ok(());
    }

    store.compact()?;
    let after = store.summary()?;
    println!("  Size after:   {} bytes", after.journal_size);
    println!();
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn compaction_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let (records, pending) = {
            let store = open_existing(dir.path()).unwrap();
            (store.list_all(), store.list_pending())
        };

        run(dir.path(), true).unwrap();
        run(dir.path(), false).unwrap();

        let store = open_existing(dir.path()).unwrap();
        assert_eq!(store.list_all(), records);
        assert_eq!(store.list_pending(), pending);
        assert_eq!(store.summary().unwrap().frames_since_compaction, 1);
    }
}
