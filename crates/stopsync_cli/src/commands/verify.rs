//! Verify command implementation.

use super::journal_path;
use stopsync_engine::{inspect_journal, JournalReport};
use stopsync_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Walks the journal in `path` without replaying it.
pub fn check(path: &Path) -> Result<JournalReport, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&journal_path(path)?)?;
    Ok(inspect_journal(&backend.read_all()?))
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying cache at {:?}", path);
    println!();

    let report = check(path)?;
    println!("Journal:");
    println!("  Size:    {} bytes", report.size);
    println!("  Frames:  {}", report.frames);
    println!("  Entries: {}", report.entries);

    match &report.first_error {
        None => {
            if report.torn_tail {
                println!(
                    "  ⚠ Torn tail: {} bytes after offset {} (an interrupted write; dropped on next open)",
                    report.size - report.valid_len,
                    report.valid_len
                );
            }
            println!();
            println!("✓ Verification passed");
            Ok(())
        }
        Some((offset, reason)) => {
            println!("  Intact prefix: {} bytes", report.valid_len);
            println!();
            println!("✗ Verification failed at offset {offset}: {reason}");
            Err("Journal verification failed".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;
    use stopsync_engine::JOURNAL_FILE_NAME;

    #[test]
    fn healthy_journal_passes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let report = check(dir.path()).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.frames, 2);
        assert!(run(dir.path()).is_ok());
    }

    #[test]
    fn damaged_length_fails_instead_of_looking_torn() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let journal = dir.path().join(JOURNAL_FILE_NAME);
        let mut bytes = std::fs::read(&journal).unwrap();
        bytes[9] = 0x7f;
        std::fs::write(&journal, &bytes).unwrap();

        let report = check(dir.path()).unwrap();
        assert_eq!(report.frames, 0);
        assert!(!report.torn_tail);
        assert_eq!(report.first_error.as_ref().map(|(offset, _)| *offset), Some(0));
        assert!(run(dir.path()).is_err());
        assert_eq!(std::fs::read(&journal).unwrap(), bytes);
    }

    #[test]
    fn torn_tail_is_reported_but_passes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let journal = dir.path().join(JOURNAL_FILE_NAME);
        let mut bytes = std::fs::read(&journal).unwrap();
        let intact = bytes.len() as u64;
        bytes.extend_from_slice(b"SSJF\x01");
        std::fs::write(&journal, &bytes).unwrap();

        let report = check(dir.path()).unwrap();
        assert!(report.is_healthy());
        assert!(report.torn_tail);
        assert_eq!(report.valid_len, intact);
        assert!(run(dir.path()).is_ok());
    }

    #[test]
    fn flipped_byte_fails() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let journal = dir.path().join(JOURNAL_FILE_NAME);
        let mut bytes = std::fs::read(&journal).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        std::fs::write(&journal, bytes).unwrap();

        let report = check(dir.path()).unwrap();
        assert!(!report.is_healthy());
        assert!(run(dir.path()).is_err());
    }
}
