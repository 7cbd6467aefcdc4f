//! Verify command implementation.

use super::display_id;
use crate::CliError;
use sofadb_core::block::{BlockStore, BlockTag, MARKER_HEADER, PAGE_SIZE};
use sofadb_core::{Database, Header, SequenceNumber};
use sofadb_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Pages marked as header pages.
    pub header_pages: usize,
    /// Header pages holding a valid header.
    pub valid_headers: usize,
    /// Documents whose blocks were read back.
    pub documents_checked: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, walk_indexes: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {:?}", path);
    println!();

    let result = check(path, walk_indexes)?;

    println!("Headers:");
    println!("  Header pages:  {}", result.header_pages);
    println!("  Valid headers: {}", result.valid_headers);
    if walk_indexes {
        println!("Documents:");
        println!("  Checked:       {}", result.documents_checked);
    }
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

/// Checks the database at `path` without modifying it.
///
/// Torn headers left behind by interrupted commits are counted but are not
/// errors; only the latest header has to be valid.
pub fn check(path: &Path, walk_indexes: bool) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    scan_headers(path, &mut result)?;
    if walk_indexes && result.valid_headers > 0 {
        walk(path, &mut result)?;
    }
    if result.valid_headers == 0 {
        result.errors.push("no valid header found".to_string());
    }
    Ok(result)
}

fn scan_headers(path: &Path, result: &mut VerifyResult) -> Result<(), Box<dyn std::error::Error>> {
    let raw = FileBackend::open_read_only(path)?;
    let size = raw.size()?;
    let store = BlockStore::new(Box::new(FileBackend::open_read_only(path)?));

    let mut page = 0u64;
    while page < size {
        if raw.read_at(page, 1)?[0] == MARKER_HEADER {
            result.header_pages += 1;
            match store.read_tagged(page, BlockTag::Header) {
                Ok(payload) => match Header::decode(&payload, page) {
                    Ok(_) => result.valid_headers += 1,
                    Err(e) => result.errors.push(format!("header at {page}: {e}")),
                },
                Err(e) => {
                    tracing::debug!(pos = page, error = %e, "torn header");
                }
            }
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

fn walk(path: &Path, result: &mut VerifyResult) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_read_only(path)?;
    let snapshot = db.snapshot()?;
    let header = snapshot.header();

    let changes = match snapshot.changes_since(SequenceNumber::ZERO) {
        Ok(changes) => changes,
        Err(e) => {
            result.errors.push(format!("by-seq index: {e}"));
            return Ok(());
        }
    };
    let mut last_seq = SequenceNumber::ZERO;
    let mut deleted = 0u64;
    for change in &changes {
        if change.db_seq <= last_seq || change.db_seq > header.update_seq {
            result.errors.push(format!(
                "sequence {} for {} out of order",
                change.db_seq,
                display_id(&change.id)
            ));
        }
        last_seq = change.db_seq;

        if change.deleted {
            deleted += 1;
        } else if let Err(e) = snapshot.get_document(&change.id) {
            result
                .errors
                .push(format!("document {}: {e}", display_id(&change.id)));
        }
        result.documents_checked += 1;
    }

    let live = match snapshot.all_docs(None) {
        Ok(live) => live,
        Err(e) => {
            result.errors.push(format!("by-id index: {e}"));
            return Ok(());
        }
    };
    if live.windows(2).any(|w| w[0].id >= w[1].id) {
        result.errors.push("by-id index is not sorted".to_string());
    }
    if live.len() as u64 != header.doc_count {
        result.errors.push(format!(
            "header counts {} live documents, by-id index holds {}",
            header.doc_count,
            live.len()
        ));
    }
    if deleted != header.deleted_count {
        result.errors.push(format!(
            "header counts {} tombstones, by-seq index holds {deleted}",
            header.deleted_count
        ));
    }
    if changes.len() as u64 != header.doc_count + header.deleted_count {
        result.errors.push(format!(
            "by-seq index holds {} entries for {} documents",
            changes.len(),
            header.doc_count + header.deleted_count
        ));
    }
    Ok(())
}
