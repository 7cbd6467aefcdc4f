//! Inspect command implementation.

use super::format_size;
use serde::Serialize;
use sofadb_core::Database;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// On-disk format version.
    pub disk_version: u8,
    /// File size in bytes.
    pub file_size: u64,
    /// Position of the latest header.
    pub header_position: u64,
    /// Latest committed sequence number.
    pub update_seq: u64,
    /// Highest purged tombstone sequence.
    pub purge_seq: u64,
    /// Number of live documents.
    pub doc_count: u64,
    /// Number of tombstones.
    pub deleted_count: u64,
    /// Bytes used by current revisions.
    pub space_used: u64,
    /// Bytes a compaction could reclaim, roughly.
    pub reclaimable: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads the inspection data for the database at `path`.
pub fn collect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let db = Database::open_read_only(path)?;
    let info = db.info()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        disk_version: info.disk_version,
        file_size: info.file_size,
        header_position: info.header_position,
        update_seq: info.committed_seq.as_u64(),
        purge_seq: info.purge_seq.as_u64(),
        doc_count: info.doc_count,
        deleted_count: info.deleted_count,
        space_used: info.space_used,
        reclaimable: info.file_size.saturating_sub(info.space_used),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("SofaDB Database Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Disk version: {}", result.disk_version);
    println!();
    println!("Storage:");
    println!("  File size:     {}", format_size(result.file_size));
    println!("  Live data:     {}", format_size(result.space_used));
    println!("  Reclaimable:   {}", format_size(result.reclaimable));
    println!("  Header at:     {}", result.header_position);
    println!();
    println!("Sequences:");
    println!("  Update seq:    {}", result.update_seq);
    println!("  Purge seq:     {}", result.purge_seq);
    println!();
    println!("Documents:");
    println!("  Live:          {}", result.doc_count);
    println!("  Tombstones:    {}", result.deleted_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inspect.sofa");
        {
            let db = Database::open(&path).unwrap();
            db.put(b"a", b"", b"1").unwrap();
            db.put(b"b", b"", b"2").unwrap();
            db.delete(b"b").unwrap();
            db.commit().unwrap();
        }

        let result = collect(&path).unwrap();
        assert_eq!(result.doc_count, 1);
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.update_seq, 3);
        assert_eq!(result.file_size, std::fs::metadata(&path).unwrap().len());
        assert!(result.space_used > 0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["doc_count"], 1);
    }

    #[test]
    fn inspect_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(collect(&dir.path().join("nope.sofa")).is_err());
    }
}
