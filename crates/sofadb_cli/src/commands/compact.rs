//! Compact command implementation.

use super::format_size;
use sofadb_core::{
    CancellationToken, CompactionConfig, CompactionResult, Database, SequenceNumber,
};
use std::path::{Path, PathBuf};

/// Options for the compact command.
#[derive(Debug, Default)]
pub struct CompactOptions {
    /// Write the result here instead of replacing the database.
    pub output: Option<PathBuf>,
    /// Keep tombstones written at or after this sequence number.
    pub keep_tombstones_since: Option<u64>,
    /// Compress bodies in the output.
    pub compress: bool,
    /// Only report what would be done.
    pub dry_run: bool,
}

impl CompactOptions {
    fn config(&self) -> CompactionConfig {
        let config = match self.keep_tombstones_since {
            Some(seq) => CompactionConfig::with_purge_horizon(SequenceNumber::new(seq)),
            None => CompactionConfig::purge_all(),
        };
        config.compress_bodies(self.compress)
    }
}

/// Runs the compact command.
pub fn run(path: &Path, options: &CompactOptions) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting {:?}", path);
    if options.dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    if options.dry_run {
        let db = Database::open_read_only(path)?;
        let info = db.info()?;
        println!("Compaction Analysis:");
        println!("  Live documents: {}", info.doc_count);
        println!(
            "  Tombstones:     {} (will be {})",
            info.deleted_count,
            if options.keep_tombstones_since.is_some() {
                "purged below the horizon"
            } else {
                "purged"
            }
        );
        println!("  File size:      {}", format_size(info.file_size));
        println!("  Live data:      {}", format_size(info.space_used));
        return Ok(());
    }

    let result = compact(path, options)?;
    print_result(&result);
    println!("✓ Compaction complete");
    Ok(())
}

/// Compacts the database at `path` as described by `options`.
pub fn compact(
    path: &Path,
    options: &CompactOptions,
) -> Result<CompactionResult, Box<dyn std::error::Error>> {
    let db = Database::open(path)?;
    let result = match &options.output {
        Some(output) => db.compact_with(output, options.config(), &CancellationToken::new())?,
        None => db.compact_in_place(options.config())?,
    };
    db.close()?;
    Ok(result)
}

fn print_result(result: &CompactionResult) {
    println!("Compaction Result:");
    println!("  Documents copied:  {}", result.docs_copied);
    println!("  Tombstones purged: {}", result.tombstones_purged);
    println!("  Tombstones kept:   {}", result.tombstones_kept);
    println!();
    println!("  Size before: {}", format_size(result.bytes_before));
    println!("  Size after:  {}", format_size(result.bytes_after));
    let saved = result.bytes_before.saturating_sub(result.bytes_after);
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if result.bytes_before > 0 {
            (saved as f64 / result.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(path: &Path) {
        let db = Database::open(path).unwrap();
        for round in 0..3u8 {
            for i in 0..10u32 {
                db.put(format!("d{i}").as_bytes(), b"", &[round; 200]).unwrap();
            }
            db.commit().unwrap();
        }
        db.delete(b"d0").unwrap();
        db.commit().unwrap();
    }

    #[test]
    fn compacts_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sofa");
        sample(&path);

        let result = compact(&path, &CompactOptions::default()).unwrap();
        assert_eq!(result.docs_copied, 9);
        assert_eq!(result.tombstones_purged, 1);
        assert!(result.bytes_after < result.bytes_before);

        let db = Database::open_read_only(&path).unwrap();
        assert_eq!(db.get(b"d5").unwrap(), vec![2u8; 200]);
    }

    #[test]
    fn compacts_to_output_with_horizon() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sofa");
        let output = dir.path().join("copy.sofa");
        sample(&path);

        let options = CompactOptions {
            output: Some(output.clone()),
            keep_tombstones_since: Some(1),
            ..CompactOptions::default()
        };
        let result = compact(&path, &options).unwrap();
        assert_eq!(result.tombstones_kept, 1);
        assert!(Database::open_read_only(&output).unwrap().get_info(b"d0").unwrap().deleted);
        // The source is untouched.
        assert_eq!(Database::open_read_only(&path).unwrap().info().unwrap().deleted_count, 1);
    }
}
