//! Timestep discovery over cache artifact names.
//!
//! Enumeration lists the cache root and parses the timestep out of each table
//! artifact name. It never opens an artifact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::cache::TABLE_EXTENSION;
use crate::error::{DumpError, DumpResult};
use crate::frame::RecordKind;

#[derive(Debug, Clone)]
pub struct TimestepIndex {
    root: PathBuf,
}

impl TimestepIndex {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Ascending cached timesteps for `kind`; empty when nothing is cached yet.
    pub fn enumerate(&self, kind: RecordKind) -> DumpResult<Vec<u64>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DumpError::io(&self.root, e)),
        };

        let mut timesteps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DumpError::io(&self.root, e))?;
            let name = entry.file_name();
            if let Some(step) = name.to_str().and_then(|n| parse_table_name(kind, n)) {
                timesteps.push(step);
            }
        }
        timesteps.sort_unstable();
        timesteps.dedup();

        log::debug!(
            "Found {} cached {} timesteps in {}",
            timesteps.len(),
            kind,
            self.root.display()
        );
        Ok(timesteps)
    }

    /// Cached timesteps for every record kind that has at least one.
    pub fn summary(&self) -> DumpResult<Vec<(RecordKind, Vec<u64>)>> {
        let mut summary = Vec::new();
        for kind in RecordKind::ALL {
            let steps = self.enumerate(kind)?;
            if !steps.is_empty() {
                summary.push((kind, steps));
            }
        }
        Ok(summary)
    }
}

/// `<prefix>_<digits>.npy` → timestep. Box artifacts and temp files do not match.
fn parse_table_name(kind: RecordKind, name: &str) -> Option<u64> {
    let stem = name.strip_suffix(TABLE_EXTENSION)?.strip_suffix('.')?;
    let digits = stem.strip_prefix(kind.cache_prefix())?.strip_prefix('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
