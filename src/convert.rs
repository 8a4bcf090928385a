//! Batch conversion of raw dump files into the columnar cache.
//!
//! # Process
//! 1. List `<dump_prefix>.<step>.dat` files and order them by step
//! 2. Make sure the cache root exists; failure here aborts the run
//! 3. Parse and cache every file, recording per-file failures
//!
//! Each `(kind, timestep)` owns its own cache artifacts, so files can be
//! converted in parallel without coordination.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::cache::ColumnarCache;
use crate::error::{DumpError, DumpResult};
use crate::frame::RecordKind;
use crate::parser::DumpRecordParser;

const DUMP_EXTENSION: &str = "dat";

/// A raw dump file and the step encoded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub path: PathBuf,
    pub step: u64,
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    /// Timesteps written to the cache, ascending.
    pub converted: Vec<u64>,
    pub failed: Vec<(PathBuf, DumpError)>,
}

impl ConversionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Dump files of `kind` in `dir`, sorted by their numeric step.
pub fn discover_dumps<P: AsRef<Path>>(dir: P, kind: RecordKind) -> DumpResult<Vec<DumpFile>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|e| DumpError::io(dir, e))?;

    let mut dumps = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DumpError::io(dir, e))?;
        let name = entry.file_name();
        let Some(step) = name.to_str().and_then(|n| parse_dump_name(kind, n)) else {
            continue;
        };
        dumps.push(DumpFile {
            path: entry.path(),
            step,
        });
    }
    dumps.sort_by_key(|d| d.step);
    Ok(dumps)
}

/// Parse and cache every `kind` dump in `dir`.
pub fn convert_dumps<P: AsRef<Path>>(
    dir: P,
    kind: RecordKind,
    cache: &ColumnarCache,
    parallel: bool,
) -> DumpResult<ConversionReport> {
    let dir = dir.as_ref();
    let dumps = discover_dumps(dir, kind)?;
    fs::create_dir_all(cache.root()).map_err(|e| DumpError::io(cache.root(), e))?;

    log::info!(
        "Converting {} {} dumps from {} into {}",
        dumps.len(),
        kind,
        dir.display(),
        cache.root().display()
    );

    let parser = DumpRecordParser::new(kind);
    let convert_one = |dump: &DumpFile| -> DumpResult<u64> {
        let frame = parser.parse_file(&dump.path)?;
        if frame.timestep() != dump.step {
            log::debug!(
                "{} is named for step {} but holds timestep {}",
                dump.path.display(),
                dump.step,
                frame.timestep()
            );
        }
        Ok(cache.write(kind, &frame)?.timestep)
    };

    let results: Vec<(&DumpFile, DumpResult<u64>)> = if parallel {
        dumps.par_iter().map(|d| (d, convert_one(d))).collect()
    } else {
        dumps.iter().map(|d| (d, convert_one(d))).collect()
    };

    let mut report = ConversionReport::default();
    for (dump, result) in results {
        match result {
            Ok(timestep) => report.converted.push(timestep),
            Err(e) if e.is_frame_scoped() => {
                log::warn!("Skipping {}: {}", dump.path.display(), e);
                report.failed.push((dump.path.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }
    report.converted.sort_unstable();

    log::info!(
        "Converted {} {} frames ({} failed)",
        report.converted.len(),
        kind,
        report.failed.len()
    );
    Ok(report)
}

/// `<dump_prefix>.<digits>.dat` → step.
fn parse_dump_name(kind: RecordKind, name: &str) -> Option<u64> {
    let stem = name.strip_suffix(DUMP_EXTENSION)?.strip_suffix('.')?;
    let digits = stem.strip_prefix(kind.dump_prefix())?.strip_prefix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
