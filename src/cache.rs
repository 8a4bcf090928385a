//! Per-timestep columnar cache.
//!
//! Each cached frame is a pair of artifacts under the cache root:
//!
//! - `<prefix>_<timestep:020>.npy`: the row table, a C-order `f64` matrix
//! - `<prefix>_box_<timestep:020>.json`: box bounds plus the ordered column schema
//!
//! Twenty digits cover every `u64`, so lexical and numeric order always agree.
//!
//! # Process
//! 1. Write both artifacts to `.tmp` siblings
//! 2. Rename the box artifact into place, then the table artifact
//! 3. Readers key on the table name, so a visible table always has its box
//!
//! Only one frame is resident at a time; [`ColumnarCache::frames`] streams a
//! whole record kind lazily in ascending timestep order.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::bounds::BoxBounds;
use crate::error::{DumpError, DumpResult};
use crate::frame::{Frame, RecordKind};
use crate::index::TimestepIndex;

pub(crate) const TABLE_EXTENSION: &str = "npy";
pub(crate) const BOX_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = "tmp";
/// Digits in `u64::MAX`.
const TIMESTEP_WIDTH: usize = 20;

/// Paths of one written cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub kind: RecordKind,
    pub timestep: u64,
    pub table_path: PathBuf,
    pub box_path: PathBuf,
}

/// Contents of the box artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FrameHeader {
    kind: RecordKind,
    timestep: u64,
    bounds: BoxBounds,
    columns: Vec<String>,
    rows: usize,
}

#[derive(Debug, Clone)]
pub struct ColumnarCache {
    root: PathBuf,
}

impl ColumnarCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> TimestepIndex {
        TimestepIndex::new(&self.root)
    }

    pub fn table_path(&self, kind: RecordKind, timestep: u64) -> PathBuf {
        self.root.join(table_file_name(kind, timestep))
    }

    pub fn box_path(&self, kind: RecordKind, timestep: u64) -> PathBuf {
        self.root.join(format!(
            "{}_box_{:0width$}.{}",
            kind.cache_prefix(),
            timestep,
            BOX_EXTENSION,
            width = TIMESTEP_WIDTH
        ))
    }

    pub fn contains(&self, kind: RecordKind, timestep: u64) -> bool {
        self.table_path(kind, timestep).is_file() && self.box_path(kind, timestep).is_file()
    }

    /// Persist one frame. Overwrites an existing entry for the same timestep.
    pub fn write(&self, kind: RecordKind, frame: &Frame) -> DumpResult<CacheEntry> {
        fs::create_dir_all(&self.root).map_err(|e| DumpError::io(&self.root, e))?;

        let timestep = frame.timestep();
        let table_path = self.table_path(kind, timestep);
        let box_path = self.box_path(kind, timestep);
        let table_tmp = temp_sibling(&table_path);
        let box_tmp = temp_sibling(&box_path);

        let header = FrameHeader {
            kind,
            timestep,
            bounds: *frame.bounds(),
            columns: frame.columns().to_vec(),
            rows: frame.num_rows(),
        };
        let staged = stage_and_commit(frame, &header, &box_path, &box_tmp, &table_path, &table_tmp);
        if let Err(e) = staged {
            for tmp in [&box_tmp, &table_tmp] {
                // Best effort; the sibling may never have been created.
                let _ = fs::remove_file(tmp);
            }
            return Err(e);
        }

        log::debug!(
            "Cached {} timestep {} ({} rows) at {}",
            kind,
            timestep,
            header.rows,
            table_path.display()
        );

        Ok(CacheEntry {
            kind,
            timestep,
            table_path,
            box_path,
        })
    }

    /// Load one cached frame.
    pub fn read(&self, kind: RecordKind, timestep: u64) -> DumpResult<Frame> {
        let table_path = self.table_path(kind, timestep);
        let box_path = self.box_path(kind, timestep);

        match (table_path.is_file(), box_path.is_file()) {
            (false, false) => return Err(DumpError::FrameNotFound { kind, timestep }),
            (true, false) => {
                return Err(inconsistent(kind, timestep, "box artifact missing"));
            }
            (false, true) => {
                return Err(inconsistent(kind, timestep, "row table artifact missing"));
            }
            (true, true) => {}
        }

        let header = read_header(&box_path)?;
        if header.kind != kind || header.timestep != timestep {
            return Err(inconsistent(
                kind,
                timestep,
                &format!(
                    "box artifact describes {} timestep {}",
                    header.kind, header.timestep
                ),
            ));
        }

        let rows = read_table(&table_path)?;
        if rows.dim() != (header.rows, header.columns.len()) {
            return Err(inconsistent(
                kind,
                timestep,
                &format!(
                    "table shape {:?} does not match schema ({} rows, {} columns)",
                    rows.dim(),
                    header.rows,
                    header.columns.len()
                ),
            ));
        }

        Frame::new(timestep, header.columns, rows, header.bounds)
    }

    /// Box bounds of a cached frame without loading its rows.
    pub fn read_bounds(&self, kind: RecordKind, timestep: u64) -> DumpResult<BoxBounds> {
        let box_path = self.box_path(kind, timestep);
        if !box_path.is_file() {
            return Err(if self.table_path(kind, timestep).is_file() {
                inconsistent(kind, timestep, "box artifact missing")
            } else {
                DumpError::FrameNotFound { kind, timestep }
            });
        }
        Ok(read_header(&box_path)?.bounds)
    }

    /// Lazily read every cached frame of `kind` in ascending timestep order.
    pub fn frames(&self, kind: RecordKind) -> DumpResult<FrameStream<'_>> {
        let timesteps = self.index().enumerate(kind)?;
        Ok(FrameStream {
            cache: self,
            kind,
            timesteps: timesteps.into_iter(),
        })
    }
}

/// Iterator over cached frames; holds at most one frame at a time.
pub struct FrameStream<'a> {
    cache: &'a ColumnarCache,
    kind: RecordKind,
    timesteps: std::vec::IntoIter<u64>,
}

impl FrameStream<'_> {
    /// Advance to the first frame that loads and survives `prepare`.
    ///
    /// Frame-scoped failures on the way are logged and skipped; anything else
    /// is returned. `None` once the stream is exhausted.
    pub fn first_usable<F>(&mut self, mut prepare: F) -> DumpResult<Option<Frame>>
    where
        F: FnMut(Frame) -> DumpResult<Frame>,
    {
        for frame in self.by_ref() {
            match frame.and_then(&mut prepare) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) if e.is_frame_scoped() => log::warn!("Skipping frame: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

impl Iterator for FrameStream<'_> {
    type Item = DumpResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let timestep = self.timesteps.next()?;
        Some(self.cache.read(self.kind, timestep))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.timesteps.size_hint()
    }
}

/// Write both temp artifacts, then rename box before table.
fn stage_and_commit(
    frame: &Frame,
    header: &FrameHeader,
    box_path: &Path,
    box_tmp: &Path,
    table_path: &Path,
    table_tmp: &Path,
) -> DumpResult<()> {
    let json = serde_json::to_vec_pretty(header).map_err(|source| DumpError::Metadata {
        path: box_path.to_path_buf(),
        source,
    })?;
    fs::write(box_tmp, json).map_err(|e| DumpError::io(box_tmp, e))?;

    let table = frame.rows().as_standard_layout();
    ndarray_npy::write_npy(table_tmp, &table).map_err(|e| DumpError::npy(table_tmp, e))?;

    fs::rename(box_tmp, box_path).map_err(|e| DumpError::io(box_path, e))?;
    fs::rename(table_tmp, table_path).map_err(|e| DumpError::io(table_path, e))
}

pub(crate) fn table_file_name(kind: RecordKind, timestep: u64) -> String {
    format!(
        "{}_{:0width$}.{}",
        kind.cache_prefix(),
        timestep,
        TABLE_EXTENSION,
        width = TIMESTEP_WIDTH
    )
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn inconsistent(kind: RecordKind, timestep: u64, detail: &str) -> DumpError {
    DumpError::InconsistentCacheEntry {
        kind,
        timestep,
        detail: detail.to_string(),
    }
}

fn read_header(path: &Path) -> DumpResult<FrameHeader> {
    let file = fs::File::open(path).map_err(|e| DumpError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DumpError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

fn read_table(path: &Path) -> DumpResult<Array2<f64>> {
    use npyz::NpyFile;

    let buffer = fs::read(path).map_err(|e| DumpError::io(path, e))?;
    let npy = NpyFile::new(&buffer[..]).map_err(|e| DumpError::npy(path, e))?;

    let shape = npy.shape().to_vec();
    if shape.len() != 2 {
        return Err(DumpError::npy(
            path,
            format!("expected a 2D table (rows, columns), got shape {shape:?}"),
        ));
    }
    if npy.order() != npyz::Order::C {
        return Err(DumpError::npy(path, "expected C-order table"));
    }

    let data: Vec<f64> = npy.into_vec().map_err(|e| DumpError::npy(path, e))?;
    Array2::from_shape_vec((shape[0] as usize, shape[1] as usize), data)
        .map_err(|e| DumpError::npy(path, e))
}
