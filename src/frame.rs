//! In-memory form of one dump snapshot.
//!
//! A [`Frame`] is a schema-plus-matrix pair: the ordered column names read from
//! the payload header and a row-major `f64` table with one row per record. Columns
//! are never fixed at compile time; downstream code looks them up by name.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView1, Axis as NdAxis};
use serde::{Deserialize, Serialize};

use crate::bounds::BoxBounds;
use crate::error::{DumpError, DumpResult};

/// Keywords that distinguish one record kind's envelope from another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpLayout {
    /// Keyword after `ITEM: NUMBER OF`.
    pub count_keyword: &'static str,
    /// Keyword after `ITEM:` that opens the payload.
    pub payload_keyword: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Particle,
    GridCell,
    SurfaceTriangle,
    FlowCell,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Particle,
        RecordKind::GridCell,
        RecordKind::SurfaceTriangle,
        RecordKind::FlowCell,
    ];

    pub fn layout(self) -> DumpLayout {
        match self {
            RecordKind::Particle => DumpLayout {
                count_keyword: "ATOMS",
                payload_keyword: "ATOMS",
            },
            RecordKind::GridCell | RecordKind::FlowCell => DumpLayout {
                count_keyword: "CELLS",
                payload_keyword: "CELLS",
            },
            RecordKind::SurfaceTriangle => DumpLayout {
                count_keyword: "SURFS",
                payload_keyword: "SURFS",
            },
        }
    }

    /// Prefix of cache artifact names.
    pub fn cache_prefix(self) -> &'static str {
        match self {
            RecordKind::Particle => "particle",
            RecordKind::GridCell => "grid",
            RecordKind::SurfaceTriangle => "surf",
            RecordKind::FlowCell => "flow",
        }
    }

    /// Prefix of raw solver dump names, e.g. `part.1000.dat`.
    pub fn dump_prefix(self) -> &'static str {
        match self {
            RecordKind::Particle => "part",
            RecordKind::GridCell => "grid",
            RecordKind::SurfaceTriangle => "surf",
            RecordKind::FlowCell => "flow",
        }
    }

    /// Default coordinate columns for spatial lookups.
    pub fn coordinate_columns(self) -> [&'static str; 3] {
        match self {
            RecordKind::Particle => ["x", "y", "z"],
            _ => ["xc", "yc", "zc"],
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_prefix())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "particle" | "part" => Ok(RecordKind::Particle),
            "grid" | "grid-cell" => Ok(RecordKind::GridCell),
            "surf" | "surface" | "surface-triangle" => Ok(RecordKind::SurfaceTriangle),
            "flow" | "flow-cell" => Ok(RecordKind::FlowCell),
            other => Err(format!(
                "unknown record kind `{other}` (expected particle, grid, surf or flow)"
            )),
        }
    }
}

/// One parsed timestep. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    timestep: u64,
    columns: Vec<String>,
    rows: Array2<f64>,
    bounds: BoxBounds,
}

impl Frame {
    pub fn new(
        timestep: u64,
        columns: Vec<String>,
        rows: Array2<f64>,
        bounds: BoxBounds,
    ) -> DumpResult<Self> {
        if rows.ncols() != columns.len() {
            return Err(DumpError::Schema(format!(
                "table width {} does not match {} column names",
                rows.ncols(),
                columns.len()
            )));
        }
        Ok(Self {
            timestep,
            columns,
            rows,
            bounds,
        })
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &Array2<f64> {
        &self.rows
    }

    pub fn bounds(&self) -> &BoxBounds {
        &self.bounds
    }

    pub fn num_rows(&self) -> usize {
        self.rows.nrows()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> DumpResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DumpError::ColumnNotFound {
                column: name.to_string(),
                available: self.columns.clone(),
            })
    }

    pub fn column(&self, name: &str) -> DumpResult<ArrayView1<'_, f64>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.column(idx))
    }

    /// First column whose name starts with `prefix`, e.g. `c_compute_Tgrid`.
    pub fn column_with_prefix(&self, prefix: &str) -> DumpResult<(&str, ArrayView1<'_, f64>)> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.starts_with(prefix))
            .ok_or_else(|| DumpError::ColumnNotFound {
                column: format!("{prefix}*"),
                available: self.columns.clone(),
            })?;
        Ok((self.columns[idx].as_str(), self.rows.column(idx)))
    }

    /// Returns a new frame with `xc`, `yc`, `zc` triangle centroids appended.
    ///
    /// Surface dumps carry the three vertices `v1x..v3z`; binning and slab
    /// filters work on cell-centre columns, so this lets surface frames reuse them.
    pub fn with_surface_centroids(&self) -> DumpResult<Frame> {
        let mut extra = Array2::<f64>::zeros((self.num_rows(), 3));
        for (slot, axis) in ["x", "y", "z"].iter().enumerate() {
            let v1 = self.column(&format!("v1{axis}"))?;
            let v2 = self.column(&format!("v2{axis}"))?;
            let v3 = self.column(&format!("v3{axis}"))?;
            let centroid = (&v1 + &v2 + &v3) / 3.0;
            extra.column_mut(slot).assign(&centroid);
        }

        let rows = ndarray::concatenate(NdAxis(1), &[self.rows.view(), extra.view()])
            .map_err(|e| DumpError::Schema(e.to_string()))?;
        let mut columns = self.columns.clone();
        columns.extend(["xc", "yc", "zc"].iter().map(|c| c.to_string()));
        Frame::new(self.timestep, columns, rows, self.bounds)
    }
}
