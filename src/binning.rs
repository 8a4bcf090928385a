//! Slab-filtered 2-D mean binning for heatmap-style consumers.
//!
//! Rows inside a thin slab around zero on the normal axis are dropped onto a
//! fixed (x, y) cell grid and averaged per cell. Cells that receive no rows
//! hold [`MISSING`] rather than zero.
//!
//! # Grid lifetime
//! A [`BinGrid`] is built once per analysis run, usually from the first
//! frame's lattice of cell centres, and reused unchanged for every later frame
//! so that pixels line up across an animation.
//!
//! # Color scale
//! [`ColorScaleAccumulator`] is the first pass of a two-pass scan: it collects
//! finite cell values frame by frame, and only `finalize` produces bounds.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Zip};

use crate::bounds::{Axis, BoxBounds};
use crate::error::{DumpError, DumpResult};
use crate::frame::{Frame, RecordKind};

/// Marker for cells with no contributing rows.
pub const MISSING: f64 = f64::NAN;

/// Which axis is collapsed, how thick the slab is, and which columns hold coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub normal: Axis,
    pub slice_fraction: f64,
    pub coordinates: [String; 3],
}

impl Projection {
    pub fn for_kind(kind: RecordKind) -> Self {
        Self {
            normal: Axis::Z,
            slice_fraction: 0.05,
            coordinates: kind.coordinate_columns().map(String::from),
        }
    }

    pub fn with_slice_fraction(mut self, fraction: f64) -> Self {
        self.slice_fraction = fraction;
        self
    }

    pub fn with_normal(mut self, normal: Axis) -> Self {
        self.normal = normal;
        self
    }

    pub fn plane(&self) -> (Axis, Axis) {
        self.normal.plane()
    }

    pub fn coordinate(&self, axis: Axis) -> &str {
        &self.coordinates[axis.index()]
    }

    /// Half-thickness of the slab for a domain box.
    pub fn slab_half_width(&self, bounds: &BoxBounds) -> f64 {
        self.slice_fraction * bounds.extent(self.normal)
    }
}

/// Scalar to average per cell.
#[derive(Debug, Clone, PartialEq)]
pub enum BinTarget {
    Column(String),
    /// First column whose name starts with the prefix.
    ColumnPrefix(String),
    /// Euclidean norm of three velocity columns.
    Speed { vx: String, vy: String, vz: String },
}

impl BinTarget {
    pub fn speed() -> Self {
        BinTarget::Speed {
            vx: "vx".into(),
            vy: "vy".into(),
            vz: "vz".into(),
        }
    }

    pub fn values(&self, frame: &Frame) -> DumpResult<Array1<f64>> {
        match self {
            BinTarget::Column(name) => Ok(frame.column(name)?.to_owned()),
            BinTarget::ColumnPrefix(prefix) => Ok(frame.column_with_prefix(prefix)?.1.to_owned()),
            BinTarget::Speed { vx, vy, vz } => {
                let (vx, vy, vz) = (frame.column(vx)?, frame.column(vy)?, frame.column(vz)?);
                let mut speed = Array1::zeros(frame.num_rows());
                Zip::from(&mut speed)
                    .and(&vx)
                    .and(&vy)
                    .and(&vz)
                    .for_each(|s, &x, &y, &z| *s = (x * x + y * y + z * z).sqrt());
                Ok(speed)
            }
        }
    }
}

impl fmt::Display for BinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinTarget::Column(name) => write!(f, "{name}"),
            BinTarget::ColumnPrefix(prefix) => write!(f, "{prefix}*"),
            BinTarget::Speed { .. } => write!(f, "speed"),
        }
    }
}

impl FromStr for BinTarget {
    type Err = String;

    /// `speed`, `prefix:<name>` or a literal column name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty bin target".into());
        }
        if s == "speed" {
            return Ok(BinTarget::speed());
        }
        if let Some(prefix) = s.strip_prefix("prefix:") {
            return Ok(BinTarget::ColumnPrefix(prefix.to_string()));
        }
        Ok(BinTarget::Column(s.to_string()))
    }
}

/// Monotonic cell edges along the two in-plane axes.
#[derive(Debug, Clone, PartialEq)]
pub struct BinGrid {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
}

impl BinGrid {
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>) -> DumpResult<Self> {
        validate_edges(&x_edges, 'x')?;
        validate_edges(&y_edges, 'y')?;
        Ok(Self { x_edges, y_edges })
    }

    /// `nx` by `ny` equal cells spanning the box in the projection plane.
    pub fn uniform(bounds: &BoxBounds, plane: (Axis, Axis), nx: usize, ny: usize) -> DumpResult<Self> {
        Self::new(
            linspace(bounds.lo(plane.0), bounds.hi(plane.0), nx)?,
            linspace(bounds.lo(plane.1), bounds.hi(plane.1), ny)?,
        )
    }

    /// Edges around the unique cell centres found in `frame`.
    ///
    /// Each centre gets a cell bounded by the midpoints to its neighbours; the
    /// outer edges sit half the smallest spacing beyond the outermost centres.
    pub fn from_lattice(frame: &Frame, projection: &Projection) -> DumpResult<Self> {
        if frame.num_rows() == 0 {
            return Err(DumpError::DegenerateBin(format!(
                "timestep {} has no rows to infer a lattice from",
                frame.timestep()
            )));
        }
        let (h, v) = projection.plane();
        let x_edges = lattice_edges(frame, projection.coordinate(h), h)?;
        let y_edges = lattice_edges(frame, projection.coordinate(v), v)?;
        Self::new(x_edges, y_edges)
    }

    pub fn nx(&self) -> usize {
        self.x_edges.len() - 1
    }

    pub fn ny(&self) -> usize {
        self.y_edges.len() - 1
    }

    pub fn x_edges(&self) -> &[f64] {
        &self.x_edges
    }

    pub fn y_edges(&self) -> &[f64] {
        &self.y_edges
    }

    pub fn x_centres(&self) -> Vec<f64> {
        centres(&self.x_edges)
    }

    pub fn y_centres(&self) -> Vec<f64> {
        centres(&self.y_edges)
    }

    /// Cell of a point as `(ix, iy)`, or `None` outside the grid.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        Some((locate(&self.x_edges, x)?, locate(&self.y_edges, y)?))
    }
}

/// Mean value per cell for one frame; shape `(ny, nx)`, row 0 is the lowest y.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedImage {
    timestep: u64,
    means: Array2<f64>,
    counts: Array2<u32>,
}

impl BinnedImage {
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }

    pub fn nx(&self) -> usize {
        self.means.ncols()
    }

    pub fn ny(&self) -> usize {
        self.means.nrows()
    }

    /// Mean at cell `(ix, iy)`; `None` when no rows landed there.
    pub fn value(&self, ix: usize, iy: usize) -> Option<f64> {
        match self.counts.get((iy, ix)) {
            Some(&count) if count > 0 => Some(self.means[(iy, ix)]),
            _ => None,
        }
    }

    pub fn is_missing(&self, ix: usize, iy: usize) -> bool {
        self.value(ix, iy).is_none()
    }

    pub fn missing_cells(&self) -> usize {
        self.counts.iter().filter(|&&c| c == 0).count()
    }

    pub fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.means.iter().copied().filter(|v| v.is_finite())
    }
}

/// Projects frames onto a fixed grid.
#[derive(Debug, Clone)]
pub struct SpatialBinner {
    projection: Projection,
    grid: BinGrid,
    slab_half_width: f64,
}

impl SpatialBinner {
    pub fn new(projection: Projection, grid: BinGrid, bounds: &BoxBounds) -> Self {
        let slab_half_width = projection.slab_half_width(bounds);
        Self {
            projection,
            grid,
            slab_half_width,
        }
    }

    /// Grid and slab inferred once from the first frame of a run.
    pub fn from_first_frame(frame: &Frame, projection: Projection) -> DumpResult<Self> {
        let grid = BinGrid::from_lattice(frame, &projection)?;
        log::info!(
            "Inferred {}x{} bin lattice from timestep {}",
            grid.nx(),
            grid.ny(),
            frame.timestep()
        );
        Ok(Self::new(projection, grid, frame.bounds()))
    }

    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn slab_half_width(&self) -> f64 {
        self.slab_half_width
    }

    pub fn bin(&self, frame: &Frame, target: &BinTarget) -> DumpResult<BinnedImage> {
        let (h, v) = self.projection.plane();
        let xs = frame.column(self.projection.coordinate(h))?;
        let ys = frame.column(self.projection.coordinate(v))?;
        let ns = frame.column(self.projection.coordinate(self.projection.normal))?;
        let values = target.values(frame)?;

        let shape = (self.grid.ny(), self.grid.nx());
        let mut sums = Array2::<f64>::zeros(shape);
        let mut counts = Array2::<u32>::zeros(shape);

        for row in 0..frame.num_rows() {
            if !(ns[row].abs() <= self.slab_half_width) {
                continue;
            }
            if let Some((ix, iy)) = self.grid.locate(xs[row], ys[row]) {
                sums[(iy, ix)] += values[row];
                counts[(iy, ix)] += 1;
            }
        }

        let mut means = Array2::<f64>::from_elem(shape, MISSING);
        Zip::from(&mut means)
            .and(&sums)
            .and(&counts)
            .for_each(|mean, &sum, &count| {
                if count > 0 {
                    *mean = sum / count as f64;
                }
            });

        Ok(BinnedImage {
            timestep: frame.timestep(),
            means,
            counts,
        })
    }
}

/// Lower and upper color bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub vmin: f64,
    pub vmax: f64,
}

/// First pass of the color-scale scan.
#[derive(Debug, Clone, Default)]
pub struct ColorScaleAccumulator {
    values: Vec<f64>,
}

impl ColorScaleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, image: &BinnedImage) {
        self.values.extend(image.finite_values());
    }

    /// Combine partial results gathered in parallel.
    pub fn merge(&mut self, other: ColorScaleAccumulator) {
        self.values.extend(other.values);
    }

    pub fn sample_count(&self) -> usize {
        self.values.len()
    }

    /// Percentile bounds, e.g. `(5.0, 95.0)`, over every finite value seen.
    pub fn finalize(self, lo_pct: f64, hi_pct: f64) -> DumpResult<ColorScale> {
        scale_from(self.values, lo_pct, hi_pct, "no finite values observed")
    }

    /// Bounds for a log color axis; only strictly positive values count.
    pub fn finalize_log(self, lo_pct: f64, hi_pct: f64) -> DumpResult<ColorScale> {
        let positive = self.values.into_iter().filter(|&v| v > 0.0).collect();
        scale_from(positive, lo_pct, hi_pct, "no positive values for a log scale")
    }
}

fn scale_from(mut values: Vec<f64>, lo_pct: f64, hi_pct: f64, empty: &str) -> DumpResult<ColorScale> {
    if values.is_empty() {
        return Err(DumpError::DegenerateBin(empty.to_string()));
    }
    values.sort_unstable_by(f64::total_cmp);
    Ok(ColorScale {
        vmin: percentile(&values, lo_pct),
        vmax: percentile(&values, hi_pct),
    })
}

/// Linear-interpolated percentile of sorted, non-empty data.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn validate_edges(edges: &[f64], axis: char) -> DumpResult<()> {
    if edges.len() < 2 {
        return Err(DumpError::DegenerateBin(format!(
            "{axis} edges need at least two values, got {}",
            edges.len()
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(DumpError::DegenerateBin(format!(
            "{axis} edges must be finite and strictly increasing"
        )));
    }
    Ok(())
}

fn linspace(lo: f64, hi: f64, cells: usize) -> DumpResult<Vec<f64>> {
    if cells == 0 {
        return Err(DumpError::DegenerateBin("grid needs at least one cell".into()));
    }
    let step = (hi - lo) / cells as f64;
    let mut edges: Vec<f64> = (0..cells).map(|i| lo + step * i as f64).collect();
    edges.push(hi);
    Ok(edges)
}

fn lattice_edges(frame: &Frame, column: &str, axis: Axis) -> DumpResult<Vec<f64>> {
    let mut centres: Vec<f64> = frame
        .column(column)?
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    centres.sort_unstable_by(f64::total_cmp);
    centres.dedup();

    match centres.as_slice() {
        [] => Err(DumpError::DegenerateBin(format!(
            "column `{column}` has no finite coordinates"
        ))),
        [_] => {
            // A single plane of cells spans the whole box on that axis.
            let bounds = frame.bounds();
            Ok(vec![bounds.lo(axis), bounds.hi(axis)])
        }
        _ => {
            let spacing = centres
                .windows(2)
                .map(|w| w[1] - w[0])
                .fold(f64::INFINITY, f64::min);
            let mut edges = Vec::with_capacity(centres.len() + 1);
            edges.push(centres[0] - spacing / 2.0);
            edges.extend(centres.windows(2).map(|w| (w[0] + w[1]) / 2.0));
            edges.push(centres[centres.len() - 1] + spacing / 2.0);
            Ok(edges)
        }
    }
}

fn centres(edges: &[f64]) -> Vec<f64> {
    edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
}

/// Half-open `[e_i, e_{i+1})` bins; the last bin also takes its upper edge.
fn locate(edges: &[f64], value: f64) -> Option<usize> {
    let first = *edges.first()?;
    let last = *edges.last()?;
    if !(value >= first && value <= last) {
        return None;
    }
    if value == last {
        return Some(edges.len() - 2);
    }
    Some(edges.partition_point(|&e| e <= value) - 1)
}
