//! Control-plane momentum accounting and drag time series.
//!
//! Rows within `tolerance` of a plane along the flow axis count as crossing
//! it. Their `mass × velocity` along the flow axis is summed per plane, and
//! drag at a timestep is the inlet flux minus the outlet flux. Positive drag
//! means more forward momentum entered between the planes than left.
//!
//! # Ordering
//! [`DragSeries`] only accepts samples in strictly increasing timestep order.
//! Results gathered out of order (e.g. from a parallel pass) go through
//! [`DragSeries::from_unordered`] before any statistic is taken.

use rayon::prelude::*;

use crate::bounds::{Axis, BoxBounds};
use crate::cache::ColumnarCache;
use crate::error::{DumpError, DumpResult};
use crate::frame::{Frame, RecordKind};
use crate::species::SpeciesTable;

/// Number of trailing samples averaged into the steady-state drag.
pub const FINAL_WINDOW: usize = 10;

/// Inlet and outlet positions along the flow axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPlanes {
    pub inlet: f64,
    pub outlet: f64,
}

impl ControlPlanes {
    pub fn new(inlet: f64, outlet: f64) -> Self {
        Self { inlet, outlet }
    }

    pub fn from_fractions(bounds: &BoxBounds, axis: Axis, inlet: f64, outlet: f64) -> Self {
        Self {
            inlet: bounds.at_fraction(axis, inlet),
            outlet: bounds.at_fraction(axis, outlet),
        }
    }

    /// Planes at a quarter and three quarters of the domain.
    pub fn from_bounds(bounds: &BoxBounds, axis: Axis) -> Self {
        Self::from_fractions(bounds, axis, 0.25, 0.75)
    }
}

/// Flux through one plane at one timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxSample {
    pub timestep: u64,
    pub mass_flux: f64,
    pub momentum_flux: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSample {
    pub timestep: u64,
    /// Physical time in seconds.
    pub time: f64,
    pub inlet: FluxSample,
    pub outlet: FluxSample,
    pub drag: f64,
}

#[derive(Debug, Clone)]
pub struct FluxIntegrator {
    species: SpeciesTable,
    tolerance: f64,
    flow_axis: Axis,
    position_column: String,
    velocity_column: String,
    species_column: String,
}

impl FluxIntegrator {
    /// Particle frames flowing along +x.
    pub fn new(species: SpeciesTable, tolerance: f64) -> Self {
        Self {
            species,
            tolerance,
            flow_axis: Axis::X,
            position_column: "x".into(),
            velocity_column: "vx".into(),
            species_column: "type".into(),
        }
    }

    pub fn with_flow_axis(mut self, axis: Axis) -> Self {
        self.flow_axis = axis;
        self.position_column = axis.label().to_string();
        self.velocity_column = format!("v{}", axis.label());
        self
    }

    pub fn flow_axis(&self) -> Axis {
        self.flow_axis
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Momentum flux through the plane at `plane_position`.
    ///
    /// A frame with no crossing rows yields a zero sample, not an error.
    pub fn integrate(&self, frame: &Frame, plane_position: f64) -> DumpResult<FluxSample> {
        let mut sample = FluxSample {
            timestep: frame.timestep(),
            mass_flux: 0.0,
            momentum_flux: 0.0,
            count: 0,
        };
        if frame.num_rows() == 0 {
            return Ok(sample);
        }

        let positions = frame.column(&self.position_column)?;
        let velocities = frame.column(&self.velocity_column)?;
        let species = frame.column(&self.species_column)?;

        for row in 0..frame.num_rows() {
            if (positions[row] - plane_position).abs() >= self.tolerance {
                continue;
            }
            let mass = self.species.mass(species[row].round() as i64)?;
            sample.mass_flux += mass;
            sample.momentum_flux += mass * velocities[row];
            sample.count += 1;
        }
        Ok(sample)
    }

    /// Inlet, outlet and drag for one frame; `dt` converts steps to seconds.
    pub fn drag(&self, frame: &Frame, planes: &ControlPlanes, dt: f64) -> DumpResult<DragSample> {
        let inlet = self.integrate(frame, planes.inlet)?;
        let outlet = self.integrate(frame, planes.outlet)?;
        Ok(DragSample {
            timestep: frame.timestep(),
            time: frame.timestep() as f64 * dt,
            inlet,
            outlet,
            drag: inlet.momentum_flux - outlet.momentum_flux,
        })
    }
}

/// Drag samples in strictly increasing timestep order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DragSeries {
    samples: Vec<DragSample>,
}

impl DragSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: DragSample) -> DumpResult<()> {
        if let Some(last) = self.samples.last() {
            if sample.timestep <= last.timestep {
                return Err(DumpError::OutOfOrder {
                    last: last.timestep,
                    next: sample.timestep,
                });
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Order samples gathered in any order; duplicate timesteps are rejected.
    pub fn from_unordered(mut samples: Vec<DragSample>) -> DumpResult<Self> {
        samples.sort_by_key(|s| s.timestep);
        let mut series = Self::new();
        for sample in samples {
            series.push(sample)?;
        }
        Ok(series)
    }

    pub fn samples(&self) -> &[DragSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean over every sample.
    pub fn mean_drag(&self) -> Option<f64> {
        mean(self.samples.iter().map(|s| s.drag))
    }

    /// Steady-state drag: mean of the last [`FINAL_WINDOW`] samples.
    pub fn final_drag(&self) -> Option<f64> {
        let start = self.samples.len().saturating_sub(FINAL_WINDOW);
        mean(self.samples[start..].iter().map(|s| s.drag))
    }
}

/// Outcome of a drag pass over a cache; skipped frames do not stop the pass.
#[derive(Debug)]
pub struct DragRun {
    pub series: DragSeries,
    pub skipped: Vec<(u64, DumpError)>,
}

/// Compute the drag series for every cached particle frame.
pub fn drag_from_cache(
    cache: &ColumnarCache,
    integrator: &FluxIntegrator,
    planes: &ControlPlanes,
    dt: f64,
    parallel: bool,
) -> DumpResult<DragRun> {
    let kind = RecordKind::Particle;
    let timesteps = cache.index().enumerate(kind)?;
    log::info!(
        "Integrating flux over {} timesteps (inlet {:.4}, outlet {:.4})",
        timesteps.len(),
        planes.inlet,
        planes.outlet
    );

    let per_frame = |timestep: u64| -> (u64, DumpResult<DragSample>) {
        let result = cache
            .read(kind, timestep)
            .and_then(|frame| integrator.drag(&frame, planes, dt));
        (timestep, result)
    };
    let results: Vec<(u64, DumpResult<DragSample>)> = if parallel {
        timesteps.par_iter().map(|&t| per_frame(t)).collect()
    } else {
        timesteps.iter().map(|&t| per_frame(t)).collect()
    };

    let mut samples = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (timestep, result) in results {
        match result {
            Ok(sample) => {
                log::debug!("Step {}: drag = {:.3e} N", timestep, sample.drag);
                samples.push(sample);
            }
            Err(e) if e.is_frame_scoped() => {
                log::warn!("Skipping timestep {}: {}", timestep, e);
                skipped.push((timestep, e));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(DragRun {
        series: DragSeries::from_unordered(samples)?,
        skipped,
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}
