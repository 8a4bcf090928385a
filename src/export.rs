//! Writers for analysis outputs: binned images and drag series.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::binning::BinnedImage;
use crate::error::{DumpError, DumpResult};
use crate::flux::DragSeries;

/// Write the mean image as a `(ny, nx)` `.npy`; missing cells stay NaN.
pub fn write_image_npy<P: AsRef<Path>>(path: P, image: &BinnedImage) -> DumpResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    ndarray_npy::write_npy(path, &image.means().as_standard_layout())
        .map_err(|e| DumpError::npy(path, e))?;
    log::debug!(
        "Wrote {}x{} image for timestep {} to {}",
        image.ny(),
        image.nx(),
        image.timestep(),
        path.display()
    );
    Ok(())
}

#[derive(Serialize)]
struct DragRecord {
    timestep: u64,
    time: f64,
    drag: f64,
    inlet_momentum: f64,
    outlet_momentum: f64,
    inlet_particles: usize,
    outlet_particles: usize,
}

pub fn write_drag_csv<P: AsRef<Path>>(path: P, series: &DragSeries) -> DumpResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    for sample in series.samples() {
        writer
            .serialize(DragRecord {
                timestep: sample.timestep,
                time: sample.time,
                drag: sample.drag,
                inlet_momentum: sample.inlet.momentum_flux,
                outlet_momentum: sample.outlet.momentum_flux,
                inlet_particles: sample.inlet.count,
                outlet_particles: sample.outlet.count,
            })
            .map_err(|e| csv_error(path, e))?;
    }
    writer.flush().map_err(|e| DumpError::io(path, e))?;
    log::info!("Wrote {} drag samples to {}", series.len(), path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> DumpResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| DumpError::io(parent, e))
        }
        _ => Ok(()),
    }
}

fn csv_error(path: &Path, source: csv::Error) -> DumpError {
    DumpError::Csv {
        path: path.to_path_buf(),
        source,
    }
}
