//! Command-line entry point for dump conversion and analysis.
//!
//! Subcommands:
//! - `convert`: parse raw dumps into the columnar cache
//! - `timesteps`: list cached timesteps per record kind
//! - `heatmap`: bin cached frames onto a fixed grid and export `.npy` images
//! - `drag`: integrate control-plane momentum flux into a drag series
//!
//! # Heatmap process
//! 1. Build the bin grid once, from the first cached frame that reads cleanly
//! 2. Bin every frame, export its image and feed the color-scale accumulator
//! 3. Finalize the color scale over all frames and report it

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowdump::flux::FINAL_WINDOW;
use flowdump::{
    convert_dumps, drag_from_cache, export, Axis, BinGrid, BinTarget, ColorScaleAccumulator,
    ColumnarCache, ControlPlanes, FluxIntegrator, Frame, InputDeck, Projection, RecordKind,
    SpatialBinner, SpeciesTable,
};
use std::path::PathBuf;

/// Uniform grid used for particle and surface heatmaps when `--bins` is absent.
const DEFAULT_UNIFORM_BINS: (usize, usize) = (500, 300);

#[derive(Parser, Debug)]
#[command(name = "flowdump")]
#[command(about = "Convert flow-solver dumps into a columnar cache and analyse them")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse raw dump files into the cache
    Convert {
        /// Directory holding `<prefix>.<step>.dat` dumps
        dumps_dir: PathBuf,

        /// Cache root directory
        #[arg(long, default_value = "cache")]
        cache: PathBuf,

        /// Record kinds to convert (default: all)
        #[arg(long = "kind")]
        kinds: Vec<RecordKind>,

        /// Convert files in parallel
        #[arg(long)]
        parallel: bool,
    },

    /// List cached timesteps
    Timesteps {
        cache_dir: PathBuf,

        /// Only this record kind (default: every kind present)
        #[arg(long)]
        kind: Option<RecordKind>,
    },

    /// Bin cached frames into per-timestep `.npy` images
    Heatmap {
        cache_dir: PathBuf,

        #[arg(long)]
        kind: RecordKind,

        /// Column name, `prefix:<name>` or `speed`
        #[arg(long)]
        target: BinTarget,

        /// Slab half-width as a fraction of the normal-axis extent
        #[arg(long, default_value = "0.05")]
        slice_fraction: f64,

        /// Uniform grid size NX NY instead of the inferred cell lattice
        #[arg(long, num_args = 2, value_names = ["NX", "NY"])]
        bins: Option<Vec<usize>>,

        /// Lower and upper color-scale percentiles
        #[arg(long, num_args = 2, default_values_t = [5.0, 95.0])]
        percentiles: Vec<f64>,

        /// Output directory for images
        #[arg(long, default_value = "heatmaps")]
        out: PathBuf,
    },

    /// Integrate momentum flux through the control planes
    Drag {
        cache_dir: PathBuf,

        /// Solver input deck defining the domain and `tstep`
        #[arg(long)]
        deck: PathBuf,

        /// Species file mapping particle types to molecular weights
        #[arg(long)]
        species: PathBuf,

        /// Half-width of the plane crossing band
        #[arg(long, default_value = "0.05")]
        tolerance: f64,

        /// Write the drag series as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Read frames in parallel
        #[arg(long)]
        parallel: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Convert {
            dumps_dir,
            cache,
            kinds,
            parallel,
        } => run_convert(dumps_dir, cache, kinds, parallel),
        Command::Timesteps { cache_dir, kind } => run_timesteps(cache_dir, kind),
        Command::Heatmap {
            cache_dir,
            kind,
            target,
            slice_fraction,
            bins,
            percentiles,
            out,
        } => run_heatmap(HeatmapArgs {
            cache_dir,
            kind,
            target,
            slice_fraction,
            bins,
            percentiles,
            out,
        }),
        Command::Drag {
            cache_dir,
            deck,
            species,
            tolerance,
            csv,
            parallel,
        } => run_drag(cache_dir, deck, species, tolerance, csv, parallel),
    }
}

fn run_convert(
    dumps_dir: PathBuf,
    cache_root: PathBuf,
    kinds: Vec<RecordKind>,
    parallel: bool,
) -> Result<()> {
    let cache = ColumnarCache::new(cache_root);
    let kinds = if kinds.is_empty() {
        RecordKind::ALL.to_vec()
    } else {
        kinds
    };

    let mut failures = 0;
    for kind in kinds {
        let report = convert_dumps(&dumps_dir, kind, &cache, parallel)
            .with_context(|| format!("Failed to convert {} dumps in {}", kind, dumps_dir.display()))?;
        println!(
            "{}: {} frames cached, {} failed",
            kind,
            report.converted.len(),
            report.failed.len()
        );
        for (path, err) in &report.failed {
            println!("  {}: {}", path.display(), err);
        }
        failures += report.failed.len();
    }

    if failures > 0 {
        log::warn!("{} dump files could not be converted", failures);
    }
    Ok(())
}

fn run_timesteps(cache_dir: PathBuf, kind: Option<RecordKind>) -> Result<()> {
    let index = ColumnarCache::new(&cache_dir).index();
    let listing = match kind {
        Some(kind) => vec![(kind, index.enumerate(kind)?)],
        None => index.summary()?,
    };

    if listing.iter().all(|(_, steps)| steps.is_empty()) {
        log::info!("No cached frames in {}", cache_dir.display());
    }
    for (kind, steps) in listing {
        let joined: Vec<String> = steps.iter().map(u64::to_string).collect();
        println!("{} ({}): {}", kind, steps.len(), joined.join(" "));
    }
    Ok(())
}

struct HeatmapArgs {
    cache_dir: PathBuf,
    kind: RecordKind,
    target: BinTarget,
    slice_fraction: f64,
    bins: Option<Vec<usize>>,
    percentiles: Vec<f64>,
    out: PathBuf,
}

fn run_heatmap(args: HeatmapArgs) -> Result<()> {
    let cache = ColumnarCache::new(&args.cache_dir);
    let (lo_pct, hi_pct) = match args.percentiles.as_slice() {
        [lo, hi] if lo < hi => (*lo, *hi),
        other => bail!("Percentiles must be two increasing values, got {:?}", other),
    };

    let projection = Projection::for_kind(args.kind).with_slice_fraction(args.slice_fraction);
    let Some(first_frame) = cache
        .frames(args.kind)?
        .first_usable(|f| prepare(f, args.kind))?
    else {
        bail!("No readable {} frames in {}", args.kind, args.cache_dir.display());
    };
    let binner = build_binner(&first_frame, projection, args.kind, args.bins.as_deref())?;

    let mut accumulator = ColorScaleAccumulator::new();
    let mut written = 0;
    for frame in cache.frames(args.kind)? {
        let image = frame
            .and_then(|f| prepare(f, args.kind))
            .and_then(|f| binner.bin(&f, &args.target));
        let image = match image {
            Ok(image) => image,
            Err(e) if e.is_frame_scoped() => {
                log::warn!("Skipping frame: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let path = args
            .out
            .join(format!("{}_heatmap_{:08}.npy", args.kind, image.timestep()));
        export::write_image_npy(&path, &image)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        accumulator.observe(&image);
        written += 1;
    }

    let scale = accumulator
        .finalize(lo_pct, hi_pct)
        .context("Failed to compute color scale")?;
    log::info!(
        "Color scale for {} ({}th-{}th percentile): [{:.4e}, {:.4e}]",
        args.target,
        lo_pct,
        hi_pct,
        scale.vmin,
        scale.vmax
    );
    println!(
        "Wrote {} images to {} (vmin {:.6e}, vmax {:.6e})",
        written,
        args.out.display(),
        scale.vmin,
        scale.vmax
    );
    Ok(())
}

fn prepare(frame: Frame, kind: RecordKind) -> flowdump::DumpResult<Frame> {
    match kind {
        RecordKind::SurfaceTriangle => frame.with_surface_centroids(),
        _ => Ok(frame),
    }
}

fn build_binner(
    first: &Frame,
    projection: Projection,
    kind: RecordKind,
    bins: Option<&[usize]>,
) -> Result<SpatialBinner> {
    let uniform = match (bins, kind) {
        (Some([nx, ny]), _) => Some((*nx, *ny)),
        (Some(other), _) => bail!("--bins takes NX NY, got {:?}", other),
        (None, RecordKind::Particle | RecordKind::SurfaceTriangle) => Some(DEFAULT_UNIFORM_BINS),
        (None, _) => None,
    };

    match uniform {
        Some((nx, ny)) => {
            let grid = BinGrid::uniform(first.bounds(), projection.plane(), nx, ny)?;
            Ok(SpatialBinner::new(projection, grid, first.bounds()))
        }
        None => Ok(SpatialBinner::from_first_frame(first, projection)?),
    }
}

fn run_drag(
    cache_dir: PathBuf,
    deck_path: PathBuf,
    species_path: PathBuf,
    tolerance: f64,
    csv: Option<PathBuf>,
    parallel: bool,
) -> Result<()> {
    if !(tolerance > 0.0) {
        bail!("Tolerance must be positive, got {}", tolerance);
    }
    let deck = InputDeck::from_path(&deck_path)?;
    let bounds = deck
        .domain_bounds()
        .with_context(|| format!("Input deck {} has no usable domain", deck_path.display()))?;
    let dt = deck.timestep_size()?;
    let species = SpeciesTable::from_path(&species_path)?;

    let cache = ColumnarCache::new(&cache_dir);
    let planes = ControlPlanes::from_bounds(&bounds, Axis::X);
    let integrator = FluxIntegrator::new(species, tolerance);
    let run = drag_from_cache(&cache, &integrator, &planes, dt, parallel)?;

    if run.series.is_empty() {
        bail!("No particle frames could be integrated from {}", cache_dir.display());
    }
    if let Some(path) = &csv {
        export::write_drag_csv(path, &run.series)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let mean = run.series.mean_drag().unwrap_or(f64::NAN);
    let last = run.series.final_drag().unwrap_or(f64::NAN);
    log::info!(
        "Drag over {} samples ({} skipped): mean {:.6e} N, final {:.6e} N",
        run.series.len(),
        run.skipped.len(),
        mean,
        last
    );
    println!("Mean drag:  {:.6e} N", mean);
    println!(
        "Final drag: {:.6e} N (mean of last {} samples)",
        last,
        FINAL_WINDOW.min(run.series.len())
    );
    Ok(())
}
