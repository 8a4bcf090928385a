use approx::assert_relative_eq;
use flowdump::{
    export, Axis, BinGrid, BinTarget, BoxBounds, ColorScaleAccumulator, DumpError, Frame,
    Projection, RecordKind, SpatialBinner,
};
use ndarray::Array2;
use tempfile::TempDir;

/// Grid-cell frame with one row per (xc, yc) centre, all on the z = `z` plane.
fn lattice_frame(timestep: u64, z: f64, values: impl Fn(usize, usize) -> f64) -> Frame {
    let xs = [-0.75, -0.25, 0.25, 0.75];
    let ys = [-0.5, 0.5];
    let mut data = Vec::new();
    let mut id = 1.0;
    for (iy, &y) in ys.iter().enumerate() {
        for (ix, &x) in xs.iter().enumerate() {
            data.extend_from_slice(&[id, x, y, z, values(ix, iy)]);
            id += 1.0;
        }
    }
    Frame::new(
        timestep,
        ["id", "xc", "yc", "zc", "c_compute_Tgrid[1]"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        Array2::from_shape_vec((8, 5), data).unwrap(),
        BoxBounds::cube(1.0).unwrap(),
    )
    .unwrap()
}

fn temperature() -> BinTarget {
    BinTarget::ColumnPrefix("c_compute_Tgrid".into())
}

#[test]
fn test_lattice_inference() {
    let frame = lattice_frame(0, 0.0, |_, _| 1.0);
    let grid = BinGrid::from_lattice(&frame, &Projection::for_kind(RecordKind::GridCell)).unwrap();
    assert_eq!(grid.x_edges(), &[-1.0, -0.5, 0.0, 0.5, 1.0]);
    assert_eq!(grid.y_edges(), &[-1.0, 0.0, 1.0]);
    assert_eq!(grid.x_centres(), vec![-0.75, -0.25, 0.25, 0.75]);
}

#[test]
fn test_one_row_per_cell_is_conserved() {
    let frame = lattice_frame(0, 0.0, |ix, iy| 100.0 * iy as f64 + ix as f64);
    let binner =
        SpatialBinner::from_first_frame(&frame, Projection::for_kind(RecordKind::GridCell)).unwrap();
    let image = binner.bin(&frame, &temperature()).unwrap();

    assert_eq!(image.means().dim(), (2, 4));
    assert_eq!(image.missing_cells(), 0);
    for iy in 0..2 {
        for ix in 0..4 {
            assert_eq!(image.value(ix, iy), Some(100.0 * iy as f64 + ix as f64));
            assert_eq!(image.counts()[(iy, ix)], 1);
        }
    }
}

#[test]
fn test_rows_outside_slab_leave_cells_missing() {
    let seed = lattice_frame(0, 0.0, |_, _| 1.0);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();
    assert_relative_eq!(binner.slab_half_width(), 0.1);

    let off_slab = lattice_frame(10, 0.5, |_, _| 1.0);
    let image = binner.bin(&off_slab, &temperature()).unwrap();
    assert_eq!(image.missing_cells(), 8);
    assert!(image.means().iter().all(|v| v.is_nan()));
    assert_eq!(image.finite_values().count(), 0);
}

#[test]
fn test_missing_differs_from_zero() {
    let seed = lattice_frame(0, 0.0, |_, _| 0.0);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();

    // Lift every cell except (0, 0) out of the slab.
    let mut rows = seed.rows().clone();
    for mut row in rows.rows_mut().into_iter().skip(1) {
        row[3] = 0.9;
    }
    let frame = Frame::new(1, seed.columns().to_vec(), rows, *seed.bounds()).unwrap();
    let image = binner.bin(&frame, &temperature()).unwrap();

    assert_eq!(image.value(0, 0), Some(0.0));
    assert!(!image.is_missing(0, 0));
    assert!(image.is_missing(1, 0));
    assert_eq!(image.value(1, 0), None);
}

#[test]
fn test_grid_is_reused_across_frames() {
    let seed = lattice_frame(0, 0.0, |_, _| 1.0);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();

    // A later frame with only two rows, one of them outside the grid.
    let later = Frame::new(
        100,
        seed.columns().to_vec(),
        Array2::from_shape_vec(
            (2, 5),
            vec![1.0, 0.8, 0.9, 0.0, 5.0, 2.0, 1.5, 0.0, 0.0, 9.0],
        )
        .unwrap(),
        *seed.bounds(),
    )
    .unwrap();
    let image = binner.bin(&later, &temperature()).unwrap();

    assert_eq!(image.means().dim(), (2, 4));
    assert_eq!(image.timestep(), 100);
    assert_eq!(image.value(3, 1), Some(5.0));
    assert_eq!(image.missing_cells(), 7);
}

#[test]
fn test_mean_of_shared_cell() {
    let grid = BinGrid::new(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
    let bounds = BoxBounds::new((0.0, 1.0), (0.0, 1.0), (-1.0, 1.0)).unwrap();
    let binner = SpatialBinner::new(Projection::for_kind(RecordKind::Particle), grid, &bounds);
    let frame = Frame::new(
        3,
        vec!["x".into(), "y".into(), "z".into(), "vx".into(), "vy".into(), "vz".into()],
        Array2::from_shape_vec(
            (2, 6),
            vec![0.2, 0.2, 0.0, 3.0, 4.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 6.0],
        )
        .unwrap(),
        bounds,
    )
    .unwrap();

    let image = binner.bin(&frame, &BinTarget::speed()).unwrap();
    // Speeds 5 and 6; the point on the last edge is still inside.
    assert_relative_eq!(image.value(0, 0).unwrap(), 5.5);
    assert_eq!(image.counts()[(0, 0)], 2);
}

#[test]
fn test_uniform_grid_spans_box() {
    let bounds = BoxBounds::new((-1.1, 1.1), (-0.5, 0.5), (-0.5, 0.5)).unwrap();
    let grid = BinGrid::uniform(&bounds, Axis::Z.plane(), 4, 2).unwrap();
    assert_eq!(grid.nx(), 4);
    assert_eq!(grid.ny(), 2);
    assert_eq!(grid.x_edges()[0], -1.1);
    assert_eq!(grid.x_edges()[4], 1.1);
    assert_eq!(grid.y_edges(), &[-0.5, 0.0, 0.5]);
}

#[test]
fn test_empty_frame_cannot_define_lattice() {
    let empty = Frame::new(
        0,
        vec!["xc".into(), "yc".into(), "zc".into()],
        Array2::zeros((0, 3)),
        BoxBounds::cube(1.0).unwrap(),
    )
    .unwrap();
    let err = BinGrid::from_lattice(&empty, &Projection::for_kind(RecordKind::GridCell)).unwrap_err();
    assert!(matches!(err, DumpError::DegenerateBin(_)));
}

#[test]
fn test_unknown_target_column() {
    let frame = lattice_frame(0, 0.0, |_, _| 1.0);
    let binner =
        SpatialBinner::from_first_frame(&frame, Projection::for_kind(RecordKind::GridCell)).unwrap();
    let err = binner.bin(&frame, &BinTarget::Column("n".into())).unwrap_err();
    assert!(matches!(err, DumpError::ColumnNotFound { .. }));
}

#[test]
fn test_color_scale_over_frames() {
    let seed = lattice_frame(0, 0.0, |ix, iy| (ix + 4 * iy) as f64);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();

    let mut accumulator = ColorScaleAccumulator::new();
    accumulator.observe(&binner.bin(&seed, &temperature()).unwrap());
    let off_slab = lattice_frame(1, 0.5, |_, _| 1000.0);
    accumulator.observe(&binner.bin(&off_slab, &temperature()).unwrap());
    assert_eq!(accumulator.sample_count(), 8);

    // Values 0..=7: 5th percentile 0.35, 95th 6.65.
    let scale = accumulator.clone().finalize(5.0, 95.0).unwrap();
    assert_relative_eq!(scale.vmin, 0.35, epsilon = 1e-12);
    assert_relative_eq!(scale.vmax, 6.65, epsilon = 1e-12);

    let log_scale = accumulator.finalize_log(0.0, 100.0).unwrap();
    assert_eq!(log_scale.vmin, 1.0);
    assert_eq!(log_scale.vmax, 7.0);
}

#[test]
fn test_color_scale_without_samples() {
    let err = ColorScaleAccumulator::new().finalize(5.0, 95.0).unwrap_err();
    assert!(matches!(err, DumpError::DegenerateBin(_)));
}

#[test]
fn test_image_npy_keeps_missing_cells_nan() {
    let seed = lattice_frame(0, 0.0, |ix, iy| 10.0 * iy as f64 + ix as f64);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();

    // Drop cell (2, 1) out of the slab.
    let mut rows = seed.rows().clone();
    rows[[6, 3]] = 0.9;
    let frame = Frame::new(4, seed.columns().to_vec(), rows, *seed.bounds()).unwrap();
    let image = binner.bin(&frame, &temperature()).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("images").join("grid_heatmap_4.npy");
    export::write_image_npy(&path, &image).unwrap();

    let loaded: Array2<f64> = ndarray_npy::read_npy(&path).unwrap();
    assert_eq!(loaded.dim(), (2, 4));
    assert!(loaded[(1, 2)].is_nan());
    assert_eq!(loaded[(1, 1)], 11.0);
    assert_eq!(loaded[(0, 2)], 2.0);
    assert_eq!(loaded.iter().filter(|v| v.is_nan()).count(), 1);
}

#[test]
fn test_merged_partials_match_single_pass() {
    let seed = lattice_frame(0, 0.0, |ix, iy| (ix + 4 * iy) as f64);
    let binner =
        SpatialBinner::from_first_frame(&seed, Projection::for_kind(RecordKind::GridCell)).unwrap();
    let images: Vec<_> = (0..4)
        .map(|t| {
            let frame = lattice_frame(t, 0.0, |ix, iy| (t as usize * 3 + ix * iy) as f64 - 2.5);
            binner.bin(&frame, &temperature()).unwrap()
        })
        .collect();

    let mut single = ColorScaleAccumulator::new();
    for image in &images {
        single.observe(image);
    }

    // Two workers each see half of the frames.
    let mut left = ColorScaleAccumulator::new();
    let mut right = ColorScaleAccumulator::new();
    for (i, image) in images.iter().enumerate() {
        if i % 2 == 0 {
            left.observe(image);
        } else {
            right.observe(image);
        }
    }
    left.merge(right);
    assert_eq!(left.sample_count(), single.sample_count());

    let merged = left.finalize(5.0, 95.0).unwrap();
    let expected = single.finalize(5.0, 95.0).unwrap();
    assert_eq!(merged, expected);
}
