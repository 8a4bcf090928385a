use flowdump::{
    BoxBounds, ColumnarCache, DumpError, DumpRecordParser, Frame, RecordKind, TimestepIndex,
};
use ndarray::array;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn particle_frame(timestep: u64) -> Frame {
    Frame::new(
        timestep,
        vec!["id".into(), "type".into(), "x".into(), "vx".into()],
        array![
            [1.0, 1.0, 0.1, 7500.123456789],
            [2.0, 2.0, -1e-300, -3.25e12],
            [3.0, 1.0, 1.0 / 3.0, f64::MIN_POSITIVE],
        ],
        BoxBounds::new((-1.1, 1.1), (-0.7, 0.7), (-0.3, 0.3)).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_round_trip_is_exact() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    let frame = particle_frame(100);

    let entry = cache.write(RecordKind::Particle, &frame).unwrap();
    assert!(entry.table_path.is_file());
    assert!(entry.box_path.is_file());

    let loaded = cache.read(RecordKind::Particle, 100).unwrap();
    assert_eq!(loaded, frame);
    assert_eq!(loaded.bounds().lo(flowdump::Axis::X), -1.1);
}

#[test]
fn test_parsed_frame_survives_cache() {
    let text = "ITEM: TIMESTEP\n250\nITEM: NUMBER OF CELLS\n2\n\
                ITEM: BOX BOUNDS oo oo oo\n-1.1 1.1\n-1 1\n-1 1\n\
                ITEM: CELLS id xc yc zc f_avg[1] f_avg[2]\n\
                1 -0.55 0 0 1.2e-5 300.25\n\
                2 0.55 0 0 3.4e-5 298.0\n";
    let parsed = DumpRecordParser::new(RecordKind::FlowCell)
        .parse_reader(text.as_bytes(), Path::new("flow.250.dat"))
        .unwrap();

    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    cache.write(RecordKind::FlowCell, &parsed).unwrap();
    let loaded = cache.read(RecordKind::FlowCell, 250).unwrap();

    assert_eq!(loaded.columns(), parsed.columns());
    assert_eq!(loaded.rows(), parsed.rows());
    assert_eq!(loaded.bounds(), parsed.bounds());
}

#[test]
fn test_zero_row_frame_round_trips() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    let empty = Frame::new(
        7,
        vec!["id".into(), "x".into()],
        ndarray::Array2::zeros((0, 2)),
        BoxBounds::cube(1.0).unwrap(),
    )
    .unwrap();

    cache.write(RecordKind::Particle, &empty).unwrap();
    let loaded = cache.read(RecordKind::Particle, 7).unwrap();
    assert_eq!(loaded.rows().dim(), (0, 2));
    assert_eq!(loaded.columns(), empty.columns());
}

#[test]
fn test_missing_frame() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    let err = cache.read(RecordKind::GridCell, 100).unwrap_err();
    assert!(matches!(
        err,
        DumpError::FrameNotFound {
            kind: RecordKind::GridCell,
            timestep: 100
        }
    ));
}

#[test]
fn test_missing_box_artifact_is_inconsistent() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    cache.write(RecordKind::Particle, &particle_frame(100)).unwrap();
    fs::remove_file(cache.box_path(RecordKind::Particle, 100)).unwrap();

    let err = cache.read(RecordKind::Particle, 100).unwrap_err();
    assert!(matches!(err, DumpError::InconsistentCacheEntry { timestep: 100, .. }));
}

#[test]
fn test_missing_table_artifact_is_inconsistent() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    cache.write(RecordKind::Particle, &particle_frame(100)).unwrap();
    fs::remove_file(cache.table_path(RecordKind::Particle, 100)).unwrap();

    let err = cache.read(RecordKind::Particle, 100).unwrap_err();
    assert!(matches!(err, DumpError::InconsistentCacheEntry { .. }));
}

#[test]
fn test_inverted_cached_bounds_are_rejected() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    let frame = Frame::new(
        1,
        vec!["id".into(), "x".into()],
        array![[1.0, 0.5]],
        BoxBounds::cube(1.0).unwrap(),
    )
    .unwrap();
    cache.write(RecordKind::Particle, &frame).unwrap();

    let box_path = cache.box_path(RecordKind::Particle, 1);
    let json = fs::read_to_string(&box_path).unwrap();
    assert!(json.contains("\"xlo\": -1.0"));
    fs::write(&box_path, json.replace("\"xlo\": -1.0", "\"xlo\": 5.0")).unwrap();

    let err = cache.read(RecordKind::Particle, 1).unwrap_err();
    assert!(matches!(err, DumpError::Metadata { .. }));
    assert!(cache.read_bounds(RecordKind::Particle, 1).is_err());
}

#[test]
fn test_enumerate_before_and_after_writes() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path().join("cache"));
    let index = TimestepIndex::new(cache.root());

    assert!(index.enumerate(RecordKind::Particle).unwrap().is_empty());

    for timestep in [250, 0, 100] {
        cache.write(RecordKind::Particle, &particle_frame(timestep)).unwrap();
    }
    cache.write(RecordKind::GridCell, &particle_frame(50)).unwrap();

    assert_eq!(index.enumerate(RecordKind::Particle).unwrap(), vec![0, 100, 250]);
    assert_eq!(index.enumerate(RecordKind::GridCell).unwrap(), vec![50]);
    assert!(index.enumerate(RecordKind::FlowCell).unwrap().is_empty());

    let summary = index.summary().unwrap();
    assert_eq!(summary.len(), 2);
}

#[test]
fn test_enumeration_ignores_foreign_files() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    cache.write(RecordKind::Particle, &particle_frame(100)).unwrap();
    fs::write(dir.path().join("particle_notes.npy"), b"").unwrap();
    fs::write(dir.path().join("particle_00000200.npy.tmp"), b"").unwrap();
    fs::write(dir.path().join("README"), b"").unwrap();

    assert_eq!(cache.index().enumerate(RecordKind::Particle).unwrap(), vec![100]);
}

#[test]
fn test_rewrite_overwrites_entry() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    cache.write(RecordKind::Particle, &particle_frame(100)).unwrap();

    let replacement = Frame::new(
        100,
        vec!["id".into()],
        array![[42.0]],
        BoxBounds::cube(2.0).unwrap(),
    )
    .unwrap();
    cache.write(RecordKind::Particle, &replacement).unwrap();

    assert_eq!(cache.read(RecordKind::Particle, 100).unwrap(), replacement);
    assert_eq!(cache.index().enumerate(RecordKind::Particle).unwrap(), vec![100]);
}

#[test]
fn test_frame_stream_is_ordered() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    for timestep in [30, 10, 20] {
        cache.write(RecordKind::Particle, &particle_frame(timestep)).unwrap();
    }

    let steps: Vec<u64> = cache
        .frames(RecordKind::Particle)
        .unwrap()
        .map(|frame| frame.unwrap().timestep())
        .collect();
    assert_eq!(steps, vec![10, 20, 30]);
}

#[test]
fn test_first_usable_frame_skips_broken_entries() {
    let dir = TempDir::new().unwrap();
    let cache = ColumnarCache::new(dir.path());
    for timestep in [0, 10, 20] {
        cache.write(RecordKind::Particle, &particle_frame(timestep)).unwrap();
    }
    fs::remove_file(cache.box_path(RecordKind::Particle, 0)).unwrap();

    let mut stream = cache.frames(RecordKind::Particle).unwrap();
    let first = stream.first_usable(Ok).unwrap().unwrap();
    assert_eq!(first.timestep(), 10);
    assert_eq!(stream.next().unwrap().unwrap().timestep(), 20);

    // A frame rejected by the preparation step is skipped too.
    let mut stream = cache.frames(RecordKind::Particle).unwrap();
    let first = stream
        .first_usable(|f| {
            if f.timestep() < 20 {
                Err(DumpError::Schema("not ready".into()))
            } else {
                Ok(f)
            }
        })
        .unwrap();
    assert_eq!(first.map(|f| f.timestep()), Some(20));

    let mut stream = cache.frames(RecordKind::Particle).unwrap();
    let err = stream
        .first_usable(|_| Err(DumpError::Config("no species".into())))
        .unwrap_err();
    assert!(matches!(err, DumpError::Config(_)));
}
