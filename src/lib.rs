//! Ingestion, caching and analysis of particle flow-solver dump files.
//!
//! Raw text dumps (particles, grid cells, surface triangles, flow cells) are
//! parsed once into [`Frame`]s and persisted by [`ColumnarCache`]. Analysis
//! passes then stream cached frames through [`SpatialBinner`] for heatmaps or
//! [`FluxIntegrator`] for control-plane drag.

pub mod binning;
pub mod bounds;
pub mod cache;
pub mod convert;
pub mod deck;
pub mod error;
pub mod export;
pub mod flux;
pub mod frame;
pub mod index;
pub mod parser;
pub mod species;

pub use binning::{
    BinGrid, BinTarget, BinnedImage, ColorScale, ColorScaleAccumulator, Projection,
    SpatialBinner,
};
pub use bounds::{Axis, BoxBounds};
pub use cache::{CacheEntry, ColumnarCache};
pub use convert::{convert_dumps, discover_dumps, ConversionReport};
pub use deck::InputDeck;
pub use error::{DumpError, DumpResult};
pub use flux::{
    drag_from_cache, ControlPlanes, DragRun, DragSample, DragSeries, FluxIntegrator, FluxSample,
};
pub use frame::{Frame, RecordKind};
pub use index::TimestepIndex;
pub use parser::{parse_dump, DumpRecordParser};
pub use species::SpeciesTable;
