//! Image processing pipeline module
//!
//! Region-wise source decoding, tile geometry, tiled OME-TIFF writing and the
//! orchestration that moves tiles from one to the other.

pub mod common;
pub mod conversions;
pub mod geometry;
pub mod source;
pub mod tiff;

pub use common::{ConversionError, Result};

pub use geometry::{Region, TileGrid, TileSize, compute_grid, effective_tile_extent};

pub use source::{
    PixelType, PlaneDimensions, PlaneIndex, ReaderRegistry, SeriesInfo, SourceImageReader,
    SourceMetadata,
};

pub use tiff::{
    ConversionConfig, ConversionConfigBuilder, OmeTiffWriter, TiffCompression, TiledImageWriter,
};

pub use conversions::{
    ConversionJob, ConversionReport, ConversionState, TiledOmeTiffPipeline, TiledTranscoder,
};
