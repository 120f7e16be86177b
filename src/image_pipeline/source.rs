//! Source image reading module
//!
//! This module provides format-agnostic, region-wise access to input images and
//! the registry that picks a decoder for a given file.

mod ome;
mod raster_reader;
mod reader;
pub mod registry;
mod tiff_reader;
pub mod types;

pub use raster_reader::RasterSourceReader;
pub use reader::SourceImageReader;
pub use registry::{ReaderOptions, ReaderRegistry, SourceFormat};
pub use tiff_reader::{DEFAULT_CHUNK_CACHE_CAPACITY, TiffSourceReader};
pub use types::{
    OmeDimensions, PixelType, PlaneDimensions, PlaneIndex, SeriesInfo, SourceMetadata,
};
