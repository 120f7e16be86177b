//! Tiled OME-TIFF output.
//!
//! Tiles are compressed and appended as they arrive; directories and the
//! OME-XML description are written when the writer is closed.

mod compression;
mod directory;
mod ome_tiff_writer;
pub mod ome_xml;
pub mod types;
mod writer;

pub use directory::TiffFlavor;
pub use ome_tiff_writer::{
    BIGTIFF_THRESHOLD, DEFAULT_TILE_SIZE, OmeTiffWriter, TILE_ALIGNMENT, align_tile_extent,
};
pub use types::{ConversionConfig, ConversionConfigBuilder, PREDICTOR_HORIZONTAL, TiffCompression};
pub use writer::TiledImageWriter;
