use std::path::Path;

use crate::image_pipeline::common::error::Result;
use crate::image_pipeline::geometry::{Region, TileSize};
use crate::image_pipeline::source::PlaneIndex;
use crate::image_pipeline::tiff::types::TiffCompression;

/// Tile-at-a-time encoder for one output container.
///
/// Configuration (`set_*`) happens before [`open`](TiledImageWriter::open);
/// after that only `write_region` and `close` are valid.
pub trait TiledImageWriter {
    /// Returns the tile size the encoder will actually use.
    fn set_tile_size(&mut self, requested: TileSize) -> Result<TileSize>;

    fn set_compression(&mut self, compression: TiffCompression) -> Result<()>;

    fn set_compression_by_name(&mut self, name: &str) -> Result<TiffCompression> {
        let compression = name.parse::<TiffCompression>()?;
        self.set_compression(compression)?;
        Ok(compression)
    }

    fn set_interleaved(&mut self, interleaved: bool) -> Result<()>;

    fn open(&mut self, path: &Path) -> Result<()>;

    /// Writes exactly one grid tile of plane `index`.
    fn write_region(&mut self, index: PlaneIndex, buffer: &[u8], region: Region) -> Result<()>;

    /// Finalizes the container. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}
