use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::conversions::timing::PipelineTimings;
use crate::image_pipeline::geometry::TileSize;

/// One input file converted into one tiled OME-TIFF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl ConversionJob {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        tile_width: u32,
        tile_height: u32,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            tile_width,
            tile_height,
        }
    }

    /// Checks the job and returns the requested tile size.
    ///
    /// The tile size is checked first. Input and output are then compared, which
    /// canonicalizes both paths but never creates, opens or removes a file.
    pub fn validate(&self) -> Result<TileSize> {
        let tile = TileSize::new(self.tile_width, self.tile_height)?;
        if same_path(&self.input, &self.output) {
            return Err(ConversionError::io(
                self.output.display().to_string(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "output path is the input file",
                ),
            ));
        }
        Ok(tile)
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a == b
        || matches!(
            (a.canonicalize(), b.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        )
}

/// Conversion lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    Initialized,
    Running,
    Completed,
    Failed,
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    /// Tile size the writer accepted; may differ from the requested one.
    pub tile: TileSize,
    pub series: usize,
    pub planes: usize,
    pub tiles: u64,
    /// Pixel bytes moved from the reader to the writer.
    pub bytes: u64,
    pub elapsed: Duration,
    pub timings: PipelineTimings,
}
