use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, info_span, instrument, trace, warn};

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::conversions::job::{ConversionReport, ConversionState};
use crate::image_pipeline::conversions::timing::{PipelineTimings, Timer};
use crate::image_pipeline::geometry::{TileGrid, TileSize};
use crate::image_pipeline::source::{PlaneIndex, SourceImageReader};
use crate::image_pipeline::tiff::{ConversionConfig, TiledImageWriter};

#[derive(Debug, Default, Clone, Copy)]
struct TransferStats {
    series: usize,
    planes: usize,
    tiles: u64,
    bytes: u64,
}

/// Moves every tile of a source image into a tiled writer, one tile at a time.
///
/// The transcoder owns both ends of the conversion and closes them exactly once
/// in [`run`](TiledTranscoder::run), whatever the outcome.
pub struct TiledTranscoder<R: SourceImageReader, W: TiledImageWriter> {
    reader: R,
    writer: W,
    config: ConversionConfig,
    state: ConversionState,
    tile: Option<TileSize>,
    timings: PipelineTimings,
}

impl<R: SourceImageReader, W: TiledImageWriter> TiledTranscoder<R, W> {
    pub fn with_custom(reader: R, writer: W, config: ConversionConfig) -> Self {
        Self {
            reader,
            writer,
            config,
            state: ConversionState::Idle,
            tile: None,
            timings: PipelineTimings::new(),
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Negotiates tile size, compression and interleaving, then opens the writer.
    ///
    /// Returns the accepted tile size, which is used for all further geometry.
    pub fn initialize(&mut self, output: &Path, requested: TileSize) -> Result<TileSize> {
        self.expect_state(ConversionState::Idle)?;

        let accepted = self.writer.set_tile_size(requested)?;
        if accepted != requested {
            info!(
                requested_width = requested.width,
                requested_height = requested.height,
                accepted_width = accepted.width,
                accepted_height = accepted.height,
                "Writer adjusted tile size"
            );
        }
        self.writer.set_compression(self.config.compression)?;
        self.writer.set_interleaved(self.reader.is_interleaved())?;
        self.writer.open(output)?;

        self.tile = Some(accepted);
        self.state = ConversionState::Initialized;
        Ok(accepted)
    }

    /// Copies every tile of every selected plane, row-major within each plane.
    ///
    /// Stops at the first failure; the transcoder is then `Failed`.
    pub fn transcode(&mut self) -> Result<()> {
        self.transcode_planes().map(|_| ())
    }

    fn transcode_planes(&mut self) -> Result<TransferStats> {
        self.expect_state(ConversionState::Initialized)?;
        let tile = self.tile.ok_or_else(|| {
            ConversionError::WriteFailure("tile size was not negotiated".to_string())
        })?;
        self.state = ConversionState::Running;

        let result = self.copy_tiles(tile);
        self.state = match result {
            Ok(_) => ConversionState::Completed,
            Err(_) => ConversionState::Failed,
        };
        result
    }

    fn copy_tiles(&mut self, tile: TileSize) -> Result<TransferStats> {
        let available = self.reader.series_count();
        let series_count = if self.config.all_series {
            available
        } else {
            available.min(1)
        };
        if available > series_count {
            info!(available, converted = series_count, "Converting the first series only");
        }

        let mut stats = TransferStats {
            series: series_count,
            ..TransferStats::default()
        };
        for series in 0..series_count {
            for plane in 0..self.reader.plane_count(series)? {
                let index = PlaneIndex::new(series, plane);
                let dims = self.reader.plane_dimensions(index)?;
                let grid = TileGrid::new(dims.width, dims.height, tile)?;
                let _span = info_span!("plane", series, plane).entered();
                debug!(
                    width = dims.width,
                    height = dims.height,
                    x_tiles = grid.x_tiles,
                    y_tiles = grid.y_tiles,
                    "Transcoding plane"
                );

                for region in grid.tiles() {
                    let timer = Timer::start("read_region");
                    let buffer = self.reader.read_region(index, region)?;
                    self.timings.record(timer);

                    let timer = Timer::start("write_region");
                    self.writer.write_region(index, &buffer, region)?;
                    self.timings.record(timer);

                    trace!(
                        x = region.x,
                        y = region.y,
                        width = region.width,
                        height = region.height,
                        "Tile copied"
                    );
                    stats.tiles += 1;
                    stats.bytes += buffer.len() as u64;
                }
                stats.planes += 1;
            }
        }
        Ok(stats)
    }

    /// Runs the whole conversion and closes both ends.
    ///
    /// A close failure after a successful transcode becomes the result; after a
    /// failed one it is only logged and the original error is returned.
    #[instrument(skip(self, output), fields(output = %output.display()))]
    pub fn run(&mut self, output: &Path, requested: TileSize) -> Result<ConversionReport> {
        // A transcoder runs once; a later call leaves its state and resources alone.
        self.expect_state(ConversionState::Idle)?;
        let started = Instant::now();

        let outcome = self
            .initialize(output, requested)
            .and_then(|tile| self.transcode_planes().map(|stats| (tile, stats)));
        if outcome.is_err() {
            self.state = ConversionState::Failed;
        }

        let closed = {
            let _span = info_span!("close").entered();
            let timer = Timer::start("close");
            let closed = self.close_all(outcome.is_ok());
            self.timings.record(timer);
            closed
        };

        match (outcome, closed) {
            (Ok((tile, stats)), Ok(())) => {
                self.timings.log_summary();
                let report = ConversionReport {
                    tile,
                    series: stats.series,
                    planes: stats.planes,
                    tiles: stats.tiles,
                    bytes: stats.bytes,
                    elapsed: started.elapsed(),
                    timings: std::mem::take(&mut self.timings),
                };
                info!(
                    planes = report.planes,
                    tiles = report.tiles,
                    bytes = report.bytes,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Conversion complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                self.state = ConversionState::Failed;
                Err(e)
            }
            (Err(e), _) => Err(e),
        }
    }

    fn close_all(&mut self, succeeded: bool) -> Result<()> {
        if let Err(e) = self.reader.close() {
            warn!(error = %e, "Failed to close source reader");
        }

        match self.writer.close() {
            Ok(()) => Ok(()),
            Err(e) if succeeded => Err(match e {
                ConversionError::CloseFailure(_) => e,
                other => ConversionError::CloseFailure(other.to_string()),
            }),
            Err(e) => {
                warn!(error = %e, "Failed to close writer after an earlier failure");
                Ok(())
            }
        }
    }

    fn expect_state(&self, expected: ConversionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConversionError::WriteFailure(format!(
                "conversion is {:?}, expected {:?}",
                self.state, expected
            )))
        }
    }
}
