//! Command-line interface.
//!
//! ```text
//! tiled_ome_tiff_rs INPUT OUTPUT TILE_WIDTH TILE_HEIGHT [--compression lzw] [--predictor]
//! ```
//!
//! `--log-level` can also be set through `TILED_OME_TIFF_LOG`; a `RUST_LOG`
//! directive takes precedence over both.

use std::path::PathBuf;

use clap::Parser;

use crate::image_pipeline::tiff::PREDICTOR_HORIZONTAL;
use crate::image_pipeline::{ConversionConfig, ConversionJob, Result, TiffCompression};
use crate::logger::LogConfig;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Rewrites an image as a tiled OME-TIFF, one tile at a time.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiled_ome_tiff_rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Image to convert.
    pub input: PathBuf,

    /// OME-TIFF to create; an existing file is replaced.
    pub output: PathBuf,

    /// Requested tile width in pixels (rounded to a multiple of 16).
    pub tile_width: u32,

    /// Requested tile height in pixels (rounded to a multiple of 16).
    pub tile_height: u32,

    /// Tile compression: lzw, deflate (zlib) or none.
    #[arg(long, default_value = "lzw")]
    pub compression: String,

    /// Apply horizontal differencing before compressing integer samples.
    #[arg(long)]
    pub predictor: bool,

    /// Convert every series of the input instead of only the first.
    #[arg(long)]
    pub all_series: bool,

    /// Always write BigTIFF (otherwise chosen by output size).
    #[arg(long)]
    pub bigtiff: bool,

    /// Log filter, e.g. `info` or `tiled_ome_tiff_rs=debug`.
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "TILED_OME_TIFF_LOG")]
    pub log_level: String,
}

impl Cli {
    pub fn job(&self) -> ConversionJob {
        ConversionJob::new(&self.input, &self.output, self.tile_width, self.tile_height)
    }

    /// Fails with `UnsupportedCodec` for an unknown `--compression`.
    pub fn conversion_config(&self) -> Result<ConversionConfig> {
        let compression: TiffCompression = self.compression.parse()?;
        Ok(ConversionConfig::builder()
            .compression(compression)
            .predictor(self.predictor.then_some(PREDICTOR_HORIZONTAL))
            .all_series(self.all_series)
            .bigtiff(self.bigtiff.then_some(true))
            .build())
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            ..LogConfig::default()
        }
    }
}
