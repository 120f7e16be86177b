//! Tiled OME-TIFF conversion configuration types

use std::fmt;
use std::str::FromStr;

use crate::image_pipeline::common::error::ConversionError;
use crate::image_pipeline::source::DEFAULT_CHUNK_CACHE_CAPACITY;

/// TIFF compression methods (all lossless)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiffCompression {
    /// No compression (fastest, largest file)
    None,
    /// LZW compression (default)
    #[default]
    Lzw,
    /// Deflate (zlib) compression
    Deflate,
}

impl TiffCompression {
    /// Value of the TIFF `Compression` tag.
    pub fn tag_value(&self) -> u16 {
        match self {
            TiffCompression::None => 1,
            TiffCompression::Lzw => 5,
            TiffCompression::Deflate => 8,
        }
    }
}

impl FromStr for TiffCompression {
    type Err = ConversionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(TiffCompression::None),
            "lzw" => Ok(TiffCompression::Lzw),
            "deflate" | "zlib" => Ok(TiffCompression::Deflate),
            _ => Err(ConversionError::UnsupportedCodec(name.to_string())),
        }
    }
}

impl fmt::Display for TiffCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TiffCompression::None => "Uncompressed",
            TiffCompression::Lzw => "LZW",
            TiffCompression::Deflate => "zlib",
        };
        f.write_str(name)
    }
}

/// Predictor value for horizontal differencing.
pub const PREDICTOR_HORIZONTAL: u16 = 2;

/// Configuration for tiled OME-TIFF conversion
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Compression method to use
    pub compression: TiffCompression,
    /// Predictor value for compression (2 for horizontal differencing)
    /// Note: only applied to integer samples
    pub predictor: Option<u16>,
    /// Convert every series instead of only the first one
    pub all_series: bool,
    /// Force (`Some(true)`) or forbid (`Some(false)`) BigTIFF; `None` decides by size
    pub bigtiff: Option<bool>,
    /// Decoded source chunks kept in memory
    pub chunk_cache_capacity: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            compression: TiffCompression::Lzw,
            predictor: None,
            all_series: false,
            bigtiff: None,
            chunk_cache_capacity: DEFAULT_CHUNK_CACHE_CAPACITY,
        }
    }
}

impl ConversionConfig {
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder::default()
    }
}

/// Builder for ConversionConfig
#[derive(Default)]
pub struct ConversionConfigBuilder {
    compression: Option<TiffCompression>,
    predictor: Option<Option<u16>>,
    all_series: Option<bool>,
    bigtiff: Option<Option<bool>>,
    chunk_cache_capacity: Option<usize>,
}

impl ConversionConfigBuilder {
    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn predictor(mut self, predictor: Option<u16>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn all_series(mut self, enable: bool) -> Self {
        self.all_series = Some(enable);
        self
    }

    pub fn bigtiff(mut self, bigtiff: Option<bool>) -> Self {
        self.bigtiff = Some(bigtiff);
        self
    }

    pub fn chunk_cache_capacity(mut self, capacity: usize) -> Self {
        self.chunk_cache_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> ConversionConfig {
        let default = ConversionConfig::default();
        ConversionConfig {
            compression: self.compression.unwrap_or(default.compression),
            predictor: self.predictor.unwrap_or(default.predictor),
            all_series: self.all_series.unwrap_or(default.all_series),
            bigtiff: self.bigtiff.unwrap_or(default.bigtiff),
            chunk_cache_capacity: self
                .chunk_cache_capacity
                .unwrap_or(default.chunk_cache_capacity),
        }
    }
}
