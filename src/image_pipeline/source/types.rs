//! Source image description types

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::geometry::Region;

/// Sample type of one channel of one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
}

impl PixelType {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelType::Int8 | PixelType::Uint8 => 1,
            PixelType::Int16 | PixelType::Uint16 => 2,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float => 4,
            PixelType::Double => 8,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bytes_per_pixel() as u16 * 8
    }

    /// Name used by the OME `Pixels/@Type` attribute.
    pub fn ome_name(&self) -> &'static str {
        match self {
            PixelType::Int8 => "int8",
            PixelType::Uint8 => "uint8",
            PixelType::Int16 => "int16",
            PixelType::Uint16 => "uint16",
            PixelType::Int32 => "int32",
            PixelType::Uint32 => "uint32",
            PixelType::Float => "float",
            PixelType::Double => "double",
        }
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, PixelType::Float | PixelType::Double)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, PixelType::Int8 | PixelType::Int16 | PixelType::Int32)
    }
}

/// Geometry and sample layout shared by every plane of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDimensions {
    /// Width of the plane in pixels
    pub width: u32,
    /// Height of the plane in pixels
    pub height: u32,
    pub pixel_type: PixelType,
    /// Samples per pixel (3 for RGB)
    pub channel_count: u16,
}

impl PlaneDimensions {
    pub fn bytes_per_pixel(&self) -> usize {
        self.pixel_type.bytes_per_pixel()
    }

    /// Byte length of a buffer holding `region`.
    pub fn region_len(&self, region: &Region) -> usize {
        region.pixel_count() * self.channel_count as usize * self.bytes_per_pixel()
    }

    pub fn plane_len(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.channel_count as u64
            * self.bytes_per_pixel() as u64
    }

    pub fn check_region(&self, region: &Region) -> Result<()> {
        if region.fits_within(self.width, self.height) {
            return Ok(());
        }
        Err(ConversionError::ReadFailure(format!(
            "region {}x{}+{}+{} lies outside the {}x{} plane",
            region.width, region.height, region.x, region.y, self.width, self.height
        )))
    }
}

/// Dimension orders allowed by the OME schema.
pub const DIMENSION_ORDERS: [&str; 6] = ["XYZCT", "XYZTC", "XYCTZ", "XYCZT", "XYTCZ", "XYTZC"];

/// Z/C/T layout declared by an OME-XML source.
///
/// `size_c` counts samples, so an interleaved RGB series has `size_c == 3` and
/// one plane per Z/T position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmeDimensions {
    pub dimension_order: String,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    /// Channel names in order; `None` where the source gave no name.
    pub channel_names: Vec<Option<String>>,
    /// Physical size and time increment attributes of `Pixels`, verbatim.
    pub physical: Vec<(String, String)>,
}

impl OmeDimensions {
    /// Number of stored planes, or `None` when `size_c` is not a multiple of
    /// `samples_per_pixel`.
    pub fn plane_count(&self, samples_per_pixel: u16) -> Option<usize> {
        let samples = samples_per_pixel.max(1) as usize;
        if self.size_c == 0 || self.size_c % samples != 0 {
            return None;
        }
        Some(self.size_z * (self.size_c / samples) * self.size_t)
    }
}

/// One series (OME `Image`) of the source
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInfo {
    pub name: Option<String>,
    pub plane_count: usize,
    pub dimensions: PlaneDimensions,
    /// Layout from the source's OME-XML; planes are treated as a Z stack without it.
    pub ome: Option<OmeDimensions>,
}

/// Everything the writer needs to describe the output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceMetadata {
    /// Human-readable decoder name
    pub format: String,
    pub series: Vec<SeriesInfo>,
    /// Whether channel samples are interleaved per pixel
    pub interleaved: bool,
    /// Format-specific key/value metadata carried into the OME-XML
    pub original: Vec<(String, String)>,
}

impl SourceMetadata {
    /// Copy restricted to the first `count` series.
    pub fn with_series_limit(&self, count: usize) -> Self {
        Self {
            series: self.series.iter().take(count).cloned().collect(),
            ..self.clone()
        }
    }

    pub fn total_plane_count(&self) -> usize {
        self.series.iter().map(|s| s.plane_count).sum()
    }

    /// Uncompressed pixel payload of every plane of every series.
    pub fn total_pixel_bytes(&self) -> u64 {
        self.series
            .iter()
            .map(|s| s.dimensions.plane_len() * s.plane_count as u64)
            .sum()
    }
}

/// Address of one plane: series index, then plane index within the series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneIndex {
    pub series: usize,
    pub plane: usize,
}

impl PlaneIndex {
    pub fn new(series: usize, plane: usize) -> Self {
        Self { series, plane }
    }
}
