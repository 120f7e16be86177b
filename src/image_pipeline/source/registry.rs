//! Decoder registry.
//!
//! A source file is matched against the registered formats in order, first by
//! its magic bytes and then by extension. The first format that claims the
//! file opens it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::source::raster_reader::RasterSourceReader;
use crate::image_pipeline::source::reader::SourceImageReader;
use crate::image_pipeline::source::tiff_reader::{DEFAULT_CHUNK_CACHE_CAPACITY, TiffSourceReader};

/// Bytes read from the start of a file for format sniffing.
const SNIFF_LEN: usize = 16;

const TIFF_MAGIC: [&[u8]; 4] = [b"II*\0", b"MM\0*", b"II+\0", b"MM\0+"];

/// Options forwarded to every decoder.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub chunk_cache_capacity: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_cache_capacity: DEFAULT_CHUNK_CACHE_CAPACITY,
        }
    }
}

/// One pluggable decoder.
pub trait SourceFormat {
    fn name(&self) -> &'static str;

    /// Whether this decoder claims a file given its first bytes and path.
    fn matches(&self, header: &[u8], path: &Path) -> bool;

    fn open(&self, path: &Path, options: &ReaderOptions) -> Result<Box<dyn SourceImageReader>>;
}

pub struct TiffFormat;

impl SourceFormat for TiffFormat {
    fn name(&self) -> &'static str {
        "TIFF"
    }

    fn matches(&self, header: &[u8], path: &Path) -> bool {
        if header.len() >= 4 {
            return TIFF_MAGIC.iter().any(|magic| header.starts_with(magic));
        }
        has_extension(path, &["tif", "tiff", "btf", "tf8"])
    }

    fn open(&self, path: &Path, options: &ReaderOptions) -> Result<Box<dyn SourceImageReader>> {
        Ok(Box::new(TiffSourceReader::open(
            path,
            options.chunk_cache_capacity,
        )?))
    }
}

pub struct RasterFormat;

impl SourceFormat for RasterFormat {
    fn name(&self) -> &'static str {
        "raster (PNG/JPEG/BMP)"
    }

    fn matches(&self, header: &[u8], path: &Path) -> bool {
        match image::guess_format(header) {
            Ok(format) => matches!(
                format,
                image::ImageFormat::Png | image::ImageFormat::Jpeg | image::ImageFormat::Bmp
            ),
            Err(_) => has_extension(path, &["png", "jpg", "jpeg", "bmp"]),
        }
    }

    fn open(&self, path: &Path, _options: &ReaderOptions) -> Result<Box<dyn SourceImageReader>> {
        Ok(Box::new(RasterSourceReader::open(path)?))
    }
}

pub struct ReaderRegistry {
    formats: Vec<Box<dyn SourceFormat>>,
    options: ReaderOptions,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new(ReaderOptions::default())
    }
}

impl ReaderRegistry {
    /// Registry with the built-in TIFF and raster decoders.
    pub fn new(options: ReaderOptions) -> Self {
        let mut registry = Self::empty(options);
        registry.register(Box::new(TiffFormat));
        registry.register(Box::new(RasterFormat));
        registry
    }

    pub fn empty(options: ReaderOptions) -> Self {
        Self {
            formats: Vec::new(),
            options,
        }
    }

    /// Adds a decoder after the ones already registered.
    pub fn register(&mut self, format: Box<dyn SourceFormat>) {
        self.formats.push(format);
    }

    pub fn format_names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    pub fn open(&self, path: &Path) -> Result<Box<dyn SourceImageReader>> {
        let header = read_header(path)?;
        let format = self
            .formats
            .iter()
            .find(|f| f.matches(&header, path))
            .ok_or_else(|| {
                ConversionError::UnsupportedFormat(format!(
                    "no decoder recognizes {}",
                    path.display()
                ))
            })?;

        debug!(path = %path.display(), format = format.name(), "Selected decoder");
        format.open(path, &self.options)
    }
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| ConversionError::io(path.display().to_string(), e))?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| ConversionError::io(path.display().to_string(), e))?;
    Ok(header)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}
