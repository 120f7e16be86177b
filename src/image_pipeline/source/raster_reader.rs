//! Source reader for single-image raster formats using the `image` crate.
//!
//! PNG, JPEG and BMP have no random access to pixel regions, so the image is
//! decoded once at open time and regions are sliced out of that buffer.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageError, ImageReader};
use tracing::debug;

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::geometry::Region;
use crate::image_pipeline::source::reader::SourceImageReader;
use crate::image_pipeline::source::types::{
    PixelType, PlaneDimensions, PlaneIndex, SeriesInfo, SourceMetadata,
};

/// Raster reader that decodes the whole image through the `image` crate.
///
/// Supports 8-bit and 16-bit gray, gray+alpha, RGB and RGBA, plus 32-bit float
/// RGB(A). Samples are exposed interleaved, little-endian.
pub struct RasterSourceReader {
    path: PathBuf,
    pixels: Option<Vec<u8>>,
    metadata: SourceMetadata,
}

impl RasterSourceReader {
    /// Decodes `path` and prepares it for region reads.
    ///
    /// # Returns
    ///
    /// * `Ok(RasterSourceReader)` - Decoded image with one series of one plane
    /// * `Err(ConversionError::UnsupportedFormat)` - Unknown format or sample layout
    /// * `Err(ConversionError::IoFailure)` - The file could not be read
    pub fn open(path: &Path) -> Result<Self> {
        let reader = ImageReader::open(path)
            .map_err(|e| ConversionError::io(path.display().to_string(), e))?
            .with_guessed_format()
            .map_err(|e| ConversionError::io(path.display().to_string(), e))?;
        let format = reader
            .format()
            .map(|f| format!("{f:?}"))
            .unwrap_or_else(|| "raster".to_string());
        let decoded = reader.decode().map_err(|e| map_image_error(path, e))?;

        let (width, height) = (decoded.width(), decoded.height());
        let (pixel_type, channel_count, pixels) = flatten(decoded)?;
        debug!(
            path = %path.display(),
            width,
            height,
            channels = channel_count,
            "Decoded {} source",
            format
        );

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        Ok(Self {
            path: path.to_path_buf(),
            pixels: Some(pixels),
            metadata: SourceMetadata {
                format,
                series: vec![SeriesInfo {
                    name,
                    plane_count: 1,
                    dimensions: PlaneDimensions {
                        width,
                        height,
                        pixel_type,
                        channel_count,
                    },
                    ome: None,
                }],
                interleaved: true,
                original: Vec::new(),
            },
        })
    }
}

impl SourceImageReader for RasterSourceReader {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn read_region(&mut self, index: PlaneIndex, region: Region) -> Result<Vec<u8>> {
        let dims = self.plane_dimensions(index)?;
        dims.check_region(&region)?;
        let pixels = self.pixels.as_ref().ok_or_else(|| {
            ConversionError::ReadFailure(format!("{} is closed", self.path.display()))
        })?;

        let pixel_bytes = dims.channel_count as usize * dims.bytes_per_pixel();
        let plane_row = dims.width as usize * pixel_bytes;
        let span = region.width as usize * pixel_bytes;
        let mut out = Vec::with_capacity(dims.region_len(&region));
        for y in region.y..region.y + region.height {
            let start = y as usize * plane_row + region.x as usize * pixel_bytes;
            out.extend_from_slice(&pixels[start..start + span]);
        }
        Ok(out)
    }

    fn close(&mut self) -> Result<()> {
        self.pixels = None;
        Ok(())
    }
}

fn flatten(image: DynamicImage) -> Result<(PixelType, u16, Vec<u8>)> {
    let flattened = match image {
        DynamicImage::ImageLuma8(buf) => (PixelType::Uint8, 1, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (PixelType::Uint8, 2, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (PixelType::Uint8, 3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (PixelType::Uint8, 4, buf.into_raw()),
        DynamicImage::ImageLuma16(buf) => (PixelType::Uint16, 1, u16_le(buf.as_raw())),
        DynamicImage::ImageLumaA16(buf) => (PixelType::Uint16, 2, u16_le(buf.as_raw())),
        DynamicImage::ImageRgb16(buf) => (PixelType::Uint16, 3, u16_le(buf.as_raw())),
        DynamicImage::ImageRgba16(buf) => (PixelType::Uint16, 4, u16_le(buf.as_raw())),
        DynamicImage::ImageRgb32F(buf) => (PixelType::Float, 3, f32_le(buf.as_raw())),
        DynamicImage::ImageRgba32F(buf) => (PixelType::Float, 4, f32_le(buf.as_raw())),
        other => {
            return Err(ConversionError::UnsupportedFormat(format!(
                "pixel layout {:?}",
                other.color()
            )));
        }
    };
    Ok(flattened)
}

fn u16_le(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn f32_le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn map_image_error(path: &Path, error: ImageError) -> ConversionError {
    match error {
        ImageError::IoError(e) => ConversionError::io(path.display().to_string(), e),
        ImageError::Unsupported(e) => ConversionError::UnsupportedFormat(e.to_string()),
        other => ConversionError::ReadFailure(format!("{}: {}", path.display(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_png_region_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        RgbImage::from_fn(20, 10, |x, y| Rgb([x as u8, y as u8, 7]))
            .save(&path)
            .unwrap();

        let mut reader = RasterSourceReader::open(&path).unwrap();
        let dims = reader.plane_dimensions(PlaneIndex::new(0, 0)).unwrap();
        assert_eq!((dims.width, dims.height, dims.channel_count), (20, 10, 3));
        assert_eq!(dims.pixel_type, PixelType::Uint8);

        let bytes = reader
            .read_region(PlaneIndex::new(0, 0), Region::new(18, 8, 2, 2))
            .unwrap();
        assert_eq!(bytes, vec![18, 8, 7, 19, 8, 7, 18, 9, 7, 19, 9, 7]);
    }

    #[test]
    fn test_second_plane_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::new(4, 4).save(&path).unwrap();

        let mut reader = RasterSourceReader::open(&path).unwrap();
        let result = reader.read_region(PlaneIndex::new(0, 1), Region::new(0, 0, 1, 1));
        assert!(matches!(result, Err(ConversionError::ReadFailure(_))));
    }
}
