use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::geometry::Region;
use crate::image_pipeline::source::types::{PlaneDimensions, PlaneIndex, SourceMetadata};

/// Random-access view of an opened source image.
///
/// Buffers returned by [`read_region`](SourceImageReader::read_region) hold
/// little-endian samples, interleaved per pixel when
/// [`is_interleaved`](SourceImageReader::is_interleaved) is true and one full
/// channel after another otherwise.
pub trait SourceImageReader {
    fn metadata(&self) -> &SourceMetadata;

    fn series_count(&self) -> usize {
        self.metadata().series.len()
    }

    fn plane_count(&self, series: usize) -> Result<usize> {
        self.metadata()
            .series
            .get(series)
            .map(|s| s.plane_count)
            .ok_or_else(|| ConversionError::ReadFailure(format!("no series {series}")))
    }

    fn plane_dimensions(&self, index: PlaneIndex) -> Result<PlaneDimensions> {
        let series = self.metadata().series.get(index.series).ok_or_else(|| {
            ConversionError::ReadFailure(format!("no series {}", index.series))
        })?;
        if index.plane >= series.plane_count {
            return Err(ConversionError::ReadFailure(format!(
                "no plane {} in series {} ({} planes)",
                index.plane, index.series, series.plane_count
            )));
        }
        Ok(series.dimensions)
    }

    fn is_interleaved(&self) -> bool {
        self.metadata().interleaved
    }

    /// Returns exactly `dimensions.region_len(&region)` bytes.
    fn read_region(&mut self, index: PlaneIndex, region: Region) -> Result<Vec<u8>>;

    /// Releases decoder resources. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<R: SourceImageReader + ?Sized> SourceImageReader for Box<R> {
    fn metadata(&self) -> &SourceMetadata {
        (**self).metadata()
    }

    fn series_count(&self) -> usize {
        (**self).series_count()
    }

    fn plane_count(&self, series: usize) -> Result<usize> {
        (**self).plane_count(series)
    }

    fn plane_dimensions(&self, index: PlaneIndex) -> Result<PlaneDimensions> {
        (**self).plane_dimensions(index)
    }

    fn is_interleaved(&self) -> bool {
        (**self).is_interleaved()
    }

    fn read_region(&mut self, index: PlaneIndex, region: Region) -> Result<Vec<u8>> {
        (**self).read_region(index, region)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
