//! TIFF source reader built on the `tiff` crate decoder.
//!
//! Pages are never decoded as a whole. A region read decodes only the strips
//! or tiles it intersects and keeps them in a small LRU cache, so reading a
//! row of output tiles out of one strip decodes that strip once.

use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};
use tracing::{debug, trace, warn};

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::geometry::{Region, effective_tile_extent};
use crate::image_pipeline::source::ome::{OmeImage, parse_ome_images};
use crate::image_pipeline::source::reader::SourceImageReader;
use crate::image_pipeline::source::types::{
    PixelType, PlaneDimensions, PlaneIndex, SeriesInfo, SourceMetadata,
};

/// Default number of decoded strips/tiles kept in memory.
pub const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 64;

/// Baseline ASCII tags carried over as original metadata.
const ORIGINAL_METADATA_TAGS: [(Tag, &str); 8] = [
    (Tag::Software, "Software"),
    (Tag::DateTime, "DateTime"),
    (Tag::Make, "Make"),
    (Tag::Model, "Model"),
    (Tag::Artist, "Artist"),
    (Tag::HostComputer, "HostComputer"),
    (Tag::Copyright, "Copyright"),
    (Tag::ImageDescription, "ImageDescription"),
];

#[derive(Debug, Clone, Copy)]
struct PageLayout {
    dimensions: PlaneDimensions,
    chunk_width: u32,
    chunk_height: u32,
}

impl PageLayout {
    fn chunks_across(&self) -> u32 {
        self.dimensions.width.div_ceil(self.chunk_width)
    }
}

struct DecodedChunk {
    bytes: Vec<u8>,
    /// Pixels per row of `bytes`; may exceed the clipped data width for edge tiles.
    row_pixels: usize,
}

pub struct TiffSourceReader {
    path: PathBuf,
    decoder: Option<Decoder<BufReader<File>>>,
    current_page: usize,
    pages: Vec<PageLayout>,
    /// Page index of every plane, per series.
    series_pages: Vec<Vec<usize>>,
    cache: LruCache<(usize, u32), DecodedChunk>,
    metadata: SourceMetadata,
}

impl TiffSourceReader {
    pub fn open(path: &Path, chunk_cache_capacity: usize) -> Result<Self> {
        let file =
            File::open(path).map_err(|e| ConversionError::io(path.display().to_string(), e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| map_tiff_error(path, e, true))?;

        let original = read_original_metadata(&mut decoder);
        let ome_images = decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .map(|description| parse_ome_images(&description))
            .unwrap_or_default();

        let mut pages = Vec::new();
        loop {
            pages.push(inspect_page(&mut decoder, path)?);
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(|e| map_tiff_error(path, e, true))?;
        }
        let current_page = pages.len() - 1;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (series, series_pages) = match series_from_ome(&pages, &ome_images) {
            Some(grouped) => grouped,
            None => {
                if !ome_images.is_empty() {
                    warn!(
                        path = %path.display(),
                        "OME-XML does not match the TIFF pages; grouping pages by geometry"
                    );
                }
                group_series(&pages, &stem)
            }
        };

        debug!(
            path = %path.display(),
            pages = pages.len(),
            series = series.len(),
            "Opened TIFF source"
        );

        let capacity = NonZeroUsize::new(chunk_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            path: path.to_path_buf(),
            decoder: Some(decoder),
            current_page,
            pages,
            series_pages,
            cache: LruCache::new(capacity),
            metadata: SourceMetadata {
                format: "TIFF".to_string(),
                series,
                interleaved: true,
                original,
            },
        })
    }

    fn load_chunk(&mut self, page: usize, chunk_index: u32) -> Result<()> {
        if self.cache.contains(&(page, chunk_index)) {
            return Ok(());
        }
        let decoder = self.decoder.as_mut().ok_or_else(|| {
            ConversionError::ReadFailure(format!("{} is closed", self.path.display()))
        })?;
        if self.current_page != page {
            decoder
                .seek_to_image(page)
                .map_err(|e| map_tiff_error(&self.path, e, false))?;
            self.current_page = page;
        }

        trace!(page, chunk_index, "Decoding chunk");
        let decoded = decoder
            .read_chunk(chunk_index)
            .map_err(|e| map_tiff_error(&self.path, e, false))?;
        let bytes = decoding_result_bytes(decoded)?;

        let layout = self.pages[page];
        let across = layout.chunks_across();
        let (_, data_width) = effective_tile_extent(
            chunk_index % across,
            layout.chunk_width,
            layout.dimensions.width,
        );
        let (_, data_height) = effective_tile_extent(
            chunk_index / across,
            layout.chunk_height,
            layout.dimensions.height,
        );
        let pixel_bytes =
            layout.dimensions.channel_count as usize * layout.dimensions.bytes_per_pixel();
        let full_len =
            layout.chunk_width as usize * layout.chunk_height as usize * pixel_bytes;
        let clipped_len = data_width as usize * data_height as usize * pixel_bytes;
        let row_pixels = if bytes.len() == full_len {
            layout.chunk_width as usize
        } else if bytes.len() == clipped_len {
            data_width as usize
        } else {
            return Err(ConversionError::ReadFailure(format!(
                "chunk {} of page {} decoded to {} bytes, expected {} or {}",
                chunk_index,
                page,
                bytes.len(),
                full_len,
                clipped_len
            )));
        };

        self.cache
            .put((page, chunk_index), DecodedChunk { bytes, row_pixels });
        Ok(())
    }
}

impl SourceImageReader for TiffSourceReader {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn read_region(&mut self, index: PlaneIndex, region: Region) -> Result<Vec<u8>> {
        let dims = self.plane_dimensions(index)?;
        dims.check_region(&region)?;
        let page = self.series_pages[index.series][index.plane];
        let layout = self.pages[page];

        let pixel_bytes = dims.channel_count as usize * dims.bytes_per_pixel();
        let mut out = vec![0u8; dims.region_len(&region)];

        let region_right = region.x + region.width;
        let region_bottom = region.y + region.height;
        let first_cx = region.x / layout.chunk_width;
        let last_cx = (region_right - 1) / layout.chunk_width;
        let first_cy = region.y / layout.chunk_height;
        let last_cy = (region_bottom - 1) / layout.chunk_height;

        for cy in first_cy..=last_cy {
            for cx in first_cx..=last_cx {
                let chunk_index = cy * layout.chunks_across() + cx;
                self.load_chunk(page, chunk_index)?;
                let chunk = self.cache.get(&(page, chunk_index)).ok_or_else(|| {
                    ConversionError::ReadFailure(format!("chunk {chunk_index} evicted"))
                })?;

                let chunk_x = cx * layout.chunk_width;
                let chunk_y = cy * layout.chunk_height;
                let x0 = region.x.max(chunk_x);
                let x1 = region_right.min(chunk_x.saturating_add(layout.chunk_width));
                let y0 = region.y.max(chunk_y);
                let y1 = region_bottom.min(chunk_y.saturating_add(layout.chunk_height));
                let span = (x1 - x0) as usize * pixel_bytes;

                for y in y0..y1 {
                    let src = ((y - chunk_y) as usize * chunk.row_pixels + (x0 - chunk_x) as usize)
                        * pixel_bytes;
                    let dst = ((y - region.y) as usize * region.width as usize
                        + (x0 - region.x) as usize)
                        * pixel_bytes;
                    let row = chunk.bytes.get(src..src + span).ok_or_else(|| {
                        ConversionError::ReadFailure(format!(
                            "chunk {chunk_index} of page {page} is truncated"
                        ))
                    })?;
                    out[dst..dst + span].copy_from_slice(row);
                }
            }
        }

        Ok(out)
    }

    fn close(&mut self) -> Result<()> {
        if self.decoder.take().is_some() {
            self.cache.clear();
            debug!(path = %self.path.display(), "Closed TIFF source");
        }
        Ok(())
    }
}

fn inspect_page(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<PageLayout> {
    let tiff_error = |e| map_tiff_error(path, e, true);

    let (width, height) = decoder.dimensions().map_err(tiff_error)?;
    let (channel_count, bits) = match decoder.colortype().map_err(tiff_error)? {
        ColorType::Gray(bits) => (1u16, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) => (3, bits),
        ColorType::RGBA(bits) => (4, bits),
        ColorType::Multiband {
            bit_depth,
            num_samples,
        } => (num_samples, bit_depth),
        other => {
            return Err(ConversionError::UnsupportedFormat(format!(
                "TIFF colour type {other:?} requires colour conversion"
            )));
        }
    };

    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(tiff_error)?
        .unwrap_or(1);
    if planar == 2 && channel_count > 1 {
        return Err(ConversionError::UnsupportedFormat(
            "planar-separate TIFF input".to_string(),
        ));
    }

    let sample_format = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)
        .map_err(tiff_error)?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let pixel_type = pixel_type_for(bits, sample_format)?;

    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    Ok(PageLayout {
        dimensions: PlaneDimensions {
            width,
            height,
            pixel_type,
            channel_count,
        },
        chunk_width: chunk_width.max(1),
        chunk_height: chunk_height.max(1),
    })
}

fn pixel_type_for(bits: u8, sample_format: u16) -> Result<PixelType> {
    let pixel_type = match (sample_format, bits) {
        (1, 8) => PixelType::Uint8,
        (1, 16) => PixelType::Uint16,
        (1, 32) => PixelType::Uint32,
        (2, 8) => PixelType::Int8,
        (2, 16) => PixelType::Int16,
        (2, 32) => PixelType::Int32,
        (3, 32) => PixelType::Float,
        (3, 64) => PixelType::Double,
        _ => {
            return Err(ConversionError::UnsupportedFormat(format!(
                "{bits}-bit samples with SampleFormat {sample_format}"
            )));
        }
    };
    Ok(pixel_type)
}

/// Groups consecutive pages with identical geometry and sample layout into series.
fn group_series(pages: &[PageLayout], stem: &str) -> (Vec<SeriesInfo>, Vec<Vec<usize>>) {
    let mut series: Vec<SeriesInfo> = Vec::new();
    let mut members: Vec<Vec<usize>> = Vec::new();

    for (page_index, page) in pages.iter().enumerate() {
        match (series.last_mut(), members.last_mut()) {
            (Some(current), Some(current_pages)) if current.dimensions == page.dimensions => {
                current.plane_count += 1;
                current_pages.push(page_index);
            }
            _ => {
                series.push(SeriesInfo {
                    name: Some(format!("{stem} #{}", series.len())),
                    plane_count: 1,
                    dimensions: page.dimensions,
                    ome: None,
                });
                members.push(vec![page_index]);
            }
        }
    }

    if series.len() == 1 {
        series[0].name = Some(stem.to_string());
    }
    (series, members)
}

/// Splits pages into the series an OME-XML description declares.
///
/// Every image must start at the next unused page, cover pages with identical
/// geometry, and together the images must use every page.
fn series_from_ome(
    pages: &[PageLayout],
    images: &[OmeImage],
) -> Option<(Vec<SeriesInfo>, Vec<Vec<usize>>)> {
    if images.is_empty() {
        return None;
    }

    let mut series = Vec::with_capacity(images.len());
    let mut members = Vec::with_capacity(images.len());
    let mut next = 0;
    for image in images {
        let first = pages.get(next)?;
        if image.first_ifd.is_some_and(|ifd| ifd != next) {
            return None;
        }
        let count = image
            .dimensions
            .plane_count(first.dimensions.channel_count)?;
        let end = next.checked_add(count).filter(|&end| end <= pages.len())?;
        if pages[next..end]
            .iter()
            .any(|page| page.dimensions != first.dimensions)
        {
            return None;
        }

        series.push(SeriesInfo {
            name: image.name.clone(),
            plane_count: count,
            dimensions: first.dimensions,
            ome: Some(image.dimensions.clone()),
        });
        members.push((next..end).collect());
        next = end;
    }

    (next == pages.len()).then_some((series, members))
}

fn read_original_metadata(decoder: &mut Decoder<BufReader<File>>) -> Vec<(String, String)> {
    let mut original = Vec::new();
    for (tag, name) in ORIGINAL_METADATA_TAGS {
        let Ok(Some(value)) = decoder.find_tag(tag) else {
            continue;
        };
        let Ok(text) = value.into_string() else {
            continue;
        };
        let text = text.trim_end_matches('\0').trim().to_string();
        if text.is_empty() || (tag == Tag::ImageDescription && text.contains("<OME")) {
            continue;
        }
        original.push((name.to_string(), text));
    }
    original
}

fn map_tiff_error(path: &Path, error: TiffError, opening: bool) -> ConversionError {
    match error {
        TiffError::IoError(e) => ConversionError::io(path.display().to_string(), e),
        TiffError::UnsupportedError(e) => ConversionError::UnsupportedFormat(e.to_string()),
        TiffError::FormatError(e) if opening => {
            ConversionError::UnsupportedFormat(format!("{}: {}", path.display(), e))
        }
        other => ConversionError::ReadFailure(format!("{}: {}", path.display(), other)),
    }
}

macro_rules! le_bytes {
    ($samples:expr) => {
        $samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>()
    };
}

fn decoding_result_bytes(result: DecodingResult) -> Result<Vec<u8>> {
    let bytes = match result {
        DecodingResult::U8(samples) => samples,
        DecodingResult::I8(samples) => le_bytes!(samples),
        DecodingResult::U16(samples) => le_bytes!(samples),
        DecodingResult::I16(samples) => le_bytes!(samples),
        DecodingResult::U32(samples) => le_bytes!(samples),
        DecodingResult::I32(samples) => le_bytes!(samples),
        DecodingResult::F32(samples) => le_bytes!(samples),
        DecodingResult::F64(samples) => le_bytes!(samples),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(ConversionError::UnsupportedFormat(
                "64-bit integer or half-float samples".to_string(),
            ));
        }
    };
    Ok(bytes)
}
