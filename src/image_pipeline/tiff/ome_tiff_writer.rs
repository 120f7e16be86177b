use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tiff::tags::{PhotometricInterpretation, PlanarConfiguration, SampleFormat, Tag};
use tracing::{debug, info, warn};

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::geometry::{Region, TileGrid, TileSize};
use crate::image_pipeline::source::{PlaneDimensions, PlaneIndex, SourceMetadata};
use crate::image_pipeline::tiff::compression::{apply_horizontal_predictor, compress};
use crate::image_pipeline::tiff::directory::{Directory, FieldValue, TiffFlavor, pad_to_word};
use crate::image_pipeline::tiff::ome_xml::build_ome_xml;
use crate::image_pipeline::tiff::types::{PREDICTOR_HORIZONTAL, TiffCompression};
use crate::image_pipeline::tiff::writer::TiledImageWriter;

/// Tile size used until `set_tile_size` is called.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// TIFF tile dimensions must be multiples of this.
pub const TILE_ALIGNMENT: u32 = 16;

/// Estimated tile payload above which BigTIFF is chosen automatically (3.5 GiB).
pub const BIGTIFF_THRESHOLD: u64 = 3_758_096_384;

const CREATOR: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// Rounds a requested tile extent to the nearest multiple of 16, at least 16.
pub fn align_tile_extent(requested: u32) -> u32 {
    let aligned = (requested as u64 + TILE_ALIGNMENT as u64 / 2) / TILE_ALIGNMENT as u64
        * TILE_ALIGNMENT as u64;
    let largest = (u32::MAX / TILE_ALIGNMENT * TILE_ALIGNMENT) as u64;
    aligned.clamp(TILE_ALIGNMENT as u64, largest) as u32
}

struct PlaneTiles {
    dimensions: PlaneDimensions,
    grid: TileGrid,
    /// Indexed by `sample_plane * tile_count + tile_index`.
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    predictor: bool,
}

struct OpenTiff {
    path: PathBuf,
    out: BufWriter<File>,
    position: u64,
    flavor: TiffFlavor,
    planes: Vec<PlaneTiles>,
    /// Index into `planes` of the first plane of each series.
    series_start: Vec<usize>,
    /// Padded tile, reused between writes.
    scratch: Vec<u8>,
}

enum WriterState {
    Configuring,
    Open(Box<OpenTiff>),
    Closed,
}

/// Writes a tiled, single-resolution OME-TIFF.
///
/// Tiles are compressed and appended as they arrive; the IFDs (one per plane,
/// series-major) and the OME-XML are written by [`close`](TiledImageWriter::close).
pub struct OmeTiffWriter {
    metadata: SourceMetadata,
    tile: TileSize,
    compression: TiffCompression,
    predictor: Option<u16>,
    interleaved: bool,
    bigtiff: Option<bool>,
    state: WriterState,
}

impl OmeTiffWriter {
    pub fn new(metadata: SourceMetadata) -> Self {
        let interleaved = metadata.interleaved;
        Self {
            metadata,
            tile: TileSize {
                width: DEFAULT_TILE_SIZE,
                height: DEFAULT_TILE_SIZE,
            },
            compression: TiffCompression::default(),
            predictor: None,
            interleaved,
            bigtiff: None,
            state: WriterState::Configuring,
        }
    }

    pub fn with_predictor(mut self, predictor: Option<u16>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_bigtiff(mut self, bigtiff: Option<bool>) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    pub fn tile_size(&self) -> TileSize {
        self.tile
    }

    fn ensure_configuring(&self, what: &str) -> Result<()> {
        match self.state {
            WriterState::Configuring => Ok(()),
            _ => Err(ConversionError::WriteFailure(format!(
                "cannot change {what} after the writer was opened"
            ))),
        }
    }

    /// Upper estimate of the bytes the tiles take on disk.
    ///
    /// Edge tiles are counted at full size since they are stored padded, and
    /// LZW can grow incompressible tiles by up to half (12-bit codes for 8-bit input).
    fn estimated_payload(&self) -> Result<u64> {
        let mut padded = 0u64;
        for series in &self.metadata.series {
            let dims = series.dimensions;
            let grid = TileGrid::new(dims.width, dims.height, self.tile)?;
            let tile_bytes = self.tile.width as u64
                * self.tile.height as u64
                * dims.channel_count as u64
                * dims.bytes_per_pixel() as u64;
            padded = padded.saturating_add(
                tile_bytes
                    .saturating_mul(grid.tile_count() as u64)
                    .saturating_mul(series.plane_count as u64),
            );
        }
        Ok(match self.compression {
            TiffCompression::None => padded,
            TiffCompression::Lzw => padded.saturating_add(padded / 2),
            TiffCompression::Deflate => padded.saturating_add(padded / 256),
        })
    }

    fn flavor(&self) -> Result<TiffFlavor> {
        Ok(match self.bigtiff {
            Some(true) => TiffFlavor::Big,
            Some(false) => TiffFlavor::Classic,
            None if self.estimated_payload()? > BIGTIFF_THRESHOLD => TiffFlavor::Big,
            None => TiffFlavor::Classic,
        })
    }

    fn uses_predictor(&self, dims: &PlaneDimensions) -> bool {
        self.predictor == Some(PREDICTOR_HORIZONTAL) && !dims.pixel_type.is_floating_point()
    }

    fn directory(
        &self,
        flavor: TiffFlavor,
        plane: &PlaneTiles,
        description: Option<&str>,
    ) -> std::io::Result<Directory> {
        let dims = &plane.dimensions;
        let samples = dims.channel_count;
        let rgb = samples == 3 || samples == 4;
        let color_samples = if rgb { 3 } else { 1 };
        let sample_format = if dims.pixel_type.is_floating_point() {
            SampleFormat::IEEEFP
        } else if dims.pixel_type.is_signed() {
            SampleFormat::Int
        } else {
            SampleFormat::Uint
        };

        let mut dir = Directory::new();
        dir.insert(Tag::NewSubfileType, FieldValue::Long(vec![0]));
        dir.insert(Tag::ImageWidth, FieldValue::Long(vec![dims.width]));
        dir.insert(Tag::ImageLength, FieldValue::Long(vec![dims.height]));
        dir.insert(
            Tag::BitsPerSample,
            FieldValue::Short(vec![dims.pixel_type.bits_per_sample(); samples as usize]),
        );
        dir.insert(Tag::Compression, FieldValue::Short(vec![self.compression.tag_value()]));
        let photometric = if rgb {
            PhotometricInterpretation::RGB
        } else {
            PhotometricInterpretation::BlackIsZero
        };
        dir.insert(
            Tag::PhotometricInterpretation,
            FieldValue::Short(vec![photometric.to_u16()]),
        );
        if let Some(description) = description {
            dir.insert(Tag::ImageDescription, FieldValue::Ascii(description.to_string()));
        }
        dir.insert(Tag::SamplesPerPixel, FieldValue::Short(vec![samples]));
        let planar = if self.interleaved {
            PlanarConfiguration::Chunky
        } else {
            PlanarConfiguration::Planar
        };
        dir.insert(Tag::PlanarConfiguration, FieldValue::Short(vec![planar.to_u16()]));
        dir.insert(Tag::Software, FieldValue::Ascii(CREATOR.to_string()));
        if plane.predictor {
            dir.insert(Tag::Predictor, FieldValue::Short(vec![PREDICTOR_HORIZONTAL]));
        }
        dir.insert(Tag::TileWidth, FieldValue::Long(vec![plane.grid.tile.width]));
        dir.insert(Tag::TileLength, FieldValue::Long(vec![plane.grid.tile.height]));
        dir.insert(Tag::TileOffsets, FieldValue::offsets(flavor, &plane.offsets)?);
        dir.insert(
            Tag::TileByteCounts,
            FieldValue::offsets(flavor, &plane.byte_counts)?,
        );
        if samples > color_samples {
            dir.insert(
                Tag::ExtraSamples,
                FieldValue::Short(vec![0; (samples - color_samples) as usize]),
            );
        }
        dir.insert(
            Tag::SampleFormat,
            FieldValue::Short(vec![sample_format.to_u16(); samples as usize]),
        );
        Ok(dir)
    }

    fn finalize(&self, mut tiff: OpenTiff) -> std::io::Result<usize> {
        let description = build_ome_xml(&self.metadata, CREATOR);
        let mut pointer = tiff.flavor.first_ifd_pointer();
        let mut patches = Vec::with_capacity(tiff.planes.len());

        for (index, plane) in tiff.planes.iter().enumerate() {
            let description = (index == 0).then_some(description.as_str());
            let dir = self.directory(tiff.flavor, plane, description)?;
            let mut position = tiff.position;
            let written = dir.write(&mut tiff.out, &mut position, tiff.flavor)?;
            tiff.position = position;
            debug!(ifd = index, offset = written.offset, entries = dir.len(), "Wrote directory");
            patches.push((pointer, tiff.flavor.encode_offset(written.offset)?));
            pointer = written.next_pointer;
        }

        for (at, bytes) in patches {
            tiff.out.seek(SeekFrom::Start(at))?;
            tiff.out.write_all(&bytes)?;
        }
        let file = tiff.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(tiff
            .planes
            .iter()
            .map(|p| p.byte_counts.iter().filter(|&&count| count == 0).count())
            .sum())
    }
}

impl OpenTiff {
    fn plane_slot(&self, index: PlaneIndex) -> Result<usize> {
        let start = self.series_start.get(index.series).ok_or_else(|| {
            ConversionError::WriteFailure(format!("no series {} in output", index.series))
        })?;
        let end = self
            .series_start
            .get(index.series + 1)
            .copied()
            .unwrap_or(self.planes.len());
        let slot = start + index.plane;
        if slot >= end {
            return Err(ConversionError::WriteFailure(format!(
                "no plane {} in series {} of output",
                index.plane, index.series
            )));
        }
        Ok(slot)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let write_error = |e: std::io::Error| {
            ConversionError::WriteFailure(format!("{}: {}", self.path.display(), e))
        };
        pad_to_word(&mut self.out, &mut self.position).map_err(write_error)?;
        let offset = self.position;
        if offset + bytes.len() as u64 > self.flavor.max_offset() {
            return Err(ConversionError::WriteFailure(format!(
                "{} exceeds the 4 GiB classic TIFF limit; enable BigTIFF",
                self.path.display()
            )));
        }
        self.out.write_all(bytes).map_err(write_error)?;
        self.position += bytes.len() as u64;
        Ok(offset)
    }
}

impl TiledImageWriter for OmeTiffWriter {
    fn set_tile_size(&mut self, requested: TileSize) -> Result<TileSize> {
        self.ensure_configuring("tile size")?;
        let accepted = TileSize::new(
            align_tile_extent(requested.width),
            align_tile_extent(requested.height),
        )?;
        if accepted != requested {
            debug!(
                requested_width = requested.width,
                requested_height = requested.height,
                accepted_width = accepted.width,
                accepted_height = accepted.height,
                "Tile size adjusted to a multiple of {}",
                TILE_ALIGNMENT
            );
        }
        self.tile = accepted;
        Ok(accepted)
    }

    fn set_compression(&mut self, compression: TiffCompression) -> Result<()> {
        self.ensure_configuring("compression")?;
        self.compression = compression;
        Ok(())
    }

    fn set_interleaved(&mut self, interleaved: bool) -> Result<()> {
        self.ensure_configuring("interleaving")?;
        self.interleaved = interleaved;
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.ensure_configuring("output path")?;
        if self.metadata.series.is_empty() {
            return Err(ConversionError::WriteFailure("no series to write".to_string()));
        }
        if self.predictor.is_some_and(|p| p != PREDICTOR_HORIZONTAL) {
            warn!(predictor = ?self.predictor, "Unsupported predictor ignored");
        }

        let mut planes = Vec::with_capacity(self.metadata.total_plane_count());
        let mut series_start = Vec::with_capacity(self.metadata.series.len());
        for series in &self.metadata.series {
            series_start.push(planes.len());
            let dims = series.dimensions;
            let grid = TileGrid::new(dims.width, dims.height, self.tile)?;
            let sample_planes = if self.interleaved { 1 } else { dims.channel_count as usize };
            let predictor = self.uses_predictor(&dims);
            if self.predictor == Some(PREDICTOR_HORIZONTAL) && !predictor {
                warn!(
                    pixel_type = dims.pixel_type.ome_name(),
                    "Predictor skipped for floating point samples"
                );
            }
            for _ in 0..series.plane_count {
                planes.push(PlaneTiles {
                    dimensions: dims,
                    grid,
                    offsets: vec![0; grid.tile_count() * sample_planes],
                    byte_counts: vec![0; grid.tile_count() * sample_planes],
                    predictor,
                });
            }
        }

        let flavor = self.flavor()?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| ConversionError::io(path.display().to_string(), e))?;
        let mut out = BufWriter::new(file);
        let header = flavor.header();
        out.write_all(&header)
            .map_err(|e| ConversionError::io(path.display().to_string(), e))?;

        info!(
            path = %path.display(),
            ?flavor,
            compression = %self.compression,
            tile_width = self.tile.width,
            tile_height = self.tile.height,
            planes = planes.len(),
            "Opened OME-TIFF writer"
        );

        self.state = WriterState::Open(Box::new(OpenTiff {
            path: path.to_path_buf(),
            out,
            position: header.len() as u64,
            flavor,
            planes,
            series_start,
            scratch: Vec::new(),
        }));
        Ok(())
    }

    fn write_region(&mut self, index: PlaneIndex, buffer: &[u8], region: Region) -> Result<()> {
        let interleaved = self.interleaved;
        let compression = self.compression;
        let tiff = match &mut self.state {
            WriterState::Open(tiff) => tiff.as_mut(),
            _ => {
                return Err(ConversionError::WriteFailure(
                    "writer is not open".to_string(),
                ));
            }
        };

        let slot = tiff.plane_slot(index)?;
        let (dims, grid, predictor) = {
            let plane = &tiff.planes[slot];
            (plane.dimensions, plane.grid, plane.predictor)
        };
        let expected = dims.region_len(&region);
        if buffer.len() != expected {
            return Err(ConversionError::WriteFailure(format!(
                "buffer holds {} bytes, region {}x{} needs {}",
                buffer.len(),
                region.width,
                region.height,
                expected
            )));
        }
        let tile_index = grid.tile_index(&region).ok_or_else(|| {
            ConversionError::WriteFailure(format!(
                "region {}x{}+{}+{} is not a tile of the {}x{} grid",
                region.width, region.height, region.x, region.y, grid.tile.width, grid.tile.height
            ))
        })?;

        let (sample_planes, samples_per_pixel) = if interleaved {
            (1, dims.channel_count as usize)
        } else {
            (dims.channel_count as usize, 1)
        };
        let bytes_per_sample = dims.bytes_per_pixel();
        let tile_row = grid.tile.width as usize * samples_per_pixel * bytes_per_sample;
        let region_row = region.width as usize * samples_per_pixel * bytes_per_sample;
        let sample_plane_len = region_row * region.height as usize;

        for sample_plane in 0..sample_planes {
            let start = sample_plane * sample_plane_len;
            let source = &buffer[start..start + sample_plane_len];

            let mut scratch = std::mem::take(&mut tiff.scratch);
            scratch.clear();
            scratch.resize(tile_row * grid.tile.height as usize, 0);
            for (row, src) in source.chunks_exact(region_row).enumerate() {
                scratch[row * tile_row..row * tile_row + region_row].copy_from_slice(src);
            }
            if predictor {
                apply_horizontal_predictor(
                    &mut scratch,
                    tile_row,
                    samples_per_pixel,
                    bytes_per_sample,
                );
            }
            let packed = compress(compression, &scratch);
            tiff.scratch = scratch;
            let packed = packed?;

            let offset = tiff.append(&packed)?;
            let entry = sample_plane * grid.tile_count() + tile_index;
            let plane = &mut tiff.planes[slot];
            if plane.byte_counts[entry] != 0 {
                warn!(
                    series = index.series,
                    plane = index.plane,
                    tile = tile_index,
                    "Tile written twice; keeping the latest data"
                );
            }
            plane.offsets[entry] = offset;
            plane.byte_counts[entry] = packed.len() as u64;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let tiff = match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Open(tiff) => *tiff,
            WriterState::Configuring | WriterState::Closed => return Ok(()),
        };
        let path = tiff.path.clone();

        let missing = self.finalize(tiff).map_err(|e| {
            ConversionError::CloseFailure(format!("{}: {}", path.display(), e))
        })?;
        if missing > 0 {
            return Err(ConversionError::CloseFailure(format!(
                "{}: {} tiles were never written",
                path.display(),
                missing
            )));
        }

        info!(path = %path.display(), "Closed OME-TIFF writer");
        Ok(())
    }
}
