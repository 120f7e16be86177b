use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::image_pipeline::common::error::{ConversionError, Result};
use crate::image_pipeline::conversions::{
    ConversionJob, ConversionState, TiledOmeTiffPipeline, TiledTranscoder,
};
use crate::image_pipeline::geometry::{Region, TileSize};
use crate::image_pipeline::source::{
    PixelType, PlaneDimensions, PlaneIndex, SeriesInfo, SourceImageReader, SourceMetadata,
};
use crate::image_pipeline::tiff::{ConversionConfig, TiffCompression, TiledImageWriter};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Read(PlaneIndex, Region),
    ReaderClose,
    TileSize(TileSize),
    Compression(TiffCompression),
    Interleaved(bool),
    Open(PathBuf),
    Write(PlaneIndex, Region, usize),
    WriterClose,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct MockReader {
    metadata: SourceMetadata,
    fail_read_at: Option<usize>,
    fail_close: bool,
    reads: usize,
    log: EventLog,
}

impl MockReader {
    fn new(metadata: SourceMetadata, log: EventLog) -> Self {
        Self {
            metadata,
            fail_read_at: None,
            fail_close: false,
            reads: 0,
            log,
        }
    }
}

impl SourceImageReader for MockReader {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn read_region(&mut self, index: PlaneIndex, region: Region) -> Result<Vec<u8>> {
        if self.fail_read_at == Some(self.reads) {
            return Err(ConversionError::ReadFailure("Mock decode error".to_string()));
        }
        self.reads += 1;
        let dims = self.plane_dimensions(index)?;
        dims.check_region(&region)?;
        self.log.lock().unwrap().push(Event::Read(index, region));
        Ok(vec![index.plane as u8; dims.region_len(&region)])
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(Event::ReaderClose);
        if self.fail_close {
            return Err(ConversionError::CloseFailure("Mock reader close error".to_string()));
        }
        Ok(())
    }
}

struct MockWriter {
    accept: Option<TileSize>,
    fail_write_at: Option<usize>,
    fail_open: bool,
    fail_close: bool,
    writes: usize,
    log: EventLog,
}

impl MockWriter {
    fn new(log: EventLog) -> Self {
        Self {
            accept: None,
            fail_write_at: None,
            fail_open: false,
            fail_close: false,
            writes: 0,
            log,
        }
    }
}

impl TiledImageWriter for MockWriter {
    fn set_tile_size(&mut self, requested: TileSize) -> Result<TileSize> {
        self.log.lock().unwrap().push(Event::TileSize(requested));
        Ok(self.accept.unwrap_or(requested))
    }

    fn set_compression(&mut self, compression: TiffCompression) -> Result<()> {
        self.log.lock().unwrap().push(Event::Compression(compression));
        Ok(())
    }

    fn set_interleaved(&mut self, interleaved: bool) -> Result<()> {
        self.log.lock().unwrap().push(Event::Interleaved(interleaved));
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        if self.fail_open {
            return Err(ConversionError::io(
                path.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Mock open error"),
            ));
        }
        self.log.lock().unwrap().push(Event::Open(path.to_path_buf()));
        Ok(())
    }

    fn write_region(&mut self, index: PlaneIndex, buffer: &[u8], region: Region) -> Result<()> {
        if self.fail_write_at == Some(self.writes) {
            return Err(ConversionError::WriteFailure("Mock encode error".to_string()));
        }
        self.writes += 1;
        self.log.lock().unwrap().push(Event::Write(index, region, buffer.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(Event::WriterClose);
        if self.fail_close {
            return Err(ConversionError::io(
                "mock output",
                std::io::Error::new(std::io::ErrorKind::Other, "Mock flush error"),
            ));
        }
        Ok(())
    }
}

fn gray8(width: u32, height: u32, planes: usize) -> SeriesInfo {
    SeriesInfo {
        name: None,
        plane_count: planes,
        dimensions: PlaneDimensions {
            width,
            height,
            pixel_type: PixelType::Uint8,
            channel_count: 1,
        },
        ome: None,
    }
}

fn metadata(series: Vec<SeriesInfo>) -> SourceMetadata {
    SourceMetadata {
        format: "mock".to_string(),
        series,
        interleaved: true,
        original: Vec::new(),
    }
}

fn tile(width: u32, height: u32) -> TileSize {
    TileSize::new(width, height).unwrap()
}

fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

fn writes(log: &EventLog) -> Vec<(PlaneIndex, Region, usize)> {
    events(log)
        .into_iter()
        .filter_map(|e| match e {
            Event::Write(index, region, len) => Some((index, region, len)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_300x300_with_128_tiles() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(300, 300, 1)]), log.clone());
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let report = transcoder.run(Path::new("out.ome.tif"), tile(128, 128)).unwrap();

    assert_eq!(transcoder.state(), ConversionState::Completed);
    assert_eq!(report.tiles, 9);
    assert_eq!(report.bytes, 300 * 300);
    assert_eq!(report.planes, 1);

    let written = writes(&log);
    assert_eq!(written.len(), 9);
    let regions: Vec<Region> = written.iter().map(|(_, r, _)| *r).collect();
    assert_eq!(regions[0], Region::new(0, 0, 128, 128));
    assert_eq!(regions[2], Region::new(256, 0, 44, 128));
    assert_eq!(regions[6], Region::new(0, 256, 128, 44));
    assert_eq!(regions[8], Region::new(256, 256, 44, 44));
    assert_eq!(written.iter().map(|(_, _, len)| len).sum::<usize>(), 90_000);
}

#[test]
fn test_reads_and_writes_alternate_and_close_happens_last() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(20, 10, 1)]), log.clone());
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();

    let index = PlaneIndex::new(0, 0);
    assert_eq!(
        events(&log),
        vec![
            Event::TileSize(tile(16, 16)),
            Event::Compression(TiffCompression::Lzw),
            Event::Interleaved(true),
            Event::Open(PathBuf::from("out.ome.tif")),
            Event::Read(index, Region::new(0, 0, 16, 10)),
            Event::Write(index, Region::new(0, 0, 16, 10), 160),
            Event::Read(index, Region::new(16, 0, 4, 10)),
            Event::Write(index, Region::new(16, 0, 4, 10), 40),
            Event::ReaderClose,
            Event::WriterClose,
        ]
    );
}

#[test]
fn test_accepted_tile_size_drives_geometry() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(100, 100, 1)]), log.clone());
    let mut writer = MockWriter::new(log.clone());
    writer.accept = Some(tile(64, 64));
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let report = transcoder.run(Path::new("out.ome.tif"), tile(50, 50)).unwrap();

    assert_eq!(report.tile, tile(64, 64));
    assert_eq!(report.tiles, 4);
    assert!(writes(&log).iter().all(|(_, r, _)| r.x % 64 == 0 && r.y % 64 == 0));
    assert_eq!(writes(&log)[3].1, Region::new(64, 64, 36, 36));
}

#[test]
fn test_zero_tile_size_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.ome.tif");
    std::fs::write(&output, b"keep me").unwrap();

    let pipeline = TiledOmeTiffPipeline::new(ConversionConfig::default());
    let job = ConversionJob::new(dir.path().join("missing.tif"), &output, 0, 0);
    let result = pipeline.convert(&job);

    assert!(matches!(result, Err(ConversionError::InvalidTileSize(0, 0))));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
}

#[test]
fn test_reader_failure_aborts_and_closes_both() {
    let log = EventLog::default();
    let mut reader = MockReader::new(metadata(vec![gray8(64, 64, 2)]), log.clone());
    reader.fail_read_at = Some(2);
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let result = transcoder.run(Path::new("out.ome.tif"), tile(32, 32));

    assert!(matches!(result, Err(ConversionError::ReadFailure(_))));
    assert_eq!(transcoder.state(), ConversionState::Failed);
    assert_eq!(writes(&log).len(), 2);
    let recorded = events(&log);
    assert_eq!(recorded.iter().filter(|e| **e == Event::ReaderClose).count(), 1);
    assert_eq!(recorded.iter().filter(|e| **e == Event::WriterClose).count(), 1);
}

#[test]
fn test_writer_failure_keeps_original_error_when_close_also_fails() {
    let log = EventLog::default();
    let mut reader = MockReader::new(metadata(vec![gray8(64, 64, 1)]), log.clone());
    reader.fail_close = true;
    let mut writer = MockWriter::new(log.clone());
    writer.fail_write_at = Some(0);
    writer.fail_close = true;
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let result = transcoder.run(Path::new("out.ome.tif"), tile(32, 32));

    assert!(matches!(result, Err(ConversionError::WriteFailure(_))));
    let recorded = events(&log);
    assert!(recorded.contains(&Event::ReaderClose));
    assert!(recorded.contains(&Event::WriterClose));
}

#[test]
fn test_writer_close_failure_is_promoted() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(32, 32, 1)]), log.clone());
    let mut writer = MockWriter::new(log.clone());
    writer.fail_close = true;
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let result = transcoder.run(Path::new("out.ome.tif"), tile(16, 16));

    match result {
        Err(ConversionError::CloseFailure(message)) => {
            assert!(message.contains("Mock flush error"))
        }
        other => panic!("expected CloseFailure, got {other:?}"),
    }
    assert_eq!(transcoder.state(), ConversionState::Failed);
}

#[test]
fn test_reader_close_failure_is_only_logged() {
    let log = EventLog::default();
    let mut reader = MockReader::new(metadata(vec![gray8(32, 32, 1)]), log.clone());
    reader.fail_close = true;
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let report = transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();

    assert_eq!(report.tiles, 4);
    assert_eq!(transcoder.state(), ConversionState::Completed);
    assert!(events(&log).contains(&Event::WriterClose));
}

#[test]
fn test_open_failure_still_closes() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(32, 32, 1)]), log.clone());
    let mut writer = MockWriter::new(log.clone());
    writer.fail_open = true;
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let result = transcoder.run(Path::new("out.ome.tif"), tile(16, 16));

    assert!(matches!(result, Err(ConversionError::IoFailure { .. })));
    let recorded = events(&log);
    assert!(!recorded.iter().any(|e| matches!(e, Event::Read(..))));
    assert!(recorded.contains(&Event::ReaderClose));
    assert!(recorded.contains(&Event::WriterClose));
}

#[test]
fn test_planar_source_sets_writer_interleaving() {
    let log = EventLog::default();
    let mut meta = metadata(vec![gray8(16, 16, 1)]);
    meta.interleaved = false;
    let reader = MockReader::new(meta, log.clone());
    let writer = MockWriter::new(log.clone());
    let config = ConversionConfig::builder()
        .compression(TiffCompression::Deflate)
        .build();
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, config);

    transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();

    let recorded = events(&log);
    assert!(recorded.contains(&Event::Interleaved(false)));
    assert!(recorded.contains(&Event::Compression(TiffCompression::Deflate)));
}

#[test]
fn test_only_first_series_by_default() {
    let log = EventLog::default();
    let reader = MockReader::new(
        metadata(vec![gray8(16, 16, 2), gray8(8, 8, 1)]),
        log.clone(),
    );
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    let report = transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();

    assert_eq!(report.series, 1);
    assert_eq!(report.planes, 2);
    assert!(writes(&log).iter().all(|(index, _, _)| index.series == 0));
}

#[test]
fn test_all_series_in_order() {
    let log = EventLog::default();
    let reader = MockReader::new(
        metadata(vec![gray8(16, 16, 2), gray8(8, 8, 1)]),
        log.clone(),
    );
    let writer = MockWriter::new(log.clone());
    let config = ConversionConfig::builder().all_series(true).build();
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, config);

    let report = transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();

    assert_eq!(report.series, 2);
    assert_eq!(report.planes, 3);
    let order: Vec<PlaneIndex> = writes(&log).iter().map(|(index, _, _)| *index).collect();
    assert_eq!(
        order,
        vec![PlaneIndex::new(0, 0), PlaneIndex::new(0, 1), PlaneIndex::new(1, 0)]
    );
    assert_eq!(writes(&log)[2].1, Region::new(0, 0, 8, 8));
}

#[test]
fn test_transcoder_runs_once() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(16, 16, 1)]), log.clone());
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    transcoder.run(Path::new("out.ome.tif"), tile(16, 16)).unwrap();
    let before = events(&log).len();

    let again = transcoder.run(Path::new("out.ome.tif"), tile(16, 16));
    assert!(matches!(again, Err(ConversionError::WriteFailure(_))));
    assert_eq!(transcoder.state(), ConversionState::Completed);

    let recorded = events(&log);
    assert_eq!(recorded.len(), before);
    assert_eq!(recorded.iter().filter(|e| **e == Event::ReaderClose).count(), 1);
    assert_eq!(recorded.iter().filter(|e| **e == Event::WriterClose).count(), 1);
}

#[test]
fn test_transcode_requires_initialize() {
    let log = EventLog::default();
    let reader = MockReader::new(metadata(vec![gray8(16, 16, 1)]), log.clone());
    let writer = MockWriter::new(log.clone());
    let mut transcoder = TiledTranscoder::with_custom(reader, writer, ConversionConfig::default());

    assert!(transcoder.transcode().is_err());
    assert_eq!(transcoder.state(), ConversionState::Idle);

    let accepted = transcoder.initialize(Path::new("out.ome.tif"), tile(16, 16)).unwrap();
    assert_eq!(accepted, tile(16, 16));
    assert_eq!(transcoder.state(), ConversionState::Initialized);
    transcoder.transcode().unwrap();
    assert_eq!(transcoder.state(), ConversionState::Completed);
}
