use std::path::Path;

use tracing::{info, info_span, instrument, warn};

use crate::image_pipeline::{
    common::error::{ConversionError, Result},
    conversions::job::{ConversionJob, ConversionReport},
    conversions::transcoder::TiledTranscoder,
    source::{ReaderOptions, ReaderRegistry, SourceImageReader},
    tiff::{ConversionConfig, OmeTiffWriter},
};

/// Converts files recognized by a [`ReaderRegistry`] into tiled OME-TIFFs.
pub struct TiledOmeTiffPipeline {
    registry: ReaderRegistry,
    config: ConversionConfig,
}

impl TiledOmeTiffPipeline {
    pub fn new(config: ConversionConfig) -> Self {
        let registry = ReaderRegistry::new(ReaderOptions {
            chunk_cache_capacity: config.chunk_cache_capacity,
        });
        Self { registry, config }
    }

    pub fn with_registry(registry: ReaderRegistry, config: ConversionConfig) -> Self {
        Self { registry, config }
    }

    #[instrument(
        skip(self, job),
        fields(input = %job.input.display(), output = %job.output.display())
    )]
    pub fn convert(&self, job: &ConversionJob) -> Result<ConversionReport> {
        let requested = job.validate()?;
        info!(
            tile_width = requested.width,
            tile_height = requested.height,
            compression = %self.config.compression,
            "Starting tiled OME-TIFF conversion"
        );

        let mut reader = {
            let _span = info_span!("open_reader").entered();
            self.registry.open(&job.input)?
        };

        if let Err(e) = remove_stale_output(&job.output) {
            if let Err(close_error) = reader.close() {
                warn!(error = %close_error, "Failed to close source reader");
            }
            return Err(e);
        }

        let metadata = if self.config.all_series {
            reader.metadata().clone()
        } else {
            reader.metadata().with_series_limit(1)
        };
        let writer = OmeTiffWriter::new(metadata)
            .with_predictor(self.config.predictor)
            .with_bigtiff(self.config.bigtiff);

        TiledTranscoder::with_custom(reader, writer, self.config.clone())
            .run(&job.output, requested)
    }

    pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<ConversionReport> {
        let job = ConversionJob::new(
            input_path.as_ref(),
            output_path.as_ref(),
            tile_width,
            tile_height,
        );
        self.convert(&job)
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ConversionConfig) {
        self.config = config;
    }

    pub fn registry(&self) -> &ReaderRegistry {
        &self.registry
    }
}

/// The writer refuses to open an existing file.
fn remove_stale_output(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed existing output file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConversionError::io(path.display().to_string(), e)),
    }
}
