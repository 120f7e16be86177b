//! Conversion orchestration
//!
//! The transcoder drives any reader/writer pair tile by tile; the pipeline wires
//! it to the decoder registry and the OME-TIFF writer.

mod job;
mod tiled_ome_tiff;
pub mod timing;
mod transcoder;

#[cfg(test)]
mod tests;

pub use job::{ConversionJob, ConversionReport, ConversionState};
pub use tiled_ome_tiff::TiledOmeTiffPipeline;
pub use timing::{PipelineTimings, StepTiming, Timer};
pub use transcoder::TiledTranscoder;
