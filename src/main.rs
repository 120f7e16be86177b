use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use tiled_ome_tiff_rs::cli::Cli;
use tiled_ome_tiff_rs::image_pipeline::TiledOmeTiffPipeline;
use tiled_ome_tiff_rs::logger;

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.conversion_config()?;
    let job = cli.job();
    let pipeline = TiledOmeTiffPipeline::new(config);

    info!(
        input = %job.input.display(),
        output = %job.output.display(),
        compression = %pipeline.config().compression,
        "Starting tiled_ome_tiff_rs"
    );

    let report = pipeline
        .convert(&job)
        .with_context(|| format!("converting {}", job.input.display()))?;

    info!(
        tile_width = report.tile.width,
        tile_height = report.tile.height,
        planes = report.planes,
        tiles = report.tiles,
        "Conversion successful"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(&cli.log_config());

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Failed to read and write tiles.");
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
