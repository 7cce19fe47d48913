use anyhow::{Context, Result};
use bandalign::core::batch::{BatchOrchestrator, ProcessingParams};
use bandalign::io::image_set::{DirectoryCapture, ImageSet};
use bandalign::types::{BitDepth, CalibrationMode};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

/// Align, pansharpen and export every capture of a multispectral image set.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Directory containing the capture subfolders.
    #[arg(long)]
    imagepath: PathBuf,
    /// Output directory (defaults to <imagepath>/processed_bands).
    #[arg(long)]
    outputpath: Option<PathBuf>,
    /// Capture of the calibration panel, used to derive irradiance.
    #[arg(long)]
    panelpath: Option<PathBuf>,
    /// JSON file with processing parameters; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Reprocess captures that already have output.
    #[arg(long, default_value_t = false)]
    overwrite: bool,
    /// Also write an RGB thumbnail per capture.
    #[arg(long, default_value_t = false)]
    thumbnails: bool,
    /// Align at native resolution even on panchromatic cameras.
    #[arg(long, default_value_t = false)]
    no_pansharpen: bool,
    /// Calibrated units of the exported bands.
    #[arg(long, value_enum)]
    img_type: Option<ImageType>,
    /// Sample depth of the exported rasters.
    #[arg(long, value_enum)]
    bit_depth: Option<OutputDepth>,
    /// Directory for {serial}_warp_matrices.json.
    #[arg(long)]
    warp_matrix_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ImageType {
    Reflectance,
    Radiance,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputDepth {
    U8,
    U16,
}

impl Args {
    fn processing_params(&self) -> Result<ProcessingParams> {
        let mut params = match &self.config {
            Some(path) => ProcessingParams::from_json_file(path)?,
            None => ProcessingParams::default(),
        };

        params.overwrite |= self.overwrite;
        params.generate_thumbnails |= self.thumbnails;
        if self.no_pansharpen {
            params.pan_sharpen = false;
        }
        if let Some(img_type) = self.img_type {
            params.img_type = match img_type {
                ImageType::Reflectance => CalibrationMode::Reflectance,
                ImageType::Radiance => CalibrationMode::Radiance,
            };
        }
        if let Some(depth) = self.bit_depth {
            params.output_bit_depth = match depth {
                OutputDepth::U8 => BitDepth::U8,
                OutputDepth::U16 => BitDepth::U16,
            };
        }
        if let Some(dir) = &self.warp_matrix_dir {
            params.warp_matrix_dir = dir.clone();
        }
        Ok(params)
    }
}

fn run(args: Args) -> Result<bool> {
    let params = args.processing_params()?;
    let output_path = args
        .outputpath
        .clone()
        .unwrap_or_else(|| args.imagepath.join("processed_bands"));

    let mut image_set = ImageSet::from_directory(&args.imagepath)
        .with_context(|| format!("Failed to load image set from {}", args.imagepath.display()))?;

    if let Some(panel_path) = &args.panelpath {
        let panel = DirectoryCapture::open(panel_path)
            .with_context(|| format!("Failed to open panel capture {}", panel_path.display()))?;
        image_set.apply_panel(&panel)?;
    }

    std::fs::create_dir_all(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let orchestrator = BatchOrchestrator::with_file_store(params);
    let report = orchestrator.run(&image_set.captures, &output_path);
    Ok(!report.has_failures())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
