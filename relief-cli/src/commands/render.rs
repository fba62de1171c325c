use anyhow::{Context, Result};
use relief::request::{check_dimension, parse_bbox, WmsVersion};
use relief::{
    Crs, HillshadeParams, Layer, MapRequest, OutputFormat, RenderConfig, Renderer, Resampling,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::{statistics, RasterArgs};

pub struct RenderArgs {
    pub bbox: String,
    pub crs: String,
    pub width: u32,
    pub height: u32,
    pub layer: String,
    pub format: Option<String>,
    pub transparent: bool,
    pub azimuth: f64,
    pub altitude: f64,
    pub z_factor: f64,
    pub resampling: String,
    pub output: PathBuf,
}

pub fn run(raster: &RasterArgs, args: RenderArgs) -> Result<()> {
    let crs = Crs::parse(&args.crs).context("Invalid --crs")?;
    let bbox = parse_bbox(&args.bbox).context("Invalid --bbox")?;
    let layer: Layer = args.layer.parse().context("Invalid --layer")?;
    let resampling: Resampling = args.resampling.parse().context("Invalid --resampling")?;

    let defaults = RenderConfig::default();
    let width = check_dimension("width", args.width.into(), defaults.max_width)
        .context("Invalid --width")?;
    let height = check_dimension("height", args.height.into(), defaults.max_height)
        .context("Invalid --height")?;

    let format: OutputFormat = match &args.format {
        Some(f) => f.parse().context("Invalid --format")?,
        None => args
            .output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .parse()
            .context("Cannot infer the image format from the output file; use --format")?,
    };

    let source = Arc::new(raster.open()?);
    let config = RenderConfig {
        hillshade: HillshadeParams {
            azimuth: args.azimuth,
            altitude: args.altitude,
            z_factor: args.z_factor,
        },
        resampling,
        // Any CRS the EPSG database knows is acceptable from the command line
        extra_crs: vec![crs],
        ..defaults
    };
    let mut renderer = Renderer::new(Arc::clone(&source), config);
    if layer == Layer::Elevation {
        renderer = renderer.with_statistics(statistics(&source)?);
    }

    let request = MapRequest {
        version: WmsVersion::V1_3_0,
        layer,
        crs,
        bbox,
        width,
        height,
        format,
        transparent: args.transparent,
        background: renderer.config().background,
    };

    let start = Instant::now();
    let bytes = renderer.get_map(&request).context("Failed to render map")?;
    std::fs::write(&args.output, &bytes)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Wrote {} ({}x{} {}, {} bytes) in {:.1?}",
        args.output.display(),
        width,
        height,
        format,
        bytes.len(),
        start.elapsed()
    );

    Ok(())
}
