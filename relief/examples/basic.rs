//! Basic example rendering one hillshade tile through the WMS interface.
//!
//! Run with: cargo run --example basic -- /path/to/dem_cog.tif

use relief::{RasterSource, ReliefError, RenderConfig, Renderer, WmsParams};
use std::env;
use std::sync::Arc;

fn main() -> Result<(), ReliefError> {
    // Get raster path from command line
    let path = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --example basic -- /path/to/dem_cog.tif");
        std::process::exit(1);
    });

    let source = Arc::new(RasterSource::open(&path)?);
    let extent = source.extent();
    println!(
        "{}: {}x{} pixels in {}, extent {}",
        path,
        source.width(),
        source.height(),
        source.crs(),
        extent
    );

    let renderer = Renderer::new(Arc::clone(&source), RenderConfig::default());

    // The central quarter of the raster, in its own CRS
    let (cx, cy) = extent.center();
    let (hw, hh) = (extent.width() / 4.0, extent.height() / 4.0);
    let bbox = format!("{},{},{},{}", cx - hw, cy - hh, cx + hw, cy + hh);
    let crs = source.crs().to_string();

    // 1.1.1 keeps x,y axis order for every CRS
    let params = WmsParams::from_pairs([
        ("SERVICE", "WMS"),
        ("VERSION", "1.1.1"),
        ("REQUEST", "GetMap"),
        ("LAYERS", "hillshade"),
        ("SRS", crs.as_str()),
        ("BBOX", bbox.as_str()),
        ("WIDTH", "512"),
        ("HEIGHT", "512"),
        ("FORMAT", "image/png"),
        ("TRANSPARENT", "TRUE"),
    ]);

    match renderer.handle(&params, "http://localhost:8080/wms") {
        Ok(response) => {
            std::fs::write("hillshade.png", &response.body)?;
            println!("Wrote hillshade.png ({} bytes)", response.body.len());
        }
        Err(failure) => {
            eprintln!("{}", failure.body());
            return Err(failure.error);
        }
    }

    if let Some(sample) = renderer.elevation_at(cx, cy, source.crs())? {
        println!("Elevation at the centre: {:?}", sample.elevation);
    }

    Ok(())
}
