use anyhow::Result;
use relief::source::RasterLevel;
use relief::{GeoTransform, RasterStats};
use serde::Serialize;

use super::{statistics, RasterArgs};

#[derive(Serialize)]
struct InfoResponse<'a> {
    path: String,
    file_size: u64,
    width: usize,
    height: usize,
    crs: String,
    transform: &'a GeoTransform,
    extent: [f64; 4],
    nodata: Option<f64>,
    levels: &'a [RasterLevel],
    statistics: RasterStats,
}

pub fn run(raster: &RasterArgs, json: bool) -> Result<()> {
    let source = raster.open()?;
    let file_size = std::fs::metadata(source.path())?.len();
    let stats = statistics(&source)?;
    let extent = source.extent();

    if json {
        let response = InfoResponse {
            path: source.path().display().to_string(),
            file_size,
            width: source.width(),
            height: source.height(),
            crs: source.crs().to_string(),
            transform: source.transform(),
            extent: [extent.min_x, extent.min_y, extent.max_x, extent.max_y],
            nodata: source.nodata(),
            levels: source.levels(),
            statistics: stats,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let (res_x, res_y) = source.resolution();
    let base = &source.levels()[0];

    println!("Raster: {}", source.path().display());
    println!("File size: {}", format_size(file_size));
    println!();
    println!("Size: {}x{} pixels", source.width(), source.height());
    println!("CRS: {}", source.crs());
    println!("Pixel size: {} x {}", res_x, res_y);
    println!("Extent: {}", extent);
    if base.tiled {
        println!("Blocks: {}x{} tiles", base.block_width, base.block_height);
    } else {
        println!("Blocks: strips of {} rows (not cloud-optimized)", base.block_height);
    }
    match source.nodata() {
        Some(v) => println!("Nodata: {}", v),
        None => println!("Nodata: none"),
    }

    let overviews = &source.levels()[1..];
    if overviews.is_empty() {
        println!("Overviews: none");
    } else {
        println!("Overviews:");
        for (i, level) in overviews.iter().enumerate() {
            println!(
                "  {}: {}x{} (pixel {} x {})",
                i + 1,
                level.width,
                level.height,
                level.transform.pixel_width,
                level.transform.pixel_height.abs()
            );
        }
    }
    println!();

    if stats.valid_count > 0 {
        println!("Min elevation: {}m", stats.min);
        println!("Max elevation: {}m", stats.max);
        println!("Mean elevation: {:.2}m", stats.mean);
    }
    let total = stats.valid_count + stats.nodata_count;
    if stats.nodata_count > 0 && total > 0 {
        let pct = (stats.nodata_count as f64 / total as f64) * 100.0;
        println!("Nodata samples: {} ({:.1}%)", stats.nodata_count, pct);
    }
    if stats.level > 0 {
        println!("(statistics from overview {})", stats.level);
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
