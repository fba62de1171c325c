pub mod info;
pub mod query;
pub mod render;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use relief::{Crs, RasterSource, RasterStats};
use std::path::PathBuf;

/// Raster selection shared by every command.
pub struct RasterArgs {
    pub path: Option<PathBuf>,
    pub source_crs: Option<String>,
}

impl RasterArgs {
    pub fn open(&self) -> Result<RasterSource> {
        let path = self.path.as_ref().context(
            "No raster given. Use --raster or set RELIEF_RASTER_PATH",
        )?;
        let crs = self
            .source_crs
            .as_deref()
            .map(Crs::parse)
            .transpose()
            .context("Invalid --source-crs")?;
        RasterSource::open_with_crs(path, crs)
            .with_context(|| format!("Failed to open {}", path.display()))
    }
}

/// Scan the coarsest level for elevation statistics, showing progress.
pub fn statistics(source: &RasterSource) -> Result<RasterStats> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks")?
            .progress_chars("#>-"),
    );

    let stats = source
        .statistics(source.coarsest_level(), |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        })
        .context("Failed to compute statistics")?;

    pb.finish_and_clear();
    Ok(stats)
}
