use anyhow::{Context, Result};
use relief::{Crs, RenderConfig, Renderer};
use serde::Serialize;
use std::sync::Arc;

use super::RasterArgs;

#[derive(Serialize)]
struct ElevationResponse {
    x: f64,
    y: f64,
    crs: String,
    col: Option<usize>,
    row: Option<usize>,
    elevation: Option<f32>,
}

pub fn run(raster: &RasterArgs, x: f64, y: f64, crs: &str, json: bool) -> Result<()> {
    let crs = Crs::parse(crs).context("Invalid --crs")?;
    let renderer = Renderer::new(Arc::new(raster.open()?), RenderConfig::default());

    let sample = renderer
        .elevation_at(x, y, &crs)
        .context("Failed to get elevation")?;

    // Output result
    if json {
        let response = ElevationResponse {
            x,
            y,
            crs: crs.to_string(),
            col: sample.map(|s| s.col),
            row: sample.map(|s| s.row),
            elevation: sample.and_then(|s| s.elevation),
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        match sample {
            None => println!("outside"),
            Some(s) => match s.elevation {
                Some(elev) => println!("{}", elev),
                None => println!("nodata"),
            },
        }
    }

    Ok(())
}
