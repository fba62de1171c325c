//! # Relief - On-demand Hillshade Rendering
//!
//! Renders shaded-relief images from a single-band elevation raster stored as
//! a Cloud-Optimized GeoTIFF, answering OGC WMS 1.3.0 requests.
//!
//! ## Features
//!
//! - **Windowed reads**: Only the tiles overlapping a request are decoded from
//!   the memory-mapped file
//! - **Overviews**: Zoomed-out requests read the coarsest sufficient level
//! - **Reprojection**: Requests in any offered CRS, resampled onto the source grid
//! - **Seamless tiles**: A one-pixel halo keeps the 3×3 kernel continuous across
//!   neighbouring map tiles
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relief::{Crs, RasterSource, RenderConfig, Renderer};
//!
//! let source = Arc::new(RasterSource::open("/data/dem_cog.tif")?);
//! let renderer = Renderer::new(source, RenderConfig::default());
//!
//! // Elevation of the pixel under a WGS 84 point
//! if let Some(sample) = renderer.elevation_at(14.02, 51.97, &Crs::wgs84())? {
//!     println!("{:?}m at pixel {},{}", sample.elevation, sample.col, sample.row);
//! }
//! ```
//!
//! ## Pipeline
//!
//! A GetMap request is validated ([`request`]), mapped to a source pixel window
//! ([`window`]), read ([`source`]), resampled onto the output grid plus halo
//! ([`resample`]), shaded ([`hillshade`]) and encoded ([`encode`]). [`render`]
//! drives the stages and turns failures into WMS exception reports.
//!
//! ## Input Format
//!
//! The raster must be a single-band GeoTIFF, ideally tiled with internal
//! overviews:
//!
//! ```text
//! gdal_translate -of COG -co OVERVIEWS=AUTO dem.tif dem_cog.tif
//! ```

pub mod capabilities;
pub mod crs;
pub mod encode;
pub mod error;
pub mod grid;
pub mod hillshade;
pub mod render;
pub mod request;
pub mod resample;
pub mod source;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod fixture;

// Re-export main types at crate root for convenience
pub use crs::Crs;
pub use encode::OutputFormat;
pub use error::{ExceptionCode, ReliefError, Result};
pub use grid::{ElevationGrid, ShadedGrid};
pub use hillshade::HillshadeParams;
pub use render::{
    FeatureInfo, PointSample, RenderConfig, Renderer, Stage, WmsFailure, WmsResponse,
};
pub use request::{Layer, MapRequest, WmsParams, WmsRequest};
pub use resample::Resampling;
pub use source::{GeoTransform, RasterSource, RasterStats};
pub use window::BoundingBox;
