//! Request orchestration.
//!
//! [`Renderer`] drives one WMS request through
//! `Received → Validated → WindowResolved → Read → Shaded → Encoded → Responded`.
//! A failure at any step ends the request with a [`WmsFailure`] that records
//! the last stage reached. The renderer only holds the shared read-only
//! [`RasterSource`] and immutable configuration, so one instance serves any
//! number of concurrent requests.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use quick_xml::escape::escape;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capabilities::{self, capabilities_xml, ServiceInfo};
use crate::crs::{ground_resolution, Crs};
use crate::encode::{encode, OutputFormat};
use crate::error::{ReliefError, Result};
use crate::grid::ShadedGrid;
use crate::hillshade::{shade, stretch, HillshadeParams};
use crate::request::{
    check_dimension, FeatureInfoRequest, InfoFormat, Layer, MapRequest, Operation, RequestLimits, WmsParams,
    WmsRequest, WmsVersion,
};
use crate::resample::{resample, Resampling};
use crate::source::{RasterSource, RasterStats};
use crate::window::{compute_source_window, point_window, BoundingBox, GridSpec, WindowOptions};

/// Output pixels of context rendered around every map for the 3×3 kernel.
const KERNEL_HALO: usize = 1;

/// Rendering configuration, fixed for the lifetime of a [`Renderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub hillshade: HillshadeParams,
    pub default_format: OutputFormat,
    pub resampling: Resampling,
    /// Source pixels read beyond the projected request envelope.
    pub window_padding: f64,
    pub use_overviews: bool,
    /// Gray used for nodata in opaque output.
    pub background: u8,
    pub max_width: u32,
    pub max_height: u32,
    /// Request CRSes accepted besides the source CRS.
    pub extra_crs: Vec<Crs>,
    pub title: String,
    /// Base URL advertised in capabilities; derived per request when unset.
    pub public_url: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            hillshade: HillshadeParams::default(),
            default_format: OutputFormat::Png,
            resampling: Resampling::Bilinear,
            window_padding: 0.5,
            use_overviews: true,
            background: 255,
            max_width: 4096,
            max_height: 4096,
            extra_crs: [Crs::wgs84(), Crs::crs84()]
                .into_iter()
                .chain(Crs::from_epsg(3857).ok())
                .collect(),
            title: "Relief WMS".to_string(),
            public_url: None,
        }
    }
}

/// Pipeline stages of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Validated,
    WindowResolved,
    Read,
    Shaded,
    Encoded,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::WindowResolved => "window_resolved",
            Stage::Read => "read",
            Stage::Shaded => "shaded",
            Stage::Encoded => "encoded",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "Stage transition");
    *stage = next;
}

/// A successful response body.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsResponse {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// A failed request: the error and the last stage it reached.
#[derive(Debug)]
pub struct WmsFailure {
    pub stage: Stage,
    pub operation: Option<Operation>,
    pub error: ReliefError,
}

impl WmsFailure {
    /// 400 for client errors, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.error.is_client_error() {
            400
        } else {
            500
        }
    }

    /// GetFeatureInfo errors are plain text; everything else is XML.
    pub fn content_type(&self) -> &'static str {
        match self.operation {
            Some(Operation::GetFeatureInfo) => "text/plain",
            _ => "application/xml",
        }
    }

    pub fn body(&self) -> String {
        match self.operation {
            Some(Operation::GetFeatureInfo) => format!(
                "{}: {}\n",
                self.error.exception_code().as_str(),
                self.error
            ),
            _ => exception_report(&self.error),
        }
    }
}

impl fmt::Display for WmsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {})", self.error, self.stage)
    }
}

impl std::error::Error for WmsFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A WMS `ServiceExceptionReport` for `err`.
pub fn exception_report(err: &ReliefError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ServiceExceptionReport version="1.3.0" xmlns="http://www.opengis.net/ogc">
  <ServiceException code="{}">{}</ServiceException>
</ServiceExceptionReport>
"#,
        err.exception_code().as_str(),
        escape(&err.to_string())
    )
}

/// Elevation sampled at one full-resolution source pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointSample {
    pub col: usize,
    pub row: usize,
    /// `None` for nodata.
    pub elevation: Option<f32>,
}

/// GetFeatureInfo result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureInfo {
    pub layer: String,
    pub i: u32,
    pub j: u32,
    /// Centre of the queried map pixel in the request CRS.
    pub x: f64,
    pub y: f64,
    pub crs: String,
    /// `None` when the pixel lies outside the raster.
    pub sample: Option<PointSample>,
    /// Illumination in `[0, 1]`, hillshade layer only.
    pub illumination: Option<f32>,
}

impl FeatureInfo {
    pub fn elevation(&self) -> Option<f32> {
        self.sample.and_then(|s| s.elevation)
    }

    pub fn to_text(&self) -> String {
        let mut text = format!(
            "layer: {}\npixel: {},{}\nlocation: {},{} ({})\n",
            self.layer, self.i, self.j, self.x, self.y, self.crs
        );
        if let Some(sample) = self.sample {
            text.push_str(&format!("source pixel: {},{}\n", sample.col, sample.row));
        }
        match self.elevation() {
            Some(z) => text.push_str(&format!("elevation: {}\n", z)),
            None => text.push_str("elevation: nodata\n"),
        }
        if let Some(v) = self.illumination {
            text.push_str(&format!("illumination: {:.4}\n", v));
        }
        text
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ReliefError::Encode {
            message: e.to_string(),
        })
    }
}

/// Drives WMS requests against one raster.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use relief::{RasterSource, RenderConfig, Renderer, WmsParams};
///
/// let source = Arc::new(RasterSource::open("/data/dem_cog.tif")?);
/// let renderer = Renderer::new(source, RenderConfig::default());
///
/// let params = WmsParams::from_pairs([
///     ("service", "WMS"),
///     ("request", "GetMap"),
///     ("layers", "hillshade"),
///     ("crs", "EPSG:3857"),
///     ("bbox", "1100000,6000000,1110000,6010000"),
///     ("width", "256"),
///     ("height", "256"),
/// ]);
/// let response = renderer.handle(&params, "http://localhost:8080/wms")?;
/// ```
#[derive(Debug, Clone)]
pub struct Renderer {
    source: Arc<RasterSource>,
    config: RenderConfig,
    stats: Option<RasterStats>,
    supported_crs: Vec<Crs>,
}

impl Renderer {
    pub fn new(source: Arc<RasterSource>, config: RenderConfig) -> Self {
        let mut supported_crs = vec![*source.crs()];
        for crs in &config.extra_crs {
            if !supported_crs.contains(crs) {
                supported_crs.push(*crs);
            }
        }
        Self {
            source,
            config,
            stats: None,
            supported_crs,
        }
    }

    /// Use `stats` for the elevation layer's gray stretch.
    pub fn with_statistics(mut self, stats: RasterStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn source(&self) -> &RasterSource {
        &self.source
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn statistics(&self) -> Option<&RasterStats> {
        self.stats.as_ref()
    }

    /// Request CRSes accepted, source CRS first.
    pub fn supported_crs(&self) -> &[Crs] {
        &self.supported_crs
    }

    pub fn limits(&self) -> RequestLimits {
        RequestLimits {
            max_width: self.config.max_width,
            max_height: self.config.max_height,
            default_format: self.config.default_format,
            background: self.config.background,
        }
    }

    /// Handle one WMS request given its raw query parameters.
    ///
    /// `base_url` is the endpoint URL used in capabilities when no public URL
    /// is configured.
    pub fn handle(&self, params: &WmsParams, base_url: &str) -> std::result::Result<WmsResponse, WmsFailure> {
        let started = Instant::now();
        let mut stage = Stage::Received;
        let operation = Operation::from_params(params);

        match self.dispatch(params, base_url, &mut stage) {
            Ok(response) => {
                info!(
                    operation = operation.map(|o| o.as_str()).unwrap_or("unknown"),
                    bytes = response.body.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "WMS request served"
                );
                Ok(response)
            }
            Err(error) => {
                let failure = WmsFailure {
                    stage,
                    operation,
                    error,
                };
                if failure.error.is_client_error() {
                    warn!(stage = %failure.stage, code = failure.error.exception_code().as_str(), error = %failure.error, "WMS request rejected");
                } else {
                    error!(stage = %failure.stage, error = %failure.error, "WMS request failed");
                }
                Err(failure)
            }
        }
    }

    fn dispatch(&self, params: &WmsParams, base_url: &str, stage: &mut Stage) -> Result<WmsResponse> {
        let request = WmsRequest::parse(params, &self.limits())?;
        advance(stage, Stage::Validated);

        let response = match request {
            WmsRequest::GetCapabilities { version } => WmsResponse {
                content_type: capabilities::content_type(version),
                body: self.capabilities(version, base_url)?.into_bytes(),
            },
            WmsRequest::GetMap(map) => WmsResponse {
                content_type: map.format.mime_type(),
                body: self.run_map(&map, stage)?,
            },
            WmsRequest::GetFeatureInfo(query) => {
                let info = self.run_feature_info(&query, stage)?;
                let body = match query.info_format {
                    InfoFormat::Text => info.to_text(),
                    InfoFormat::Json => info.to_json()?,
                };
                WmsResponse {
                    content_type: query.info_format.mime_type(),
                    body: body.into_bytes(),
                }
            }
        };

        advance(stage, Stage::Responded);
        Ok(response)
    }

    /// Render and encode a validated GetMap.
    pub fn get_map(&self, request: &MapRequest) -> Result<Vec<u8>> {
        self.run_map(request, &mut Stage::Validated)
    }

    /// Render a validated GetMap up to the shaded grid, without encoding.
    pub fn render(&self, request: &MapRequest) -> Result<ShadedGrid> {
        self.run_render(request, &mut Stage::Validated)
    }

    pub fn get_feature_info(&self, request: &FeatureInfoRequest) -> Result<FeatureInfo> {
        self.run_feature_info(request, &mut Stage::Validated)
    }

    /// The capabilities document for `version`.
    pub fn capabilities(&self, version: WmsVersion, base_url: &str) -> Result<String> {
        let info = ServiceInfo {
            version,
            title: &self.config.title,
            online_resource: self.config.public_url.as_deref().unwrap_or(base_url),
            crs: &self.supported_crs,
            max_width: self.config.max_width,
            max_height: self.config.max_height,
        };
        capabilities_xml(&self.source, &info)
    }

    /// Elevation of the full-resolution pixel containing `(x, y)`.
    ///
    /// Any CRS known to the EPSG database is accepted. Returns `Ok(None)` when
    /// the point is outside the raster.
    pub fn elevation_at(&self, x: f64, y: f64, crs: &Crs) -> Result<Option<PointSample>> {
        let Some(window) = point_window(x, y, crs, &self.source)? else {
            return Ok(None);
        };
        let grid = self.source.read_window(&window)?;
        Ok(Some(PointSample {
            col: window.col_off,
            row: window.row_off,
            elevation: grid.get(0, 0),
        }))
    }

    fn run_map(&self, request: &MapRequest, stage: &mut Stage) -> Result<Vec<u8>> {
        let shaded = self.run_render(request, stage)?;
        let bytes = encode(&shaded, request.format, request.transparent, request.background)?;
        advance(stage, Stage::Encoded);
        Ok(bytes)
    }

    fn run_render(&self, request: &MapRequest, stage: &mut Stage) -> Result<ShadedGrid> {
        check_dimension("width", request.width.into(), self.config.max_width)?;
        check_dimension("height", request.height.into(), self.config.max_height)?;
        self.check_crs(&request.crs)?;
        let options = WindowOptions {
            padding: self.config.window_padding,
            halo: KERNEL_HALO,
            use_overviews: self.config.use_overviews,
        };
        let (width, height) = (request.width as usize, request.height as usize);
        let window = compute_source_window(
            &request.bbox,
            &request.crs,
            width,
            height,
            &self.source,
            &options,
        )?;
        advance(stage, Stage::WindowResolved);

        let raw = self.source.read_window(&window)?;
        let grid = resample(&raw, &window, self.config.resampling);
        advance(stage, Stage::Read);

        let shaded = match request.layer {
            Layer::Hillshade => {
                let (psx, psy) = self.pixel_size(request);
                shade(&grid, &self.config.hillshade, psx, psy)
            }
            Layer::Elevation => {
                let (min, max) = self
                    .stats
                    .map(|s| (s.min, s.max))
                    .or_else(|| grid.value_range().map(|(lo, hi)| (lo as f64, hi as f64)))
                    .unwrap_or((0.0, 0.0));
                stretch(&grid, KERNEL_HALO, min, max)
            }
        };
        advance(stage, Stage::Shaded);

        debug!(
            layer = %request.layer,
            width,
            height,
            valid = shaded.valid_count(),
            "Rendered map"
        );
        Ok(shaded)
    }

    fn run_feature_info(&self, request: &FeatureInfoRequest, stage: &mut Stage) -> Result<FeatureInfo> {
        let map = &request.map;
        self.check_crs(&map.crs)?;

        let grid = GridSpec::new(map.bbox, map.width as usize, map.height as usize);
        let (x, y) = grid.pixel_center(request.i as usize, request.j as usize);
        let sample = self.elevation_at(x, y, &map.crs)?;
        advance(stage, Stage::Read);

        let illumination = match (map.layer, sample.and_then(|s| s.elevation)) {
            (Layer::Hillshade, Some(_)) => {
                // Shade the queried map pixel alone
                let (rx, ry) = grid.resolution();
                let pixel = MapRequest {
                    bbox: BoundingBox::new(x - rx / 2.0, y - ry / 2.0, x + rx / 2.0, y + ry / 2.0),
                    width: 1,
                    height: 1,
                    ..map.clone()
                };
                self.run_render(&pixel, &mut Stage::Validated)?.get(0, 0)
            }
            _ => None,
        };
        advance(stage, Stage::Shaded);

        Ok(FeatureInfo {
            layer: map.layer.name().to_string(),
            i: request.i,
            j: request.j,
            x,
            y,
            crs: map.crs.to_string(),
            sample,
            illumination,
        })
    }

    fn check_crs(&self, crs: &Crs) -> Result<()> {
        if self.supported_crs.contains(crs) {
            Ok(())
        } else {
            Err(ReliefError::crs(format!("{} is not offered by this service", crs)))
        }
    }

    /// Ground size of one output pixel, falling back to CRS units.
    fn pixel_size(&self, request: &MapRequest) -> (f64, f64) {
        let grid = GridSpec::new(request.bbox, request.width as usize, request.height as usize);
        let (rx, ry) = grid.resolution();
        let (cx, cy) = request.bbox.center();
        ground_resolution(&request.crs, cx, cy, rx, ry).unwrap_or((rx, ry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionCode;
    use crate::fixture::CogFixture;
    use approx::assert_abs_diff_eq;
    use image::{DynamicImage, ImageFormat};
    use tempfile::TempDir;

    struct Setup {
        _dir: TempDir,
        renderer: Renderer,
    }

    fn setup(fixture: CogFixture) -> Setup {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dem.tif");
        fixture.write_to(&path).unwrap();
        let source = Arc::new(RasterSource::open(&path).unwrap());
        Setup {
            _dir: dir,
            renderer: Renderer::new(source, RenderConfig::default()),
        }
    }

    fn map_request(bbox: BoundingBox, width: u32, height: u32) -> MapRequest {
        MapRequest {
            version: WmsVersion::V1_3_0,
            layer: Layer::Hillshade,
            crs: Crs::from_epsg(32633).unwrap(),
            bbox,
            width,
            height,
            format: OutputFormat::Png,
            transparent: true,
            background: 255,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> WmsParams {
        WmsParams::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_flat_raster_uniform_illumination() {
        let s = setup(CogFixture::from_fn(128, 128, |_, _| 812.0));
        let request = map_request(BoundingBox::new(10.0, 10.0, 110.0, 110.0), 256, 256);

        let shaded = s.renderer.render(&request).unwrap();
        assert_eq!((shaded.width(), shaded.height()), (256, 256));
        assert_eq!(shaded.valid_count(), 256 * 256);
        let expected = 45.0_f64.to_radians().cos();
        for &v in shaded.values() {
            assert_abs_diff_eq!(v as f64, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_flat_raster_bbox_equal_to_extent() {
        // Nothing lies beyond the bbox to feed the kernel: the border ring stays nodata
        let s = setup(CogFixture::from_fn(100, 100, |_, _| 812.0));
        let request = map_request(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 256, 256);

        let shaded = s.renderer.render(&request).unwrap();
        assert_eq!((shaded.width(), shaded.height()), (256, 256));
        assert_eq!(shaded.valid_count(), 254 * 254);
        let expected = 45.0_f64.to_radians().cos() as f32;
        for row in 0..256 {
            for col in 0..256 {
                let border = col == 0 || row == 0 || col == 255 || row == 255;
                match shaded.get(col, row) {
                    Some(v) => {
                        assert!(!border, "border pixel {},{} was shaded", col, row);
                        assert_abs_diff_eq!(v, expected, epsilon = 1e-5);
                    }
                    None => assert!(border, "interior pixel {},{} is nodata", col, row),
                }
            }
        }
    }

    #[test]
    fn test_bbox_outside_raster_is_transparent() {
        let s = setup(CogFixture::from_fn(64, 64, |_, _| 100.0));
        let request = map_request(BoundingBox::new(1000.0, 1000.0, 1100.0, 1100.0), 40, 30);

        let bytes = s.renderer.get_map(&request).unwrap();
        let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        let DynamicImage::ImageLumaA8(image) = image else {
            panic!("expected gray+alpha");
        };
        assert_eq!(image.dimensions(), (40, 30));
        assert!(image.pixels().all(|p| p.0[1] == 0));
    }

    #[test]
    fn test_bbox_straddling_edge() {
        let s = setup(CogFixture::from_fn(64, 64, |_, _| 500.0));
        // West half lies outside the raster (x < 0)
        let request = map_request(BoundingBox::new(-32.0, 16.0, 32.0, 48.0), 64, 32);

        let shaded = s.renderer.render(&request).unwrap();
        let expected = 45.0_f64.to_radians().cos() as f32;
        for row in 0..32 {
            for col in 0..64 {
                match shaded.get(col, row) {
                    Some(v) => {
                        assert!(col > 32, "pixel {} lies outside the raster", col);
                        assert_abs_diff_eq!(v, expected, epsilon = 1e-5);
                    }
                    None => assert!(col <= 32, "pixel {} inside the raster is nodata", col),
                }
            }
        }
    }

    #[test]
    fn test_render_rejects_out_of_range_size() {
        let s = setup(CogFixture::from_fn(16, 16, |_, _| 1.0));
        let bbox = BoundingBox::new(0.0, 0.0, 16.0, 16.0);

        let err = s.renderer.render(&map_request(bbox, 0, 16)).unwrap_err();
        assert_eq!(err.exception_code(), ExceptionCode::InvalidParameterValue);

        let max = s.renderer.config().max_height;
        let err = s.renderer.get_map(&map_request(bbox, 16, max + 1)).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("HEIGHT"));
    }

    #[test]
    fn test_repeated_requests_identical() {
        let s = setup(CogFixture::from_fn(64, 64, |c, r| ((c * 7 + r * 3) % 50) as f32));
        let request = map_request(BoundingBox::new(3.0, 5.0, 60.0, 58.0), 100, 90);
        let a = s.renderer.get_map(&request).unwrap();
        let b = s.renderer.get_map(&request).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_feature_info_returns_sample() {
        let s = setup(CogFixture::from_fn(32, 32, |c, r| 1000.0 + c as f32 + r as f32 * 0.25));
        // Pixel-aligned window over source columns 4..12, rows 2..10
        let map = map_request(BoundingBox::new(4.0, 22.0, 12.0, 30.0), 8, 8);
        let query = FeatureInfoRequest {
            map,
            i: 0,
            j: 0,
            info_format: InfoFormat::Text,
        };

        let info = s.renderer.get_feature_info(&query).unwrap();
        assert_eq!(info.sample.map(|p| (p.col, p.row)), Some((4, 2)));
        assert_eq!(info.elevation(), Some(1004.5));
        assert!(info.to_text().contains("elevation: 1004.5\n"));
        assert!(info.illumination.is_some());
    }

    #[test]
    fn test_feature_info_outside_raster_is_empty() {
        let s = setup(CogFixture::from_fn(16, 16, |_, _| 1.0));
        let query = FeatureInfoRequest {
            map: map_request(BoundingBox::new(100.0, 100.0, 110.0, 110.0), 10, 10),
            i: 5,
            j: 5,
            info_format: InfoFormat::Json,
        };
        let info = s.renderer.get_feature_info(&query).unwrap();
        assert_eq!(info.sample, None);
        assert_eq!(info.illumination, None);

        let json: serde_json::Value = serde_json::from_str(&info.to_json().unwrap()).unwrap();
        assert!(json["sample"].is_null());
        assert_eq!(json["layer"], "hillshade");
    }

    #[test]
    fn test_handle_malformed_bbox() {
        let s = setup(CogFixture::from_fn(16, 16, |_, _| 1.0));
        let failure = s
            .renderer
            .handle(
                &params(&[
                    ("service", "WMS"),
                    ("request", "GetMap"),
                    ("layers", "hillshade"),
                    ("crs", "EPSG:32633"),
                    ("bbox", "abc,0,10,10"),
                    ("width", "10"),
                    ("height", "10"),
                ]),
                "http://localhost/wms",
            )
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Received);
        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.content_type(), "application/xml");
        let body = failure.body();
        assert!(body.contains(r#"code="InvalidParameterValue""#));
        assert!(body.contains("<ServiceExceptionReport"));
    }

    #[test]
    fn test_handle_unsupported_crs() {
        let s = setup(CogFixture::from_fn(16, 16, |_, _| 1.0));
        let failure = s
            .renderer
            .handle(
                &params(&[
                    ("service", "WMS"),
                    ("request", "GetMap"),
                    ("layers", "hillshade"),
                    ("crs", "EPSG:2056"),
                    ("bbox", "2600000,1200000,2601000,1201000"),
                    ("width", "10"),
                    ("height", "10"),
                ]),
                "http://localhost/wms",
            )
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Validated);
        assert_eq!(failure.error.exception_code(), ExceptionCode::InvalidCrs);
        assert_eq!(failure.status_code(), 400);
    }

    #[test]
    fn test_handle_feature_info_error_is_text() {
        let s = setup(CogFixture::from_fn(16, 16, |_, _| 1.0));
        let failure = s
            .renderer
            .handle(
                &params(&[
                    ("service", "WMS"),
                    ("request", "GetFeatureInfo"),
                    ("query_layers", "hillshade"),
                    ("crs", "EPSG:32633"),
                    ("bbox", "0,0,16,16"),
                    ("width", "16"),
                    ("height", "16"),
                    ("i", "99"),
                    ("j", "0"),
                ]),
                "http://localhost/wms",
            )
            .unwrap_err();
        assert_eq!(failure.content_type(), "text/plain");
        assert!(failure.body().starts_with("InvalidPoint: "));
    }

    #[test]
    fn test_handle_get_map_and_capabilities() {
        let s = setup(CogFixture::from_fn(32, 32, |c, _| c as f32));
        let response = s
            .renderer
            .handle(
                &params(&[
                    ("SERVICE", "WMS"),
                    ("VERSION", "1.3.0"),
                    ("REQUEST", "GetMap"),
                    ("LAYERS", "elevation"),
                    ("STYLES", ""),
                    ("CRS", "EPSG:32633"),
                    ("BBOX", "0,0,32,32"),
                    ("WIDTH", "32"),
                    ("HEIGHT", "32"),
                    ("FORMAT", "image/jpeg"),
                ]),
                "http://localhost/wms",
            )
            .unwrap();
        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(&response.body[..2], &[0xFF, 0xD8]);

        let response = s
            .renderer
            .handle(
                &params(&[("service", "WMS"), ("request", "GetCapabilities")]),
                "http://localhost/wms",
            )
            .unwrap();
        assert_eq!(response.content_type, "text/xml");
        let xml = String::from_utf8(response.body).unwrap();
        assert!(xml.contains("<Name>hillshade</Name>"));
        assert!(xml.contains(r#"xlink:href="http://localhost/wms?""#));

        let response = s
            .renderer
            .handle(
                &params(&[("service", "WMS"), ("request", "GetCapabilities"), ("version", "1.1.1")]),
                "http://localhost/wms",
            )
            .unwrap();
        assert_eq!(response.content_type, "application/vnd.ogc.wms_xml");
        let xml = String::from_utf8(response.body).unwrap();
        assert!(xml.contains("<SRS>EPSG:32633</SRS>"));
    }

    #[test]
    fn test_elevation_layer_uses_statistics() {
        let s = setup(CogFixture::from_fn(32, 32, |c, _| c as f32 * 10.0));
        let stats = s.renderer.source().statistics(0, |_, _| {}).unwrap();
        let renderer = s.renderer.clone().with_statistics(stats);

        let request = MapRequest {
            layer: Layer::Elevation,
            ..map_request(BoundingBox::new(0.0, 0.0, 32.0, 32.0), 32, 32)
        };
        let grid = renderer.render(&request).unwrap();
        assert_abs_diff_eq!(grid.get(0, 5).unwrap(), 0.0);
        assert_abs_diff_eq!(grid.get(31, 5).unwrap(), 1.0);
        assert_abs_diff_eq!(grid.get(16, 5).unwrap(), 160.0 / 310.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reprojected_request() {
        // 0.001° pixels around lon 14.0..14.064, lat 51.936..52.0
        let s = setup(
            CogFixture::from_fn(64, 64, |c, r| 200.0 + (c + r) as f32)
                .origin(14.0, 52.0)
                .pixel_size(0.001, 0.001)
                .epsg(4326),
        );
        let mercator = Crs::from_epsg(3857).unwrap();
        let inner = crate::crs::project_bbox(
            &BoundingBox::new(14.01, 51.95, 14.05, 51.99),
            &Crs::wgs84(),
            &mercator,
        )
        .unwrap();
        let request = MapRequest {
            crs: mercator,
            ..map_request(inner, 48, 48)
        };
        let shaded = s.renderer.render(&request).unwrap();
        assert_eq!(shaded.valid_count(), 48 * 48);
    }

    #[test]
    fn test_exception_report_escapes() {
        let xml = exception_report(&ReliefError::invalid("BBOX <bad> & worse"));
        assert!(xml.contains("BBOX &lt;bad&gt; &amp; worse"));
    }
}
