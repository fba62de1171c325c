//! Integration tests for the HTTP API.

use axum::http::StatusCode;
use axum_test::TestServer;
use image::{DynamicImage, ImageFormat};
use relief::fixture::CogFixture;
use relief::{RasterSource, RenderConfig, Renderer};
use relief_service::{router, AppState};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

const ORIGIN_X: f64 = 600_000.0;
const ORIGIN_Y: f64 = 5_200_000.0;
const PIXEL: f64 = 10.0;
const SIZE: usize = 64;

/// Elevation of source pixel `(col, row)` in the test raster.
fn elevation(col: usize, row: usize) -> f32 {
    100.0 + col as f32 * 2.0 + row as f32
}

/// Full extent of the test raster as a BBOX value.
fn full_bbox() -> String {
    let span = SIZE as f64 * PIXEL;
    format!("{},{},{},{}", ORIGIN_X, ORIGIN_Y - span, ORIGIN_X + span, ORIGIN_Y)
}

/// Create a test server over a 64×64 UTM raster with 10 m pixels.
fn create_test_server(temp_dir: &TempDir) -> TestServer {
    let path = temp_dir.path().join("dem.tif");
    CogFixture::from_fn(SIZE, SIZE, elevation)
        .origin(ORIGIN_X, ORIGIN_Y)
        .pixel_size(PIXEL, PIXEL)
        .with_overview()
        .write_to(&path)
        .unwrap();

    let source = Arc::new(RasterSource::open(&path).unwrap());
    let stats = source.statistics(source.coarsest_level(), |_, _| {}).unwrap();
    let renderer = Renderer::new(source, RenderConfig::default()).with_statistics(stats);

    TestServer::new(router(Arc::new(AppState::new(renderer)))).unwrap()
}

fn get_map_url(extra: &str) -> String {
    format!(
        "/wms?SERVICE=WMS&VERSION=1.3.0&REQUEST=GetMap&LAYERS=hillshade&STYLES=&CRS=EPSG:32633&BBOX={}&WIDTH=128&HEIGHT=96&FORMAT=image/png{}",
        full_bbox(),
        extra
    )
}

fn content_type(response: &axum_test::TestResponse) -> String {
    response
        .header("content-type")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_get_capabilities() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/wms?service=WMS&request=GetCapabilities").await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "text/xml");

    let xml = response.text();
    assert!(xml.contains(r#"<WMS_Capabilities version="1.3.0""#));
    assert!(xml.contains("<Name>hillshade</Name>"));
    assert!(xml.contains("<Name>elevation</Name>"));
    assert!(xml.contains("<CRS>EPSG:32633</CRS>"));
    assert!(xml.contains("<CRS>EPSG:3857</CRS>"));
}

#[tokio::test]
async fn test_get_capabilities_1_1_1() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server
        .get("/wms?service=WMS&version=1.1.1&request=GetCapabilities")
        .await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "application/vnd.ogc.wms_xml");

    let xml = response.text();
    assert!(xml.contains(r#"<WMT_MS_Capabilities version="1.1.1""#));
    assert!(xml.contains("<SRS>EPSG:32633</SRS>"));
    assert!(xml.contains("<LatLonBoundingBox "));
}

#[tokio::test]
async fn test_get_map_png() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get(&get_map_url("")).await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "image/png");

    let image = image::load_from_memory_with_format(response.as_bytes(), ImageFormat::Png).unwrap();
    assert_eq!((image.width(), image.height()), (128, 96));
}

#[tokio::test]
async fn test_get_map_jpeg() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = get_map_url("").replace("FORMAT=image/png", "FORMAT=image/jpeg");
    let response = server.get(&url).await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "image/jpeg");
    assert_eq!(&response.as_bytes()[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_get_map_is_repeatable() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let first = server.get(&get_map_url("&TRANSPARENT=TRUE")).await;
    let second = server.get(&get_map_url("&TRANSPARENT=TRUE")).await;
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[tokio::test]
async fn test_get_map_outside_raster_is_transparent() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = "/wms?SERVICE=WMS&REQUEST=GetMap&LAYERS=hillshade&CRS=EPSG:32633\
               &BBOX=700000,5300000,701000,5301000&WIDTH=32&HEIGHT=16&TRANSPARENT=TRUE";
    let response = server.get(url).await;
    response.assert_status_ok();

    let image = image::load_from_memory_with_format(response.as_bytes(), ImageFormat::Png).unwrap();
    let DynamicImage::ImageLumaA8(image) = image else {
        panic!("expected gray+alpha");
    };
    assert_eq!(image.dimensions(), (32, 16));
    assert!(image.pixels().all(|p| p.0[1] == 0));
}

#[tokio::test]
async fn test_get_map_malformed_bbox() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = "/wms?SERVICE=WMS&REQUEST=GetMap&LAYERS=hillshade&CRS=EPSG:32633\
               &BBOX=abc&WIDTH=32&HEIGHT=32";
    let response = server.get(url).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(content_type(&response), "application/xml");

    let body = response.text();
    assert!(body.contains("<ServiceExceptionReport"));
    assert!(body.contains(r#"code="InvalidParameterValue""#));
}

#[tokio::test]
async fn test_missing_parameter() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = "/wms?SERVICE=WMS&REQUEST=GetMap&LAYERS=hillshade&CRS=EPSG:32633&WIDTH=32&HEIGHT=32";
    let response = server.get(url).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"code="MissingParameterValue""#));
}

#[tokio::test]
async fn test_unknown_request() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/wms?SERVICE=WMS&REQUEST=GetLegendGraphic").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"code="OperationNotSupported""#));
}

#[tokio::test]
async fn test_unknown_layer_and_crs() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get(&get_map_url("").replace("LAYERS=hillshade", "LAYERS=slope")).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"code="LayerNotDefined""#));

    let response = server
        .get(&get_map_url("").replace("CRS=EPSG:32633", "CRS=EPSG:99999999"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#"code="InvalidCRS""#));
}

#[tokio::test]
async fn test_get_feature_info_text() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    // One map pixel per source pixel
    let url = format!(
        "/wms?SERVICE=WMS&REQUEST=GetFeatureInfo&QUERY_LAYERS=hillshade&LAYERS=hillshade\
         &CRS=EPSG:32633&BBOX={}&WIDTH=64&HEIGHT=64&I=3&J=5",
        full_bbox()
    );
    let response = server.get(&url).await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "text/plain");

    let text = response.text();
    assert!(text.contains(&format!("elevation: {}\n", elevation(3, 5))), "{}", text);
    assert!(text.contains("source pixel: 3,5\n"), "{}", text);
}

#[tokio::test]
async fn test_get_feature_info_json() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = format!(
        "/wms?SERVICE=WMS&REQUEST=GetFeatureInfo&QUERY_LAYERS=elevation\
         &CRS=EPSG:32633&BBOX={}&WIDTH=64&HEIGHT=64&I=10&J=20&INFO_FORMAT=application/json",
        full_bbox()
    );
    let response = server.get(&url).await;
    response.assert_status_ok();
    assert_eq!(content_type(&response), "application/json");

    let json: Value = response.json();
    assert_eq!(json["layer"], "elevation");
    assert_eq!(json["sample"]["col"], 10);
    assert_eq!(json["sample"]["row"], 20);
    assert_eq!(json["sample"]["elevation"], elevation(10, 20) as f64);
    assert!(json["illumination"].is_null());
}

#[tokio::test]
async fn test_get_feature_info_invalid_point() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let url = format!(
        "/wms?SERVICE=WMS&REQUEST=GetFeatureInfo&QUERY_LAYERS=hillshade\
         &CRS=EPSG:32633&BBOX={}&WIDTH=64&HEIGHT=64&I=64&J=0",
        full_bbox()
    );
    let response = server.get(&url).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(content_type(&response), "text/plain");
    assert!(response.text().starts_with("InvalidPoint"));
}

#[tokio::test]
async fn test_status_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/api/status").await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["service"], "relief-service");
    assert!(json["started_at"].as_str().is_some());
    assert!(json["cpu_count"].as_u64().unwrap() >= 1);
    assert_eq!(json["raster"]["width"], 64);
    assert_eq!(json["raster"]["crs"], "EPSG:32633");
    assert_eq!(json["raster"]["overviews"], 1);
    assert!(json["raster"]["min_elevation"].is_number());
}

#[tokio::test]
async fn test_openapi_documents_status_fields() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/api-docs/openapi.json").await;
    response.assert_status_ok();

    let json: Value = response.json();
    let schemas = &json["components"]["schemas"];
    let status = &schemas["StatusResponse"]["properties"];
    for field in ["service", "version", "started_at", "uptime_seconds", "cpu_count"] {
        assert!(status[field]["description"].is_string(), "StatusResponse.{} undocumented", field);
    }
    let raster = &schemas["RasterSummary"]["properties"];
    for field in ["path", "width", "height", "crs", "resolution", "overviews", "nodata"] {
        assert!(raster[field]["description"].is_string(), "RasterSummary.{} undocumented", field);
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].as_str().is_some());
}
