//! HTTP request handlers for the WMS service.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use relief::{render::exception_report, ReliefError, WmsFailure, WmsParams};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Service status response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// Seconds since startup.
    pub uptime_seconds: u64,
    /// Logical CPUs available to the process.
    pub cpu_count: usize,
    /// The served raster.
    pub raster: RasterSummary,
}

/// The served raster.
#[derive(Debug, Serialize, ToSchema)]
pub struct RasterSummary {
    /// Path of the COG on disk.
    pub path: String,
    /// Full-resolution width in pixels.
    pub width: usize,
    /// Full-resolution height in pixels.
    pub height: usize,
    /// Source CRS, e.g. `EPSG:32633`.
    pub crs: String,
    /// Pixel width and height in CRS units.
    pub resolution: [f64; 2],
    /// Number of reduced-resolution overviews.
    pub overviews: usize,
    /// No-data value declared by the raster.
    pub nodata: Option<f64>,
    /// Lowest elevation, used to stretch the `elevation` layer.
    pub min_elevation: Option<f64>,
    /// Highest elevation, used to stretch the `elevation` layer.
    pub max_elevation: Option<f64>,
}

/// WMS 1.3.0 endpoint.
///
/// Dispatches on `REQUEST` to GetCapabilities, GetMap or GetFeatureInfo.
/// Parameter names are case-insensitive. Rendering runs on the blocking pool.
///
/// # Returns
///
/// - `200 OK` with the capabilities XML, the map image or the feature info
/// - `400 Bad Request` with a WMS exception report for invalid requests
/// - `500 Internal Server Error` with a WMS exception report on read or encode faults
#[utoipa::path(
    get,
    path = "/wms",
    tag = "wms",
    params(
        ("SERVICE" = String, Query, description = "Must be WMS"),
        ("REQUEST" = String, Query, description = "GetCapabilities, GetMap or GetFeatureInfo"),
        ("VERSION" = Option<String>, Query, description = "1.3.0 (default) or 1.1.1"),
        ("LAYERS" = Option<String>, Query, description = "hillshade or elevation"),
        ("CRS" = Option<String>, Query, description = "Request CRS, e.g. EPSG:3857"),
        ("BBOX" = Option<String>, Query, description = "minx,miny,maxx,maxy in CRS axis order"),
        ("WIDTH" = Option<u32>, Query, description = "Output width in pixels"),
        ("HEIGHT" = Option<u32>, Query, description = "Output height in pixels"),
        ("FORMAT" = Option<String>, Query, description = "image/png or image/jpeg"),
        ("TRANSPARENT" = Option<String>, Query, description = "TRUE for transparent nodata"),
    ),
    responses(
        (status = 200, description = "Capabilities document, map image or feature info"),
        (status = 400, description = "WMS exception report"),
        (status = 500, description = "WMS exception report")
    )
)]
pub async fn wms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = WmsParams::from_pairs(pairs);
    let base_url = base_url(&headers);

    let task_state = Arc::clone(&state);
    let result =
        tokio::task::spawn_blocking(move || task_state.renderer.handle(&params, &base_url)).await;

    match result {
        Ok(Ok(response)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response(),
        Ok(Err(failure)) => failure_response(&failure),
        Err(e) => {
            tracing::error!(error = %e, "Render task failed");
            let err = ReliefError::Read {
                message: format!("render task failed: {}", e),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/xml")],
                exception_report(&err),
            )
                .into_response()
        }
    }
}

fn failure_response(failure: &WmsFailure) -> Response {
    let status = StatusCode::from_u16(failure.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, failure.content_type())],
        failure.body(),
    )
        .into_response()
}

/// Endpoint URL as seen by the client.
fn base_url(headers: &HeaderMap) -> String {
    let header_str = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    let host = header_str(header::HOST).unwrap_or("localhost");
    let scheme = header_str(header::HeaderName::from_static("x-forwarded-proto")).unwrap_or("http");
    format!("{}://{}/wms", scheme, host)
}

/// Service status.
///
/// Returns uptime, host CPU count and a summary of the served raster.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    responses((status = 200, description = "Service status", body = StatusResponse))
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let renderer = &state.renderer;
    let source = renderer.source();
    let (res_x, res_y) = source.resolution();
    let stats = renderer.statistics();

    Json(StatusResponse {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at.to_rfc3339(),
        uptime_seconds: state.uptime_seconds(),
        cpu_count: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        raster: RasterSummary {
            path: source.path().display().to_string(),
            width: source.width(),
            height: source.height(),
            crs: source.crs().to_string(),
            resolution: [res_x, res_y],
            overviews: source.levels().len().saturating_sub(1),
            nodata: source.nodata(),
            min_elevation: stats.map(|s| s.min),
            max_elevation: stats.map(|s| s.max),
        },
    })
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_base_url_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(base_url(&headers), "http://localhost/wms");

        headers.insert(header::HOST, HeaderValue::from_static("maps.example.com:8080"));
        assert_eq!(base_url(&headers), "http://maps.example.com:8080/wms");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(base_url(&headers), "https://maps.example.com:8080/wms");
    }

    #[test]
    fn test_health_response_serialize() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }

    #[test]
    fn test_raster_summary_serialize() {
        let summary = RasterSummary {
            path: "/data/dem.tif".to_string(),
            width: 1024,
            height: 512,
            crs: "EPSG:32633".to_string(),
            resolution: [10.0, 10.0],
            overviews: 2,
            nodata: None,
            min_elevation: Some(12.5),
            max_elevation: Some(2100.0),
        };
        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["crs"], "EPSG:32633");
        assert_eq!(json["overviews"], 2);
        assert!(json["nodata"].is_null());
        assert_eq!(json["max_elevation"], 2100.0);
    }
}
