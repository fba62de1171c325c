//! Relief Service Library
//!
//! HTTP handlers, configuration and router for the hillshade WMS.
//! This library is used by both the relief-service binary and integration tests.

pub mod config;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use relief::Renderer;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
pub struct AppState {
    /// Renderer over the shared raster.
    pub renderer: Renderer,
    /// Wall-clock start time, reported by `/api/status`.
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// OpenAPI documentation for the relief service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Relief WMS",
        version = "0.1.0",
        description = "OGC WMS 1.3.0 service rendering shaded relief on demand from a Cloud-Optimized GeoTIFF.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Pedro Sanz Martinez", url = "https://github.com/pedrosanzmtz/relief")
    ),
    paths(handlers::wms, handlers::status, handlers::health_check),
    components(schemas(
        handlers::HealthResponse,
        handlers::StatusResponse,
        handlers::RasterSummary,
    )),
    tags(
        (name = "wms", description = "OGC Web Map Service endpoint"),
        (name = "system", description = "System and health endpoints")
    )
)]
pub struct ApiDoc;

/// Build the service router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/wms", get(handlers::wms))
        .route("/api/status", get(handlers::status))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use config::{ConfigError, ServiceConfig};
pub use handlers::{HealthResponse, RasterSummary, StatusResponse};
