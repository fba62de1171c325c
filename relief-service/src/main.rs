//! Relief Service - OGC WMS 1.3.0 hillshade server.
//!
//! Renders shaded relief on demand from a single Cloud-Optimized GeoTIFF.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RELIEF_RASTER_PATH` | Elevation COG to serve | Required |
//! | `RELIEF_PORT` | HTTP server port | 8080 |
//! | `RELIEF_SUN_AZIMUTH` | Sun azimuth, degrees clockwise from north | 315 |
//! | `RELIEF_SUN_ALTITUDE` | Sun altitude, degrees above the horizon | 45 |
//! | `RELIEF_Z_FACTOR` | Vertical exaggeration | 1 |
//! | `RELIEF_DEFAULT_FORMAT` | `image/png` or `image/jpeg` | `image/png` |
//! | `RELIEF_RESAMPLING` | `bilinear` or `nearest` | `bilinear` |
//! | `RELIEF_WINDOW_PADDING` | Extra source pixels read around each window | 0.5 |
//! | `RELIEF_USE_OVERVIEWS` | Read COG overviews for zoomed-out maps | true |
//! | `RELIEF_BACKGROUND` | Gray for nodata in opaque images | 255 |
//! | `RELIEF_MAX_SIZE` | Maximum WIDTH/HEIGHT | 4096 |
//! | `RELIEF_EXTRA_CRS` | Comma-separated extra request CRSes | None |
//! | `RELIEF_SOURCE_CRS` | CRS for rasters without an EPSG code | None |
//! | `RELIEF_PUBLIC_URL` | Endpoint URL advertised in capabilities | From `Host` |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `GET /wms?SERVICE=WMS&REQUEST=...` - GetCapabilities, GetMap, GetFeatureInfo
//! - `GET /api/status` - Uptime and raster summary
//! - `GET /health` - Health check
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use relief::{RasterSource, Renderer};
use relief_service::{router, AppState, ServiceConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relief_service=info,relief=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;

    // A raster that cannot be opened is fatal before the listener binds
    let source = RasterSource::open_with_crs(&config.raster_path, config.source_crs)?;
    let coarsest = source.coarsest_level();
    let stats = source.statistics(coarsest, |_, _| {})?;

    tracing::info!(
        raster = %config.raster_path.display(),
        width = source.width(),
        height = source.height(),
        crs = %source.crs(),
        overviews = source.levels().len().saturating_sub(1),
        min_elevation = stats.min,
        max_elevation = stats.max,
        port = config.port,
        "Starting relief service"
    );

    let renderer = Renderer::new(Arc::new(source), config.render).with_statistics(stats);
    let supported: Vec<String> = renderer.supported_crs().iter().map(|c| c.to_string()).collect();
    tracing::info!(crs = ?supported, "Offered CRSes");

    let app = router(Arc::new(AppState::new(renderer)));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
