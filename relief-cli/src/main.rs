use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Hillshade rendering and elevation COG inspection tool
#[derive(Parser)]
#[command(name = "relief")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Elevation Cloud-Optimized GeoTIFF
    #[arg(short, long, env = "RELIEF_RASTER_PATH", global = true)]
    raster: Option<PathBuf>,

    /// CRS to assume when the raster declares none (e.g. EPSG:32633)
    #[arg(long, env = "RELIEF_SOURCE_CRS", global = true)]
    source_crs: Option<String>,

    /// Log pipeline details to stderr (filter with RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display metadata, overview levels and elevation statistics
    Info {
        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Render a map to an image file
    Render {
        /// Map extent as minx,miny,maxx,maxy (x/easting first)
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,

        /// CRS of the bounding box
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,

        /// Output width in pixels
        #[arg(long, default_value = "512")]
        width: u32,

        /// Output height in pixels
        #[arg(long, default_value = "512")]
        height: u32,

        /// Layer to render: hillshade or elevation
        #[arg(short, long, default_value = "hillshade")]
        layer: String,

        /// Image format (defaults to the output file extension)
        #[arg(short, long)]
        format: Option<String>,

        /// Make nodata transparent (PNG only)
        #[arg(short, long)]
        transparent: bool,

        /// Sun azimuth in degrees clockwise from north
        #[arg(long, default_value = "315")]
        azimuth: f64,

        /// Sun altitude in degrees above the horizon
        #[arg(long, default_value = "45")]
        altitude: f64,

        /// Vertical exaggeration
        #[arg(short, long, default_value = "1")]
        z_factor: f64,

        /// Resampling method: bilinear or nearest
        #[arg(long, default_value = "bilinear")]
        resampling: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Query elevation at a single coordinate
    Query {
        /// X coordinate (longitude or easting)
        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        /// Y coordinate (latitude or northing)
        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// CRS of the coordinate
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "relief=debug".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let raster = commands::RasterArgs {
        path: cli.raster,
        source_crs: cli.source_crs,
    };

    match cli.command {
        Commands::Info { json } => commands::info::run(&raster, json),
        Commands::Render {
            bbox,
            crs,
            width,
            height,
            layer,
            format,
            transparent,
            azimuth,
            altitude,
            z_factor,
            resampling,
            output,
        } => commands::render::run(
            &raster,
            commands::render::RenderArgs {
                bbox,
                crs,
                width,
                height,
                layer,
                format,
                transparent,
                azimuth,
                altitude,
                z_factor,
                resampling,
                output,
            },
        ),
        Commands::Query { x, y, crs, json } => commands::query::run(&raster, x, y, &crs, json),
    }
}
