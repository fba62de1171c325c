//! Service configuration from environment variables.

use std::path::PathBuf;

use relief::{Crs, HillshadeParams, OutputFormat, RenderConfig, Resampling};
use thiserror::Error;

/// Errors raised while reading the environment at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable {0} is required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the service reads from the environment, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub raster_path: PathBuf,
    pub port: u16,
    /// CRS to assume when the raster declares none.
    pub source_crs: Option<Crs>,
    pub render: RenderConfig,
}

impl ServiceConfig {
    /// Read the `RELIEF_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value
    /// or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let raster_path = var("RELIEF_RASTER_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("RELIEF_RASTER_PATH"))?;

        let defaults = RenderConfig::default();
        let hillshade = HillshadeParams {
            azimuth: parse_or(var("RELIEF_SUN_AZIMUTH"), "RELIEF_SUN_AZIMUTH", defaults.hillshade.azimuth)?,
            altitude: parse_or(var("RELIEF_SUN_ALTITUDE"), "RELIEF_SUN_ALTITUDE", defaults.hillshade.altitude)?,
            z_factor: parse_or(var("RELIEF_Z_FACTOR"), "RELIEF_Z_FACTOR", defaults.hillshade.z_factor)?,
        };
        if !(0.0..=90.0).contains(&hillshade.altitude) {
            return Err(invalid(
                "RELIEF_SUN_ALTITUDE",
                hillshade.altitude,
                "must be between 0 and 90 degrees",
            ));
        }

        let window_padding: f64 =
            parse_or(var("RELIEF_WINDOW_PADDING"), "RELIEF_WINDOW_PADDING", defaults.window_padding)?;
        if !(window_padding >= 0.0) {
            return Err(invalid("RELIEF_WINDOW_PADDING", window_padding, "must not be negative"));
        }

        let max_size: u32 = parse_or(var("RELIEF_MAX_SIZE"), "RELIEF_MAX_SIZE", defaults.max_width)?;
        if max_size == 0 {
            return Err(invalid("RELIEF_MAX_SIZE", max_size, "must be positive"));
        }

        let mut extra_crs = defaults.extra_crs.clone();
        if let Some(list) = var("RELIEF_EXTRA_CRS") {
            for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let crs = Crs::parse(name).map_err(|e| invalid("RELIEF_EXTRA_CRS", name, e))?;
                if !extra_crs.contains(&crs) {
                    extra_crs.push(crs);
                }
            }
        }

        let source_crs = var("RELIEF_SOURCE_CRS")
            .map(|v| Crs::parse(&v).map_err(|e| invalid("RELIEF_SOURCE_CRS", &v, e)))
            .transpose()?;

        let render = RenderConfig {
            hillshade,
            default_format: parse_or(var("RELIEF_DEFAULT_FORMAT"), "RELIEF_DEFAULT_FORMAT", defaults.default_format)?,
            resampling: parse_or(var("RELIEF_RESAMPLING"), "RELIEF_RESAMPLING", defaults.resampling)?,
            window_padding,
            use_overviews: match var("RELIEF_USE_OVERVIEWS") {
                Some(v) => parse_bool(&v).ok_or_else(|| invalid("RELIEF_USE_OVERVIEWS", &v, "expected true or false"))?,
                None => defaults.use_overviews,
            },
            background: parse_or(var("RELIEF_BACKGROUND"), "RELIEF_BACKGROUND", defaults.background)?,
            max_width: max_size,
            max_height: max_size,
            extra_crs,
            public_url: var("RELIEF_PUBLIC_URL").map(|u| u.trim_end_matches('?').to_string()),
            ..defaults
        };

        Ok(Self {
            raster_path,
            port: parse_or(var("RELIEF_PORT"), "RELIEF_PORT", 8080)?,
            source_crs,
            render,
        })
    }
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e| invalid(name, &v, e)),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
