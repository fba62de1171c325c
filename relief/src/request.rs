//! WMS request parsing and validation.
//!
//! Raw query pairs go in, a strongly typed [`WmsRequest`] comes out. Anything
//! that does not conform is rejected here with the matching WMS exception
//! code, before the rendering pipeline sees it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::crs::Crs;
use crate::encode::OutputFormat;
use crate::error::{ExceptionCode, ReliefError, Result};
use crate::window::BoundingBox;

/// Query parameters with case-insensitive names.
#[derive(Debug, Clone, Default)]
pub struct WmsParams {
    values: HashMap<String, String>,
}

impl WmsParams {
    /// Build from name/value pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        Self { values }
    }

    /// Trimmed value of `name`, treating an empty value as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| ReliefError::missing(name))
    }

    /// The first of `names` that is present.
    fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.get(n))
    }
}

/// Supported protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WmsVersion {
    V1_1_1,
    #[default]
    V1_3_0,
}

impl WmsVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            WmsVersion::V1_1_1 => "1.1.1",
            WmsVersion::V1_3_0 => "1.3.0",
        }
    }

    /// Query parameter carrying the CRS.
    fn crs_param(&self) -> &'static str {
        match self {
            WmsVersion::V1_1_1 => "srs",
            WmsVersion::V1_3_0 => "crs",
        }
    }
}

impl FromStr for WmsVersion {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.3.0" => Ok(WmsVersion::V1_3_0),
            "1.1.1" => Ok(WmsVersion::V1_1_1),
            other => Err(ReliefError::invalid(format!(
                "Unsupported WMS version: {} (supported: 1.3.0, 1.1.1)",
                other
            ))),
        }
    }
}

/// The `REQUEST` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetCapabilities,
    GetMap,
    GetFeatureInfo,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetCapabilities => "GetCapabilities",
            Operation::GetMap => "GetMap",
            Operation::GetFeatureInfo => "GetFeatureInfo",
        }
    }

    /// The operation named in `params`, if it is one we know.
    pub fn from_params(params: &WmsParams) -> Option<Self> {
        params.get("request").and_then(|r| r.parse().ok())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "getcapabilities" | "capabilities" => Ok(Operation::GetCapabilities),
            "getmap" | "map" => Ok(Operation::GetMap),
            "getfeatureinfo" => Ok(Operation::GetFeatureInfo),
            _ => Err(ReliefError::parameter(
                ExceptionCode::OperationNotSupported,
                format!("Unsupported request: {}", s),
            )),
        }
    }
}

/// Layers served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Hillshade,
    /// Raw elevation stretched to gray.
    Elevation,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Hillshade, Layer::Elevation];

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Hillshade => "hillshade",
            Layer::Elevation => "elevation",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Layer::Hillshade => "Hillshade",
            Layer::Elevation => "Elevation",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Layer {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self> {
        Layer::ALL
            .into_iter()
            .find(|l| l.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ReliefError::parameter(
                    ExceptionCode::LayerNotDefined,
                    format!("Layer not defined: {}", s),
                )
            })
    }
}

/// `INFO_FORMAT` for GetFeatureInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfoFormat {
    #[default]
    Text,
    Json,
}

impl InfoFormat {
    pub const ALL: [InfoFormat; 2] = [InfoFormat::Text, InfoFormat::Json];

    pub fn mime_type(&self) -> &'static str {
        match self {
            InfoFormat::Text => "text/plain",
            InfoFormat::Json => "application/json",
        }
    }
}

impl FromStr for InfoFormat {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "text/plain" => Ok(InfoFormat::Text),
            "application/json" => Ok(InfoFormat::Json),
            _ => Err(ReliefError::parameter(
                ExceptionCode::InvalidFormat,
                format!("Unsupported INFO_FORMAT: {}", s),
            )),
        }
    }
}

/// Limits and defaults applied while validating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub default_format: OutputFormat,
    pub background: u8,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            default_format: OutputFormat::Png,
            background: 255,
        }
    }
}

/// A validated GetMap.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRequest {
    pub version: WmsVersion,
    pub layer: Layer,
    pub crs: Crs,
    /// Always x/y (easting/longitude first), whatever the wire order was.
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub transparent: bool,
    pub background: u8,
}

/// A validated GetFeatureInfo.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureInfoRequest {
    pub map: MapRequest,
    /// Queried column in the map.
    pub i: u32,
    /// Queried row in the map.
    pub j: u32,
    pub info_format: InfoFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WmsRequest {
    GetCapabilities { version: WmsVersion },
    GetMap(MapRequest),
    GetFeatureInfo(FeatureInfoRequest),
}

impl WmsRequest {
    /// Validate `params` into a typed request.
    ///
    /// # Errors
    ///
    /// [`ReliefError::Parameter`] for missing, malformed or unsupported
    /// parameters; [`ReliefError::Crs`] for an unparseable CRS.
    pub fn parse(params: &WmsParams, limits: &RequestLimits) -> Result<Self> {
        let service = params.required("service")?;
        if !service.eq_ignore_ascii_case("WMS") {
            return Err(ReliefError::invalid(format!(
                "Unsupported service: {} (expected WMS)",
                service
            )));
        }
        let operation: Operation = params.required("request")?.parse()?;
        let version = match params.first_of(&["version", "wmtver"]) {
            Some(v) => v.parse()?,
            None => WmsVersion::default(),
        };

        match operation {
            Operation::GetCapabilities => Ok(WmsRequest::GetCapabilities { version }),
            Operation::GetMap => {
                let layer = parse_single_layer(params.required("layers")?)?;
                parse_map(params, version, layer, limits).map(WmsRequest::GetMap)
            }
            Operation::GetFeatureInfo => {
                let layer = parse_single_layer(params.required("query_layers")?)?;
                let map = parse_map(params, version, layer, limits)?;
                let (i_name, j_name) = match version {
                    WmsVersion::V1_3_0 => (["i", "x"], ["j", "y"]),
                    WmsVersion::V1_1_1 => (["x", "i"], ["y", "j"]),
                };
                let i = parse_point(params, &i_name, map.width)?;
                let j = parse_point(params, &j_name, map.height)?;
                let info_format = match params.get("info_format") {
                    Some(f) => f.parse()?,
                    None => InfoFormat::default(),
                };
                Ok(WmsRequest::GetFeatureInfo(FeatureInfoRequest {
                    map,
                    i,
                    j,
                    info_format,
                }))
            }
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            WmsRequest::GetCapabilities { .. } => Operation::GetCapabilities,
            WmsRequest::GetMap(_) => Operation::GetMap,
            WmsRequest::GetFeatureInfo(_) => Operation::GetFeatureInfo,
        }
    }
}

fn parse_map(
    params: &WmsParams,
    version: WmsVersion,
    layer: Layer,
    limits: &RequestLimits,
) -> Result<MapRequest> {
    if let Some(styles) = params.get("styles") {
        for style in styles.split(',').map(str::trim) {
            if !style.is_empty() && !style.eq_ignore_ascii_case("default") {
                return Err(ReliefError::parameter(
                    ExceptionCode::StyleNotDefined,
                    format!("Style not defined: {}", style),
                ));
            }
        }
    }

    let crs_name = params
        .first_of(&[version.crs_param(), "crs", "srs"])
        .ok_or_else(|| ReliefError::missing(version.crs_param()))?;
    let crs = Crs::parse(crs_name)?;

    let raw = parse_bbox(params.required("bbox")?)?;
    let bbox = if version == WmsVersion::V1_3_0 && crs.is_geographic() && !crs.is_crs84() {
        // 1.3.0 EPSG geographic axis order is latitude first
        BoundingBox::new(raw.min_y, raw.min_x, raw.max_y, raw.max_x)
    } else {
        raw
    };

    let width = parse_dimension(params, "width", limits.max_width)?;
    let height = parse_dimension(params, "height", limits.max_height)?;

    let format = match params.get("format") {
        Some(f) => f.parse()?,
        None => limits.default_format,
    };

    let transparent = match params.get("transparent") {
        Some(v) => parse_bool(v)
            .ok_or_else(|| ReliefError::invalid(format!("TRANSPARENT must be TRUE or FALSE, got {}", v)))?,
        None => false,
    };

    let background = match params.get("bgcolor") {
        Some(v) => parse_bgcolor(v)?,
        None => limits.background,
    };

    Ok(MapRequest {
        version,
        layer,
        crs,
        bbox,
        width,
        height,
        format,
        transparent,
        background,
    })
}

fn parse_single_layer(value: &str) -> Result<Layer> {
    let names: Vec<&str> = value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    match names.as_slice() {
        [one] => one.parse(),
        [] => Err(ReliefError::missing("layers")),
        _ => Err(ReliefError::parameter(
            ExceptionCode::LayerNotDefined,
            format!("Only one layer per request is supported, got {}", value),
        )),
    }
}

/// Parse `minx,miny,maxx,maxy` as sent, without axis swapping.
pub fn parse_bbox(value: &str) -> Result<BoundingBox> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(ReliefError::invalid(format!(
            "BBOX must have 4 comma-separated values, got {}",
            parts.len()
        )));
    }

    let mut v = [0.0; 4];
    for (slot, part) in v.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .ok_or_else(|| ReliefError::invalid(format!("BBOX value is not a number: {}", part)))?;
    }

    if v[0] >= v[2] {
        return Err(ReliefError::invalid("BBOX minx must be less than maxx"));
    }
    if v[1] >= v[3] {
        return Err(ReliefError::invalid("BBOX miny must be less than maxy"));
    }
    Ok(BoundingBox::new(v[0], v[1], v[2], v[3]))
}

fn parse_dimension(params: &WmsParams, name: &str, max: u32) -> Result<u32> {
    let raw = params.required(name)?;
    let value: i64 = raw.parse().map_err(|_| {
        ReliefError::invalid(format!("{} must be an integer, got {}", name.to_uppercase(), raw))
    })?;
    check_dimension(name, value, max)
}

/// Check an output `width` or `height` against `1..=max`.
///
/// # Errors
///
/// `InvalidParameterValue` naming the parameter when out of range.
pub fn check_dimension(name: &str, value: i64, max: u32) -> Result<u32> {
    if value <= 0 {
        return Err(ReliefError::invalid(format!(
            "{} must be positive, got {}",
            name.to_uppercase(),
            value
        )));
    }
    if value > max as i64 {
        return Err(ReliefError::invalid(format!(
            "{} {} exceeds the maximum of {}",
            name.to_uppercase(),
            value,
            max
        )));
    }
    Ok(value as u32)
}

fn parse_point(params: &WmsParams, names: &[&str], limit: u32) -> Result<u32> {
    let raw = params
        .first_of(names)
        .ok_or_else(|| ReliefError::missing(names[0]))?;
    let value: i64 = raw.parse().map_err(|_| {
        ReliefError::parameter(
            ExceptionCode::InvalidPoint,
            format!("{} must be an integer, got {}", names[0].to_uppercase(), raw),
        )
    })?;
    if value < 0 || value >= limit as i64 {
        return Err(ReliefError::parameter(
            ExceptionCode::InvalidPoint,
            format!(
                "{}={} is outside the map (0..{})",
                names[0].to_uppercase(),
                value,
                limit
            ),
        ));
    }
    Ok(value as u32)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// `0xRRGGBB` to a Rec. 601 luma gray.
pub fn parse_bgcolor(value: &str) -> Result<u8> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .or_else(|| value.strip_prefix('#'))
        .unwrap_or(value);
    let rgb = (hex.len() == 6)
        .then(|| u32::from_str_radix(hex, 16).ok())
        .flatten()
        .ok_or_else(|| ReliefError::invalid(format!("BGCOLOR must be 0xRRGGBB, got {}", value)))?;

    let (r, g, b) = ((rgb >> 16) & 0xFF, (rgb >> 8) & 0xFF, rgb & 0xFF);
    let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    Ok(luma.round().clamp(0.0, 255.0) as u8)
}
