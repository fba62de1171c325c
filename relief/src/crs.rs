//! Coordinate reference systems and point/bbox projection.
//!
//! CRS identifiers are resolved against the EPSG database shipped with
//! `crs-definitions` and projected with `proj4rs`, so no system PROJ install
//! is needed. Coordinates handled here are always in x/y order (longitude or
//! easting first); WMS 1.3.0 axis swapping happens at the request boundary.

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{ReliefError, Result};
use crate::window::BoundingBox;

/// Mean Earth radius used for ground distance measurements (metres).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Points sampled along each bbox edge when projecting an envelope.
pub const DENSIFY_POINTS: usize = 21;

/// A coordinate reference system identified by an EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u16,
    /// `CRS:84` is EPSG:4326 with longitude-first axis order.
    crs84: bool,
    geographic: bool,
}

impl Crs {
    /// WGS 84 geographic.
    pub fn wgs84() -> Self {
        Self {
            epsg: 4326,
            crs84: false,
            geographic: true,
        }
    }

    /// `CRS:84`, WGS 84 with lon/lat axis order.
    pub fn crs84() -> Self {
        Self {
            crs84: true,
            ..Self::wgs84()
        }
    }

    /// Resolve an EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`ReliefError::Crs`] if the code is not in the EPSG database.
    pub fn from_epsg(code: u16) -> Result<Self> {
        let proj = proj_string(code)
            .ok_or_else(|| ReliefError::crs(format!("EPSG:{} is not a supported CRS", code)))?;
        Ok(Self {
            epsg: code,
            crs84: false,
            geographic: proj.contains("+proj=longlat"),
        })
    }

    /// Parse a CRS identifier as it appears in `CRS`/`SRS` request parameters.
    ///
    /// Accepts `EPSG:<code>` (any case), `CRS:84`, the legacy `EPSG:900913`
    /// alias of Web Mercator, and the `urn:ogc:def:crs:` forms of both.
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase();

        if matches!(
            normalized.as_str(),
            "CRS:84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "URN:OGC:DEF:CRS:OGC::CRS84"
        ) {
            return Ok(Self::crs84());
        }

        let code = normalized
            .strip_prefix("EPSG:")
            .or_else(|| normalized.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
            .ok_or_else(|| ReliefError::crs(format!("Malformed CRS identifier: {}", s)))?;

        let code: u32 = code
            .parse()
            .map_err(|_| ReliefError::crs(format!("Malformed CRS identifier: {}", s)))?;

        match code {
            900913 => Self::from_epsg(3857),
            code => u16::try_from(code)
                .map_err(|_| ReliefError::crs(format!("{} is not a supported CRS", s)))
                .and_then(Self::from_epsg),
        }
    }

    /// The EPSG code.
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// True for latitude/longitude systems (units are degrees).
    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    /// True for the `CRS:84` identifier.
    pub fn is_crs84(&self) -> bool {
        self.crs84
    }

    /// True when the two CRSes describe the same x/y coordinate space.
    ///
    /// `CRS:84` and `EPSG:4326` only differ in the axis order of request
    /// parameters, so they share a space.
    pub fn same_space(&self, other: &Crs) -> bool {
        self.epsg == other.epsg
    }

    fn proj(&self) -> Result<Proj> {
        let def = proj_string(self.epsg)
            .ok_or_else(|| ReliefError::crs(format!("EPSG:{} is not a supported CRS", self.epsg)))?;
        Proj::from_proj_string(def)
            .map_err(|e| ReliefError::crs(format!("Invalid projection for {}: {:?}", self, e)))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.crs84 {
            write!(f, "CRS:84")
        } else {
            write!(f, "EPSG:{}", self.epsg)
        }
    }
}

fn proj_string(code: u16) -> Option<&'static str> {
    crs_definitions::from_code(code).map(|def| def.proj4)
}

/// Point transformer between two CRSes.
///
/// Built per request; holds no state shared between requests.
pub struct Transformer {
    /// `None` when both sides share a coordinate space.
    projs: Option<(Proj, Proj)>,
    from_geographic: bool,
    to_geographic: bool,
}

impl Transformer {
    /// Create a transformer from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`ReliefError::Crs`] if either side cannot be instantiated.
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        let projs = if from.same_space(to) {
            None
        } else {
            Some((from.proj()?, to.proj()?))
        };

        Ok(Self {
            projs,
            from_geographic: from.is_geographic(),
            to_geographic: to.is_geographic(),
        })
    }

    /// True when no reprojection is performed.
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform a single point. Returns `None` outside the projection domain.
    pub fn transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let Some((from, to)) = &self.projs else {
            return Some((x, y));
        };

        // proj4rs works in radians for geographic systems
        let mut point = if self.from_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(from, to, &mut point).ok()?;

        let (out_x, out_y) = if self.to_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        (out_x.is_finite() && out_y.is_finite()).then_some((out_x, out_y))
    }

    /// Envelope of a bbox after projection.
    ///
    /// Each edge is sampled at `densify` points (corners and midpoints
    /// included) because reprojection bends straight edges. Points outside
    /// the projection domain are skipped; `None` means nothing projected.
    pub fn envelope(&self, bbox: &BoundingBox, densify: usize) -> Option<BoundingBox> {
        if self.is_identity() {
            return Some(*bbox);
        }

        let steps = densify.max(3) - 1;
        let mut env: Option<BoundingBox> = None;

        for k in 0..=steps {
            let t = k as f64 / steps as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            let edge_points = [
                (x, bbox.min_y),
                (x, bbox.max_y),
                (bbox.min_x, y),
                (bbox.max_x, y),
            ];

            for (px, py) in edge_points {
                if let Some((tx, ty)) = self.transform(px, py) {
                    env = Some(match env {
                        Some(e) => e.expand_to(tx, ty),
                        None => BoundingBox::new(tx, ty, tx, ty),
                    });
                }
            }
        }

        env
    }
}

/// Project a bbox from one CRS to another.
///
/// # Errors
///
/// Returns [`ReliefError::Crs`] for unsupported CRSes or when no part of the
/// bbox lies inside the target projection's domain.
pub fn project_bbox(bbox: &BoundingBox, from: &Crs, to: &Crs) -> Result<BoundingBox> {
    let transformer = Transformer::new(from, to)?;
    transformer.envelope(bbox, DENSIFY_POINTS).ok_or_else(|| {
        ReliefError::crs(format!(
            "Bounding box {} cannot be projected from {} to {}",
            bbox, from, to
        ))
    })
}

/// Ground size in metres of a `dx` × `dy` step at `(x, y)` in `crs`.
///
/// Distances are great-circle distances between the projected step
/// endpoints. Returns `None` if the points cannot be brought to WGS 84.
pub fn ground_resolution(crs: &Crs, x: f64, y: f64, dx: f64, dy: f64) -> Option<(f64, f64)> {
    let to_wgs84 = Transformer::new(crs, &Crs::wgs84()).ok()?;

    let origin = to_wgs84.transform(x, y)?;
    let east = to_wgs84.transform(x + dx, y)?;
    let north = to_wgs84.transform(x, y + dy)?;

    let gx = haversine(origin, east);
    let gy = haversine(origin, north);

    (gx > 0.0 && gy > 0.0).then_some((gx, gy))
}

/// Great-circle distance between two lon/lat points in degrees.
fn haversine((lon1, lat1): (f64, f64), (lon2, lat2): (f64, f64)) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}
