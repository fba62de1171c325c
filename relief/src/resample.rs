//! Resampling of source windows onto the requested pixel grid.

use std::fmt;
use std::str::FromStr;

use crate::error::ReliefError;
use crate::grid::ElevationGrid;
use crate::window::RasterWindow;

/// Resampling kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    Nearest,
    /// Bilinear, falling back to nearest wherever a tap is nodata.
    #[default]
    Bilinear,
}

impl Resampling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resampling {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            other => Err(ReliefError::invalid(format!(
                "Unknown resampling method '{}', expected nearest or bilinear",
                other
            ))),
        }
    }
}

/// Resample `raw` (the decoded pixels of `window`) onto `window.grid`.
///
/// Target pixels whose source position is unknown, outside the window or
/// nodata stay nodata.
pub fn resample(raw: &ElevationGrid, window: &RasterWindow, method: Resampling) -> ElevationGrid {
    let grid = &window.grid;
    let mut out = ElevationGrid::nodata(grid.width, grid.height);
    if window.is_empty() {
        return out;
    }

    let (col_off, row_off) = (window.col_off as f64, window.row_off as f64);
    for row in 0..grid.height {
        for col in 0..grid.width {
            let Some((sc, sr)) = window.mapping.source_coord(col, row) else {
                continue;
            };
            let (x, y) = (sc - col_off, sr - row_off);
            let value = match method {
                Resampling::Nearest => nearest(raw, x, y),
                Resampling::Bilinear => bilinear(raw, x, y).or_else(|| nearest(raw, x, y)),
            };
            if let Some(v) = value {
                out.set(col, row, v);
            }
        }
    }
    out
}

/// Sample of the pixel containing `(x, y)`.
#[inline]
fn nearest(raw: &ElevationGrid, x: f64, y: f64) -> Option<f32> {
    if !(x >= 0.0 && y >= 0.0) {
        return None;
    }
    raw.get(x as usize, y as usize)
}

/// Interpolate between the four pixel centres around `(x, y)`.
/// `None` if any of them is nodata or outside the grid.
#[inline]
fn bilinear(raw: &ElevationGrid, x: f64, y: f64) -> Option<f32> {
    // Pixel centres sit at half-integer coordinates
    let (fx, fy) = (x - 0.5, y - 0.5);
    let (x0, y0) = (fx.floor(), fy.floor());
    if x0 < 0.0 || y0 < 0.0 {
        return None;
    }
    let (c, r) = (x0 as usize, y0 as usize);
    let (tx, ty) = (fx - x0, fy - y0);

    let v00 = raw.get(c, r)? as f64;
    let v10 = raw.get(c + 1, r)? as f64;
    let v01 = raw.get(c, r + 1)? as f64;
    let v11 = raw.get(c + 1, r + 1)? as f64;

    let top = v00 + (v10 - v00) * tx;
    let bottom = v01 + (v11 - v01) * tx;
    Some((top + (bottom - top) * ty) as f32)
}
