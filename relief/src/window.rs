//! Raster window selection.
//!
//! Maps a requested extent and pixel grid onto the smallest block of source
//! pixels that covers it, choosing a COG overview level when the request is
//! coarser than the native resolution.

use std::fmt;

use tracing::debug;

use crate::crs::{Crs, Transformer, DENSIFY_POINTS};
use crate::error::Result;
use crate::source::RasterSource;

/// An axis-aligned rectangle in x/y order (easting/longitude first).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Smallest bbox containing `self` and the point.
    pub fn expand_to(&self, x: f64, y: f64) -> Self {
        Self {
            min_x: self.min_x.min(x),
            min_y: self.min_y.min(y),
            max_x: self.max_x.max(x),
            max_y: self.max_y.max(y),
        }
    }

    /// True if the interiors overlap.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// A regular pixel grid over a bbox, row 0 at the top (max y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn new(bbox: BoundingBox, width: usize, height: usize) -> Self {
        Self {
            bbox,
            width,
            height,
        }
    }

    /// Pixel size `(x, y)` in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.bbox.width() / self.width as f64,
            self.bbox.height() / self.height as f64,
        )
    }

    /// CRS coordinates of the centre of pixel `(col, row)`.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let (rx, ry) = self.resolution();
        (
            self.bbox.min_x + (col as f64 + 0.5) * rx,
            self.bbox.max_y - (row as f64 + 0.5) * ry,
        )
    }

    /// The same grid extended by `halo` pixels on every side.
    pub fn with_halo(&self, halo: usize) -> Self {
        let (rx, ry) = self.resolution();
        let h = halo as f64;
        Self {
            bbox: BoundingBox::new(
                self.bbox.min_x - h * rx,
                self.bbox.min_y - h * ry,
                self.bbox.max_x + h * rx,
                self.bbox.max_y + h * ry,
            ),
            width: self.width + 2 * halo,
            height: self.height + 2 * halo,
        }
    }
}

/// Target pixels between control points of a [`TransformGrid`].
pub const TRANSFORM_GRID_STEP: usize = 16;

/// Maps target grid pixels to continuous source pixel coordinates.
///
/// Source coordinates are in the window's level pixel space, where pixel
/// `(c, r)` covers `[c, c+1) × [r, r+1)` and its centre is `(c+0.5, r+0.5)`.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelMapping {
    /// Same coordinate space: a per-axis scale and offset.
    Affine {
        col0: f64,
        col_step: f64,
        row0: f64,
        row_step: f64,
    },
    /// Reprojected: exact transforms at control points, interpolated between.
    Reprojected(TransformGrid),
}

impl PixelMapping {
    /// Source coordinate for the centre of target pixel `(col, row)`.
    pub fn source_coord(&self, col: usize, row: usize) -> Option<(f64, f64)> {
        match self {
            PixelMapping::Affine {
                col0,
                col_step,
                row0,
                row_step,
            } => Some((col0 + col_step * col as f64, row0 + row_step * row as f64)),
            PixelMapping::Reprojected(grid) => grid.get(col, row),
        }
    }
}

/// Source coordinates sampled every `step` target pixels, plus the last row
/// and column, and bilinearly interpolated in between.
///
/// A pixel whose surrounding control points include one outside the
/// projection domain maps to `None`. With `step == 1` every pixel is a
/// control point and the grid is an exact table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformGrid {
    cols: Vec<usize>,
    rows: Vec<usize>,
    points: Vec<Option<(f64, f64)>>,
}

impl TransformGrid {
    /// Sample `f(col, row)` at the control points of a `width` × `height` grid.
    pub fn new(
        width: usize,
        height: usize,
        step: usize,
        f: impl Fn(usize, usize) -> Option<(f64, f64)>,
    ) -> Self {
        let cols = knots(width, step);
        let rows = knots(height, step);
        let mut points = Vec::with_capacity(cols.len() * rows.len());
        for &row in &rows {
            for &col in &cols {
                points.push(f(col, row));
            }
        }
        Self { cols, rows, points }
    }

    /// Number of stored control points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, col: usize, row: usize) -> Option<(f64, f64)> {
        let (c0, tx) = locate(&self.cols, col)?;
        let (r0, ty) = locate(&self.rows, row)?;
        let c1 = if tx > 0.0 { c0 + 1 } else { c0 };
        let r1 = if ty > 0.0 { r0 + 1 } else { r0 };

        let n = self.cols.len();
        let at = |c: usize, r: usize| self.points.get(r * n + c).copied().flatten();
        let (x00, y00) = at(c0, r0)?;
        let (x10, y10) = at(c1, r0)?;
        let (x01, y01) = at(c0, r1)?;
        let (x11, y11) = at(c1, r1)?;

        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
        Some((
            lerp(lerp(x00, x10, tx), lerp(x01, x11, tx), ty),
            lerp(lerp(y00, y10, tx), lerp(y01, y11, tx), ty),
        ))
    }
}

/// `0, step, 2·step, …` and `len - 1`.
fn knots(len: usize, step: usize) -> Vec<usize> {
    let mut knots: Vec<usize> = (0..len).step_by(step.max(1)).collect();
    if let Some(&last) = knots.last() {
        if last + 1 < len {
            knots.push(len - 1);
        }
    }
    knots
}

/// Interval of `knots` holding `value` and the fraction along it.
fn locate(knots: &[usize], value: usize) -> Option<(usize, f64)> {
    match knots.binary_search(&value) {
        Ok(i) => Some((i, 0.0)),
        Err(i) if i == 0 || i >= knots.len() => None,
        Err(i) => {
            let (a, b) = (knots[i - 1], knots[i]);
            Some((i - 1, (value - a) as f64 / (b - a) as f64))
        }
    }
}

/// A rectangular region of one raster level plus the mapping that resamples
/// it onto the requested grid.
///
/// After clamping, `col_off + width <= level width` and
/// `row_off + height <= level height`. A window with zero width or height
/// means the request does not intersect the raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterWindow {
    /// Index into [`RasterSource::levels`]; 0 is full resolution.
    pub level: usize,
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
    /// Target grid, including the halo.
    pub grid: GridSpec,
    /// Halo pixels on each side of `grid` beyond the requested output.
    pub halo: usize,
    pub mapping: PixelMapping,
}

impl RasterWindow {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Options controlling window selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowOptions {
    /// Extra source pixels read around the projected envelope.
    pub padding: f64,
    /// Output pixels added around the requested grid.
    pub halo: usize,
    /// Read from overviews when the request is coarser than full resolution.
    pub use_overviews: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            padding: 0.5,
            halo: 1,
            use_overviews: true,
        }
    }
}

/// Compute the source window needed to render `bbox` at `width` × `height`.
///
/// The requested grid is extended by `options.halo` pixels. When `crs` shares
/// the source's coordinate space the window is the direct affine inverse of
/// that extent; otherwise the extent's corners and densified edges are
/// projected and their envelope is used. Either way the envelope is padded by
/// `options.padding` source pixels and clamped to the raster.
///
/// # Errors
///
/// Returns [`crate::ReliefError::Crs`] if no transformation exists between
/// `crs` and the source CRS.
pub fn compute_source_window(
    bbox: &BoundingBox,
    crs: &Crs,
    width: usize,
    height: usize,
    source: &RasterSource,
    options: &WindowOptions,
) -> Result<RasterWindow> {
    let grid = GridSpec::new(*bbox, width, height).with_halo(options.halo);
    let transformer = Transformer::new(crs, source.crs())?;

    let Some(envelope) = transformer.envelope(&grid.bbox, DENSIFY_POINTS) else {
        debug!(bbox = %bbox, crs = %crs, "Request extent has no projection in source CRS");
        return Ok(empty_window(grid, options.halo));
    };

    let level_index = if options.use_overviews {
        select_level(source, &envelope, &grid)
    } else {
        0
    };
    let level = &source.levels()[level_index];
    let gt = &level.transform;

    // Pixel-space envelope; rows grow downwards when pixel_height < 0
    let (c_a, r_a) = gt.geo_to_pixel(envelope.min_x, envelope.max_y);
    let (c_b, r_b) = gt.geo_to_pixel(envelope.max_x, envelope.min_y);
    let (c_min, c_max) = (c_a.min(c_b), c_a.max(c_b));
    let (r_min, r_max) = (r_a.min(r_b), r_a.max(r_b));

    let col_start = clamp_index((c_min - options.padding).floor(), level.width);
    let col_end = clamp_index((c_max + options.padding).ceil(), level.width);
    let row_start = clamp_index((r_min - options.padding).floor(), level.height);
    let row_end = clamp_index((r_max + options.padding).ceil(), level.height);

    if col_end <= col_start || row_end <= row_start {
        debug!(bbox = %bbox, "Request does not intersect the raster");
        return Ok(empty_window(grid, options.halo));
    }

    let mapping = if transformer.is_identity() {
        let (rx, ry) = grid.resolution();
        let (col0, row0) = gt.geo_to_pixel(grid.bbox.min_x + 0.5 * rx, grid.bbox.max_y - 0.5 * ry);
        let (col1, row1) = gt.geo_to_pixel(grid.bbox.min_x + 1.5 * rx, grid.bbox.max_y - 1.5 * ry);
        PixelMapping::Affine {
            col0,
            col_step: col1 - col0,
            row0,
            row_step: row1 - row0,
        }
    } else {
        PixelMapping::Reprojected(TransformGrid::new(
            grid.width,
            grid.height,
            TRANSFORM_GRID_STEP,
            |col, row| {
                let (x, y) = grid.pixel_center(col, row);
                transformer
                    .transform(x, y)
                    .map(|(sx, sy)| gt.geo_to_pixel(sx, sy))
            },
        ))
    };

    let window = RasterWindow {
        level: level_index,
        col_off: col_start,
        row_off: row_start,
        width: col_end - col_start,
        height: row_end - row_start,
        grid,
        halo: options.halo,
        mapping,
    };

    debug!(
        level = window.level,
        col_off = window.col_off,
        row_off = window.row_off,
        width = window.width,
        height = window.height,
        reprojected = !transformer.is_identity(),
        "Resolved source window"
    );

    Ok(window)
}

/// A 1×1 window on the full-resolution pixel containing `(x, y)`.
///
/// Returns `Ok(None)` when the point falls outside the raster or outside the
/// projection domain.
pub fn point_window(x: f64, y: f64, crs: &Crs, source: &RasterSource) -> Result<Option<RasterWindow>> {
    let transformer = Transformer::new(crs, source.crs())?;
    let Some((sx, sy)) = transformer.transform(x, y) else {
        return Ok(None);
    };

    let level = &source.levels()[0];
    let (c, r) = level.transform.geo_to_pixel(sx, sy);
    if c < 0.0 || r < 0.0 || c >= level.width as f64 || r >= level.height as f64 {
        return Ok(None);
    }

    let (col, row) = (c.floor() as usize, r.floor() as usize);
    let (min_x, max_y) = level.transform.pixel_to_geo(col as f64, row as f64);
    let (max_x, min_y) = level.transform.pixel_to_geo(col as f64 + 1.0, row as f64 + 1.0);

    Ok(Some(RasterWindow {
        level: 0,
        col_off: col,
        row_off: row,
        width: 1,
        height: 1,
        grid: GridSpec::new(
            BoundingBox::new(min_x.min(max_x), min_y.min(max_y), min_x.max(max_x), min_y.max(max_y)),
            1,
            1,
        ),
        halo: 0,
        mapping: PixelMapping::Affine {
            col0: col as f64 + 0.5,
            col_step: 1.0,
            row0: row as f64 + 0.5,
            row_step: 1.0,
        },
    }))
}

/// Coarsest level whose pixels are no larger than the requested pixels.
fn select_level(source: &RasterSource, envelope: &BoundingBox, grid: &GridSpec) -> usize {
    let wanted_x = envelope.width() / grid.width as f64;
    let wanted_y = envelope.height() / grid.height as f64;
    // Tolerate rounding in overview dimensions
    let slack = 1.0 + 1e-6;

    source
        .levels()
        .iter()
        .enumerate()
        .filter(|(_, level)| {
            level.transform.pixel_width.abs() <= wanted_x * slack
                && level.transform.pixel_height.abs() <= wanted_y * slack
        })
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0)
}

fn clamp_index(value: f64, len: usize) -> usize {
    if value <= 0.0 {
        0
    } else if value >= len as f64 {
        len
    } else {
        value as usize
    }
}

fn empty_window(grid: GridSpec, halo: usize) -> RasterWindow {
    RasterWindow {
        level: 0,
        col_off: 0,
        row_off: 0,
        width: 0,
        height: 0,
        grid,
        halo,
        mapping: PixelMapping::Reprojected(TransformGrid::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::CogFixture;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    /// 64×64 raster, 10 m pixels, top-left at (1000, 2000) in UTM 33N.
    fn open_source(dir: &TempDir, overview: bool) -> RasterSource {
        let path = dir.path().join("dem.tif");
        let mut fixture = CogFixture::from_fn(64, 64, |c, r| (c + r) as f32)
            .origin(1000.0, 2000.0)
            .pixel_size(10.0, 10.0);
        if overview {
            fixture = fixture.with_overview();
        }
        fixture.write_to(&path).unwrap();
        RasterSource::open(&path).unwrap()
    }

    fn utm() -> Crs {
        Crs::from_epsg(32633).unwrap()
    }

    #[test]
    fn test_grid_pixel_centers() {
        let grid = GridSpec::new(BoundingBox::new(0.0, 0.0, 100.0, 50.0), 10, 5);
        assert_eq!(grid.resolution(), (10.0, 10.0));
        assert_eq!(grid.pixel_center(0, 0), (5.0, 45.0));
        assert_eq!(grid.pixel_center(9, 4), (95.0, 5.0));

        let halo = grid.with_halo(1);
        assert_eq!((halo.width, halo.height), (12, 7));
        assert_eq!(halo.bbox, BoundingBox::new(-10.0, -10.0, 110.0, 60.0));
    }

    #[test]
    fn test_same_crs_window_is_affine_inverse() {
        let dir = TempDir::new().unwrap();
        let source = open_source(&dir, false);
        let options = WindowOptions::default();

        // 20×10 native pixels starting at column 5, row 8
        let bbox = BoundingBox::new(1050.0, 1820.0, 1250.0, 1920.0);
        let window = compute_source_window(&bbox, &utm(), 20, 10, &source, &options).unwrap();

        // One output pixel of halo (10 m = 1 source pixel) plus half a pixel of padding
        let expected_col = (5.0_f64 - 1.0 - 0.5).floor() as usize;
        let expected_row = (8.0_f64 - 1.0 - 0.5).floor() as usize;
        assert_eq!(window.level, 0);
        assert_eq!(window.col_off, expected_col);
        assert_eq!(window.row_off, expected_row);
        assert_eq!(window.width, (25.0_f64 + 1.0 + 0.5).ceil() as usize - expected_col);
        assert_eq!(window.height, (18.0_f64 + 1.0 + 0.5).ceil() as usize - expected_row);

        match window.mapping {
            PixelMapping::Affine {
                col0,
                col_step,
                row0,
                row_step,
            } => {
                // Halo pixel 0 is centred on source column 4.5 (pixel 4)
                assert_abs_diff_eq!(col0, 4.5, epsilon = 1e-9);
                assert_abs_diff_eq!(row0, 7.5, epsilon = 1e-9);
                assert_abs_diff_eq!(col_step, 1.0, epsilon = 1e-9);
                assert_abs_diff_eq!(row_step, 1.0, epsilon = 1e-9);
            }
            PixelMapping::Reprojected(_) => panic!("same-CRS request must use the affine fast path"),
        }
    }

    #[test]
    fn test_window_clamped_at_raster_edge() {
        let dir = TempDir::new().unwrap();
        let source = open_source(&dir, false);

        // Straddles the west edge: half the bbox lies outside the raster
        let bbox = BoundingBox::new(900.0, 1500.0, 1100.0, 1700.0);
        let window =
            compute_source_window(&bbox, &utm(), 20, 20, &source, &WindowOptions::default())
                .unwrap();

        assert_eq!(window.col_off, 0);
        assert!(window.col_off + window.width <= 64);
        assert!(window.row_off + window.height <= 64);
        assert!(!window.is_empty());
    }

    #[test]
    fn test_window_outside_raster_is_empty() {
        let dir = TempDir::new().unwrap();
        let source = open_source(&dir, false);

        let bbox = BoundingBox::new(5000.0, 5000.0, 6000.0, 6000.0);
        let window =
            compute_source_window(&bbox, &utm(), 256, 256, &source, &WindowOptions::default())
                .unwrap();
        assert!(window.is_empty());
        assert_eq!((window.grid.width, window.grid.height), (258, 258));
    }

    #[test]
    fn test_overview_selected_for_coarse_request() {
        let dir = TempDir::new().unwrap();
        let source = open_source(&dir, true);
        assert_eq!(source.levels().len(), 2);

        // Whole raster (640 m) into 32 px: 20 m per pixel matches the 2x overview
        let bbox = BoundingBox::new(1000.0, 1360.0, 1640.0, 2000.0);
        let window =
            compute_source_window(&bbox, &utm(), 32, 32, &source, &WindowOptions::default())
                .unwrap();
        assert_eq!(window.level, 1);
        assert!(window.col_off + window.width <= 32);

        // Native-resolution request stays on level 0
        let window =
            compute_source_window(&bbox, &utm(), 64, 64, &source, &WindowOptions::default())
                .unwrap();
        assert_eq!(window.level, 0);

        let no_overviews = WindowOptions {
            use_overviews: false,
            ..WindowOptions::default()
        };
        let window = compute_source_window(&bbox, &utm(), 32, 32, &source, &no_overviews).unwrap();
        assert_eq!(window.level, 0);
    }

    #[test]
    fn test_reprojected_window_uses_transform_grid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geo.tif");
        // 0.01° pixels covering lon 14..14.64, lat 51.36..52
        CogFixture::from_fn(64, 64, |_, _| 100.0)
            .origin(14.0, 52.0)
            .pixel_size(0.01, 0.01)
            .epsg(4326)
            .write_to(&path)
            .unwrap();
        let source = RasterSource::open(&path).unwrap();

        let mercator = Crs::from_epsg(3857).unwrap();
        let bbox = crate::crs::project_bbox(
            &BoundingBox::new(14.1, 51.5, 14.3, 51.7),
            &Crs::wgs84(),
            &mercator,
        )
        .unwrap();

        let window =
            compute_source_window(&bbox, &mercator, 16, 16, &source, &WindowOptions::default())
                .unwrap();
        assert!(!window.is_empty());
        let PixelMapping::Reprojected(transform) = &window.mapping else {
            panic!("reprojected request must use a transform grid");
        };
        // 18×18 with halo: control points at 0 and 16, plus 17
        assert_eq!(transform.len(), 9);

        // Every mapped pixel centre lies inside the window
        for row in 0..window.grid.height {
            for col in 0..window.grid.width {
                let (c, r) = window
                    .mapping
                    .source_coord(col, row)
                    .unwrap();
                assert!(c >= window.col_off as f64 && c <= (window.col_off + window.width) as f64);
                assert!(r >= window.row_off as f64 && r <= (window.row_off + window.height) as f64);
            }
        }
    }

    #[test]
    fn test_transform_grid_interpolates_between_control_points() {
        let linear = |c: usize, r: usize| Some((2.0 * c as f64 + 1.0, 0.5 * r as f64 - 3.0));
        let grid = TransformGrid::new(40, 21, 16, linear);
        // Columns 0, 16, 32, 39 and rows 0, 16, 20
        assert_eq!(grid.len(), 12);

        for row in 0..21 {
            for col in 0..40 {
                let (x, y) = grid.get(col, row).unwrap();
                let (ex, ey) = linear(col, row).unwrap();
                assert_abs_diff_eq!(x, ex, epsilon = 1e-9);
                assert_abs_diff_eq!(y, ey, epsilon = 1e-9);
            }
        }
        assert_eq!(grid.get(40, 0), None);
        assert_eq!(grid.get(0, 21), None);
    }

    #[test]
    fn test_transform_grid_missing_control_point() {
        // Control point (16, 0) falls outside the projection domain
        let grid = TransformGrid::new(33, 33, 16, |c, r| {
            (c != 16 || r != 0).then_some((c as f64, r as f64))
        });
        assert_eq!(grid.get(16, 0), None);
        assert_eq!(grid.get(8, 8), None);
        assert_eq!(grid.get(20, 10), None);
        // Cells not touching it are unaffected
        assert_eq!(grid.get(8, 20), Some((8.0, 20.0)));
        assert_eq!(grid.get(0, 0), Some((0.0, 0.0)));
        // Exactly on the column of the bad point but below it
        assert_eq!(grid.get(16, 16), Some((16.0, 16.0)));
    }

    #[test]
    fn test_point_window() {
        let dir = TempDir::new().unwrap();
        let source = open_source(&dir, false);

        let window = point_window(1035.0, 1985.0, &utm(), &source).unwrap().unwrap();
        assert_eq!((window.col_off, window.row_off), (3, 1));
        assert_eq!((window.width, window.height), (1, 1));

        assert!(point_window(999.0, 1985.0, &utm(), &source).unwrap().is_none());
    }
}
