//! Shaded relief.
//!
//! [`shade`] computes Horn's 3×3 finite-difference gradient for every interior
//! cell of an elevation grid and turns slope and aspect into an illumination
//! value for a sun at the given azimuth and altitude. The outermost row and
//! column on each side are consumed by the kernel, so the output is two cells
//! smaller in each dimension than the input.

use crate::grid::{ElevationGrid, ShadedGrid};

/// Sun position and vertical exaggeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HillshadeParams {
    /// Degrees clockwise from north.
    pub azimuth: f64,
    /// Degrees above the horizon.
    pub altitude: f64,
    pub z_factor: f64,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuth: 315.0,
            altitude: 45.0,
            z_factor: 1.0,
        }
    }
}

/// Illumination of `grid`'s interior cells in `[0, 1]`.
///
/// `pixel_size_x` and `pixel_size_y` are the ground distances between
/// neighbouring cell centres, in the same unit as the elevations. A cell is
/// nodata if any of the nine samples its kernel touches is nodata.
pub fn shade(
    grid: &ElevationGrid,
    params: &HillshadeParams,
    pixel_size_x: f64,
    pixel_size_y: f64,
) -> ShadedGrid {
    let width = grid.width().saturating_sub(2);
    let height = grid.height().saturating_sub(2);
    let mut out = ShadedGrid::nodata(width, height);

    let altitude = params.altitude.to_radians();
    let (sin_alt, cos_alt) = altitude.sin_cos();
    // Compass azimuth to a counter-clockwise angle from east
    let azimuth = (360.0 - params.azimuth + 90.0).rem_euclid(360.0).to_radians();
    let x_scale = params.z_factor / (8.0 * pixel_size_x);
    let y_scale = params.z_factor / (8.0 * pixel_size_y);

    for row in 0..height {
        for col in 0..width {
            let Some([a, b, c, d, _, f, g, h, i]) = neighbourhood(grid, col + 1, row + 1) else {
                continue;
            };

            let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) * x_scale;
            let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) * y_scale;

            let slope = dz_dx.hypot(dz_dy).atan();
            let aspect = dz_dy.atan2(-dz_dx);

            let illumination =
                cos_alt * slope.cos() + sin_alt * slope.sin() * (azimuth - aspect).cos();
            out.set(col, row, illumination.clamp(0.0, 1.0) as f32);
        }
    }

    out
}

/// The 3×3 samples around `(col, row)`, row by row, or `None` if any is nodata.
#[inline]
fn neighbourhood(grid: &ElevationGrid, col: usize, row: usize) -> Option<[f64; 9]> {
    let mut cells = [0.0; 9];
    for (k, cell) in cells.iter_mut().enumerate() {
        let (dc, dr) = (k % 3, k / 3);
        *cell = grid.get(col + dc - 1, row + dr - 1)? as f64;
    }
    Some(cells)
}

/// Linear gray stretch of elevation between `min` and `max`, dropping `halo`
/// cells on every side.
///
/// A flat range maps every valid cell to mid-gray.
pub fn stretch(grid: &ElevationGrid, halo: usize, min: f64, max: f64) -> ShadedGrid {
    let width = grid.width().saturating_sub(2 * halo);
    let height = grid.height().saturating_sub(2 * halo);
    let mut out = ShadedGrid::nodata(width, height);
    let range = max - min;

    for row in 0..height {
        for col in 0..width {
            let Some(v) = grid.get(col + halo, row + halo) else {
                continue;
            };
            let value = if range > 0.0 {
                ((v as f64 - min) / range) as f32
            } else {
                0.5
            };
            out.set(col, row, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn plane(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> ElevationGrid {
        let values = (0..height)
            .flat_map(|r| (0..width).map(move |c| (c, r)))
            .map(|(c, r)| f(c, r))
            .collect();
        ElevationGrid::from_values(width, height, values, None)
    }

    #[test]
    fn test_flat_surface_is_cos_altitude() {
        let grid = plane(10, 8, |_, _| 250.0);
        for altitude in [30.0_f64, 45.0, 60.0] {
            let params = HillshadeParams {
                altitude,
                ..Default::default()
            };
            let out = shade(&grid, &params, 10.0, 10.0);
            assert_eq!((out.width(), out.height()), (8, 6));
            for &v in out.values() {
                assert_abs_diff_eq!(v as f64, altitude.to_radians().cos(), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_known_slope() {
        // Rises 10 m per 10 m eastwards: 45° slope facing west
        let grid = plane(5, 5, |c, _| c as f32 * 10.0);
        let out = shade(&grid, &HillshadeParams::default(), 10.0, 10.0);

        let expected = 0.5 + 0.5 * std::f64::consts::FRAC_1_SQRT_2;
        assert_abs_diff_eq!(out.get(1, 1).unwrap() as f64, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_slope_facing_sun_is_brighter() {
        let params = HillshadeParams::default();
        // NW sun: a slope rising to the south-east faces it
        let facing = plane(5, 5, |c, r| (c + r) as f32 * 5.0);
        let away = plane(5, 5, |c, r| (8 - c - r) as f32 * 5.0);
        let lit = shade(&facing, &params, 10.0, 10.0).get(1, 1).unwrap();
        let dark = shade(&away, &params, 10.0, 10.0).get(1, 1).unwrap();
        assert!(lit > dark, "{} vs {}", lit, dark);
    }

    #[test]
    fn test_z_factor_and_pixel_size_scale_gradient() {
        let grid = plane(5, 5, |c, _| c as f32 * 10.0);
        let base = shade(&grid, &HillshadeParams::default(), 20.0, 20.0);
        let exaggerated = shade(
            &grid,
            &HillshadeParams {
                z_factor: 2.0,
                ..Default::default()
            },
            20.0,
            20.0,
        );
        let native = shade(&grid, &HillshadeParams::default(), 10.0, 10.0);
        assert_eq!(exaggerated, native);
        assert_ne!(base, native);
    }

    #[test]
    fn test_nodata_spreads_to_neighbours() {
        let mut grid = plane(6, 6, |_, _| 100.0);
        grid.set_nodata(3, 3);
        let out = shade(&grid, &HillshadeParams::default(), 1.0, 1.0);

        // Every output cell whose kernel covers input (3,3)
        for row in 0..4usize {
            for col in 0..4usize {
                let touches = (col + 1).abs_diff(3) <= 1 && (row + 1).abs_diff(3) <= 1;
                assert_eq!(out.is_valid(col, row), !touches, "at {},{}", col, row);
            }
        }
    }

    #[test]
    fn test_tiny_grid() {
        let grid = plane(2, 2, |_, _| 1.0);
        let out = shade(&grid, &HillshadeParams::default(), 1.0, 1.0);
        assert_eq!((out.width(), out.height()), (0, 0));
    }

    #[test]
    fn test_stretch() {
        let mut grid = plane(4, 3, |c, _| c as f32 * 100.0);
        grid.set_nodata(2, 1);
        let out = stretch(&grid, 1, 0.0, 400.0);
        assert_eq!((out.width(), out.height()), (2, 1));
        assert_abs_diff_eq!(out.get(0, 0).unwrap(), 0.25);
        assert_eq!(out.get(1, 0), None);

        let flat = stretch(&grid, 0, 5.0, 5.0);
        assert_eq!(flat.get(0, 0), Some(0.5));
    }
}
