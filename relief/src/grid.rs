//! Sample grids with explicit nodata masks.
//!
//! Both grids are row-major with row 0 at the top. Every cell carries a
//! validity flag alongside its value; nodata is never inferred from the value.

/// Elevation samples in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    width: usize,
    height: usize,
    values: Vec<f32>,
    valid: Vec<bool>,
}

impl ElevationGrid {
    /// A grid with every cell marked nodata.
    pub fn nodata(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width * height],
            valid: vec![false; width * height],
        }
    }

    /// Build a grid from raw samples, masking NaN and `nodata`.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != width * height`.
    pub fn from_values(width: usize, height: usize, values: Vec<f32>, nodata: Option<f32>) -> Self {
        assert_eq!(values.len(), width * height, "grid size mismatch");
        let valid = values
            .iter()
            .map(|&v| !is_nodata_value(v, nodata))
            .collect();
        Self {
            width,
            height,
            values,
            valid,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Value at `(col, row)`, or `None` for nodata and out-of-range cells.
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let i = row * self.width + col;
        self.valid[i].then_some(self.values[i])
    }

    /// Store a valid sample.
    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        let i = row * self.width + col;
        self.values[i] = value;
        self.valid[i] = true;
    }

    #[inline]
    pub fn set_nodata(&mut self, col: usize, row: usize) {
        let i = row * self.width + col;
        self.values[i] = 0.0;
        self.valid[i] = false;
    }

    #[inline]
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        col < self.width && row < self.height && self.valid[row * self.width + col]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn mask(&self) -> &[bool] {
        &self.valid
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Min and max of the valid cells.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .zip(&self.valid)
            .filter(|(_, &ok)| ok)
            .fold(None, |acc, (&v, _)| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Illumination (or stretched elevation) in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadedGrid {
    width: usize,
    height: usize,
    values: Vec<f32>,
    valid: Vec<bool>,
}

impl ShadedGrid {
    pub fn nodata(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width * height],
            valid: vec![false; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let i = row * self.width + col;
        self.valid[i].then_some(self.values[i])
    }

    /// Store a value, clamped to `[0, 1]`.
    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        let i = row * self.width + col;
        self.values[i] = value.clamp(0.0, 1.0);
        self.valid[i] = true;
    }

    #[inline]
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        col < self.width && row < self.height && self.valid[row * self.width + col]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn mask(&self) -> &[bool] {
        &self.valid
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Values scaled to bytes, nodata cells as `fill`.
    pub fn to_bytes(&self, fill: u8) -> Vec<u8> {
        self.values
            .iter()
            .zip(&self.valid)
            .map(|(&v, &ok)| if ok { quantize(v) } else { fill })
            .collect()
    }
}

/// Map `[0, 1]` onto `0..=255`, rounding to nearest.
#[inline]
pub fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// True for NaN or a sample equal to the declared nodata value.
#[inline]
pub fn is_nodata_value(value: f32, nodata: Option<f32>) -> bool {
    value.is_nan() || nodata.is_some_and(|nd| value == nd)
}
