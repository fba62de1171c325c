//! Small GeoTIFF writer for tests and benchmarks.
//!
//! Produces little-endian, uncompressed float32 rasters laid out like a COG:
//! square tiles (or strips), a GeoKey directory, an optional GDAL nodata tag
//! and an optional 2x reduced-resolution overview.

use std::io::{Cursor, Seek, Write};
use std::path::Path;

use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tiff::TiffResult;

use crate::error::Result;
use crate::source::{geo_tag, GDAL_NODATA, GEO_KEY_DIRECTORY, MODEL_PIXEL_SCALE, MODEL_TIEPOINT};

/// Builder for an in-memory elevation GeoTIFF.
///
/// Defaults: 16-pixel tiles, 1 m pixels, top-left corner at `(0, height)`,
/// EPSG:32633, no nodata, no overview.
#[derive(Debug, Clone)]
pub struct CogFixture {
    width: usize,
    height: usize,
    values: Vec<f32>,
    block: usize,
    tiled: bool,
    origin: (f64, f64),
    pixel_size: (f64, f64),
    epsg: Option<u16>,
    nodata: Option<f64>,
    overview: bool,
    pixel_is_point: bool,
}

impl CogFixture {
    /// # Panics
    ///
    /// Panics if `values.len() != width * height`.
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), width * height, "fixture size mismatch");
        Self {
            width,
            height,
            values,
            block: 16,
            tiled: true,
            origin: (0.0, height as f64),
            pixel_size: (1.0, 1.0),
            epsg: Some(32633),
            nodata: None,
            overview: false,
            pixel_is_point: false,
        }
    }

    /// Fill each pixel from `f(col, row)`.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let values = (0..height)
            .flat_map(|r| (0..width).map(move |c| (c, r)))
            .map(|(c, r)| f(c, r))
            .collect();
        Self::new(width, height, values)
    }

    pub fn block_size(mut self, block: usize) -> Self {
        self.block = block;
        self
    }

    /// Write strips of `block` rows instead of tiles.
    pub fn stripped(mut self) -> Self {
        self.tiled = false;
        self
    }

    /// CRS coordinates of the top-left corner.
    pub fn origin(mut self, x: f64, y: f64) -> Self {
        self.origin = (x, y);
        self
    }

    /// Pixel size in CRS units, both positive.
    pub fn pixel_size(mut self, x: f64, y: f64) -> Self {
        self.pixel_size = (x, y);
        self
    }

    pub fn epsg(mut self, code: u16) -> Self {
        self.epsg = Some(code);
        self
    }

    /// Omit the CRS keys from the GeoKey directory.
    pub fn no_crs(mut self) -> Self {
        self.epsg = None;
        self
    }

    pub fn nodata(mut self, value: f64) -> Self {
        self.nodata = Some(value);
        self
    }

    pub fn with_overview(mut self) -> Self {
        self.overview = true;
        self
    }

    /// Tie the origin to the centre of the top-left pixel.
    pub fn pixel_is_point(mut self) -> Self {
        self.pixel_is_point = true;
        self
    }

    pub fn to_bytes(&self) -> TiffResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf)?;
            self.write_level(&mut encoder, self.width, self.height, &self.values, true)?;

            if self.overview {
                let (w, h, values) = self.decimate();
                self.write_level(&mut encoder, w, h, &values, false)?;
            }
        }
        Ok(buf.into_inner())
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    fn write_level<W: Write + Seek>(
        &self,
        encoder: &mut TiffEncoder<W>,
        width: usize,
        height: usize,
        values: &[f32],
        primary: bool,
    ) -> TiffResult<()> {
        let fill = self.nodata.unwrap_or(0.0) as f32;
        let (block_w, block_h) = if self.tiled {
            (self.block, self.block)
        } else {
            (width, self.block)
        };

        let mut dir = encoder.new_directory()?;
        if !primary {
            dir.write_tag(Tag::NewSubfileType, 1u32)?;
        }
        dir.write_tag(Tag::ImageWidth, width as u32)?;
        dir.write_tag(Tag::ImageLength, height as u32)?;
        dir.write_tag(Tag::BitsPerSample, 32u16)?;
        dir.write_tag(Tag::Compression, 1u16)?;
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, 1u16)?;
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::SampleFormat, 3u16)?;

        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for by in (0..height).step_by(block_h) {
            for bx in (0..width).step_by(block_w) {
                // Strips are cropped at the bottom; tiles are always full size
                let rows = if self.tiled { block_h } else { block_h.min(height - by) };
                let mut bytes = Vec::with_capacity(block_w * rows * 4);
                for y in by..by + rows {
                    for x in bx..bx + block_w {
                        let v = if x < width && y < height {
                            values[y * width + x]
                        } else {
                            fill
                        };
                        bytes.extend_from_slice(&v.to_le_bytes());
                    }
                }
                offsets.push(dir.write_data(bytes.as_slice())? as u32);
                counts.push(bytes.len() as u32);
            }
        }

        if self.tiled {
            dir.write_tag(Tag::TileWidth, block_w as u32)?;
            dir.write_tag(Tag::TileLength, block_h as u32)?;
            dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
            dir.write_tag(Tag::TileByteCounts, counts.as_slice())?;
        } else {
            dir.write_tag(Tag::RowsPerStrip, block_h as u32)?;
            dir.write_tag(Tag::StripOffsets, offsets.as_slice())?;
            dir.write_tag(Tag::StripByteCounts, counts.as_slice())?;
        }

        if primary {
            let scale = [self.pixel_size.0, self.pixel_size.1, 0.0];
            dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), scale.as_slice())?;
            let tiepoint = [0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0];
            dir.write_tag(geo_tag(MODEL_TIEPOINT), tiepoint.as_slice())?;
            dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), self.geokeys().as_slice())?;
            if let Some(nodata) = self.nodata {
                let text = nodata.to_string();
                dir.write_tag(geo_tag(GDAL_NODATA), text.as_str())?;
            }
        }

        dir.finish()
    }

    fn geokeys(&self) -> Vec<u16> {
        let geographic = matches!(self.epsg, Some(4326) | Some(4258) | Some(4269));
        let raster_type = if self.pixel_is_point { 2 } else { 1 };
        let mut keys = vec![
            1024,
            0,
            1,
            if geographic { 2 } else { 1 },
            1025,
            0,
            1,
            raster_type,
        ];
        if let Some(code) = self.epsg {
            keys.extend_from_slice(&[if geographic { 2048 } else { 3072 }, 0, 1, code]);
        }
        let count = (keys.len() / 4) as u16;
        let mut dir = vec![1, 1, 0, count];
        dir.extend(keys);
        dir
    }

    /// Halve the resolution, averaging the valid samples of each 2×2 block.
    fn decimate(&self) -> (usize, usize, Vec<f32>) {
        let (w, h) = (self.width.div_ceil(2), self.height.div_ceil(2));
        let fill = self.nodata.unwrap_or(f64::NAN) as f32;
        let mut out = Vec::with_capacity(w * h);
        for r in 0..h {
            for c in 0..w {
                let mut sum = 0.0;
                let mut n = 0;
                for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (x, y) = (2 * c + x, 2 * r + y);
                    if x >= self.width || y >= self.height {
                        continue;
                    }
                    let v = self.values[y * self.width + x];
                    if v.is_nan() || self.nodata.is_some_and(|nd| v == nd as f32) {
                        continue;
                    }
                    sum += v;
                    n += 1;
                }
                out.push(if n == 0 { fill } else { sum / n as f32 });
            }
        }
        (w, h, out)
    }
}
