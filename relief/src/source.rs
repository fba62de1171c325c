//! Cloud-Optimized GeoTIFF access.
//!
//! [`RasterSource`] memory-maps one single-band elevation GeoTIFF and reads
//! rectangular windows from it block by block. The handle is immutable after
//! opening: every read builds its own decoder over the shared mapping, so any
//! number of threads can read concurrently without locking.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Serialize;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, info, warn};

use crate::crs::Crs;
use crate::error::{ReliefError, Result};
use crate::grid::{is_nodata_value, ElevationGrid};
use crate::window::{BoundingBox, RasterWindow};

// GeoTIFF tag numbers
pub(crate) const MODEL_PIXEL_SCALE: u16 = 33550;
pub(crate) const MODEL_TIEPOINT: u16 = 33922;
pub(crate) const MODEL_TRANSFORMATION: u16 = 34264;
pub(crate) const GEO_KEY_DIRECTORY: u16 = 34735;
pub(crate) const GDAL_NODATA: u16 = 42113;

// GeoKey ids
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

// NewSubfileType bits
const SUBFILE_REDUCED: u32 = 1;
const SUBFILE_MASK: u32 = 4;

/// Largest buffer the decoder may allocate for one block.
const DECODE_LIMIT: usize = 512 * 1024 * 1024;

/// The decoder's tag for a GeoTIFF tag number, named or not.
pub(crate) fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// North-up affine pixel-to-CRS transform.
///
/// Pixel `(col, row)` has its top-left corner at
/// `(origin_x + col * pixel_width, origin_y + row * pixel_height)`.
/// `pixel_height` is negative for the usual north-up layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    #[inline]
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    #[inline]
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// Same origin with pixels `fx` × `fy` times larger.
    pub fn scaled(&self, fx: f64, fy: f64) -> Self {
        Self {
            pixel_width: self.pixel_width * fx,
            pixel_height: self.pixel_height * fy,
            ..*self
        }
    }

    /// Extent covered by a `width` × `height` raster.
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        let (x0, y0) = self.pixel_to_geo(0.0, 0.0);
        let (x1, y1) = self.pixel_to_geo(width as f64, height as f64);
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// One resolution level: the full-resolution image or a reduced overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterLevel {
    /// Index of the image file directory holding this level.
    pub ifd: usize,
    pub width: usize,
    pub height: usize,
    pub block_width: usize,
    pub block_height: usize,
    pub tiled: bool,
    pub transform: GeoTransform,
}

impl RasterLevel {
    fn blocks_across(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    fn blocks_down(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    pub fn block_count(&self) -> usize {
        self.blocks_across() * self.blocks_down()
    }
}

/// Elevation statistics over one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterStats {
    /// Level the statistics were computed from.
    pub level: usize,
    /// Zero when there are no valid samples.
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub valid_count: u64,
    pub nodata_count: u64,
}

/// A memory-mapped, read-only elevation COG.
///
/// # Example
///
/// ```ignore
/// use relief::RasterSource;
///
/// let source = RasterSource::open("/data/dem_cog.tif")?;
/// println!("{} {}x{}", source.crs(), source.width(), source.height());
/// ```
pub struct RasterSource {
    path: PathBuf,
    /// Memory-mapped file data
    data: Mmap,
    crs: Crs,
    nodata: Option<f64>,
    /// Level 0 is full resolution, then overviews from fine to coarse.
    levels: Vec<RasterLevel>,
}

impl std::fmt::Debug for RasterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSource")
            .field("path", &self.path)
            .field("crs", &self.crs)
            .field("nodata", &self.nodata)
            .field("levels", &self.levels)
            .finish()
    }
}

impl RasterSource {
    /// Open a GeoTIFF, taking its CRS from the GeoKey directory.
    ///
    /// # Errors
    ///
    /// Returns [`ReliefError::Source`] if the file is missing, unreadable, not
    /// a TIFF, has more than one band, lacks georeferencing or has no EPSG code.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_crs(path, None)
    }

    /// Open a GeoTIFF, using `crs` when the file does not declare one.
    pub fn open_with_crs<P: AsRef<Path>>(path: P, crs: Option<Crs>) -> Result<Self> {
        let path = path.as_ref();
        let fail = |message: String| ReliefError::open_failed(path, message);

        let file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let len = file.metadata().map_err(|e| fail(e.to_string()))?.len();
        if len == 0 {
            return Err(fail("file is empty".to_string()));
        }

        // SAFETY: Memory mapping is safe as long as the file is not modified
        // while mapped. We open the file read-only and don't expose the mapping.
        let data = unsafe { Mmap::map(&file).map_err(|e| fail(e.to_string()))? };

        let mut decoder = new_decoder(&data).map_err(|e| fail(format!("not a TIFF: {}", e)))?;
        let header = read_header(&mut decoder).map_err(|e| fail(e.to_string()))?;

        let crs = match (header.epsg, crs) {
            (_, Some(explicit)) => explicit,
            (Some(code), None) => Crs::from_epsg(code).map_err(|e| fail(e.to_string()))?,
            (None, None) => {
                return Err(fail(
                    "no EPSG code in GeoKey directory and no CRS override given".to_string(),
                ))
            }
        };

        let transform = header
            .transform
            .ok_or_else(|| fail("missing georeferencing tags".to_string()))?;
        let mut levels = vec![RasterLevel {
            ifd: 0,
            width: header.width,
            height: header.height,
            block_width: header.block_width,
            block_height: header.block_height,
            tiled: header.tiled,
            transform,
        }];

        if !levels[0].tiled {
            warn!(path = %path.display(), "Raster is stripped, not tiled; reads will be slower");
        }

        let mut ifd = 0;
        while decoder.more_images() {
            ifd += 1;
            match read_overview(&mut decoder, ifd, &levels[0]) {
                Ok(Some(level)) => levels.push(level),
                Ok(None) => {}
                Err(e) => {
                    warn!(ifd, error = %e, "Ignoring unreadable IFD");
                    break;
                }
            }
        }
        levels.sort_by_key(|l| std::cmp::Reverse(l.width));

        info!(
            path = %path.display(),
            crs = %crs,
            width = levels[0].width,
            height = levels[0].height,
            overviews = levels.len() - 1,
            nodata = ?header.nodata,
            "Opened raster"
        );

        Ok(Self {
            path: path.to_path_buf(),
            data,
            crs,
            nodata: header.nodata,
            levels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn width(&self) -> usize {
        self.levels[0].width
    }

    pub fn height(&self) -> usize {
        self.levels[0].height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.levels[0].transform
    }

    /// Native pixel size `(x, y)` as positive CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        let gt = self.transform();
        (gt.pixel_width.abs(), gt.pixel_height.abs())
    }

    /// Full raster extent in the native CRS.
    pub fn extent(&self) -> BoundingBox {
        self.transform().extent(self.width(), self.height())
    }

    pub fn block_size(&self) -> (usize, usize) {
        (self.levels[0].block_width, self.levels[0].block_height)
    }

    /// All levels, full resolution first.
    pub fn levels(&self) -> &[RasterLevel] {
        &self.levels
    }

    pub fn coarsest_level(&self) -> usize {
        self.levels.len() - 1
    }

    /// Read the pixels of `window` into an elevation grid.
    ///
    /// Only the blocks overlapping the window are decoded. Cells outside the
    /// level's bounds, NaN samples and samples equal to the nodata value are
    /// marked nodata.
    ///
    /// # Errors
    ///
    /// Returns [`ReliefError::Read`] or [`ReliefError::Io`] if a block cannot
    /// be decoded.
    pub fn read_window(&self, window: &RasterWindow) -> Result<ElevationGrid> {
        let level = self.levels.get(window.level).ok_or_else(|| ReliefError::Read {
            message: format!("no overview level {}", window.level),
        })?;
        let mut grid = ElevationGrid::nodata(window.width, window.height);

        let col_end = (window.col_off + window.width).min(level.width);
        let row_end = (window.row_off + window.height).min(level.height);
        if window.is_empty() || window.col_off >= col_end || window.row_off >= row_end {
            return Ok(grid);
        }

        let mut decoder = self.decoder_at(level)?;
        let nodata = self.nodata.map(|v| v as f32);
        let (bw, bh) = (level.block_width, level.block_height);
        let mut blocks = 0;

        for block_row in window.row_off / bh..=(row_end - 1) / bh {
            for block_col in window.col_off / bw..=(col_end - 1) / bw {
                let index = block_row * level.blocks_across() + block_col;
                let (samples, stride) = read_block(&mut decoder, index, bw)?;
                blocks += 1;

                let x0 = window.col_off.max(block_col * bw);
                let x1 = col_end.min((block_col + 1) * bw);
                let y0 = window.row_off.max(block_row * bh);
                let y1 = row_end.min((block_row + 1) * bh);

                for y in y0..y1 {
                    let line = (y - block_row * bh) * stride;
                    for x in x0..x1 {
                        let Some(&value) = samples.get(line + x - block_col * bw) else {
                            continue;
                        };
                        if !is_nodata_value(value, nodata) {
                            grid.set(x - window.col_off, y - window.row_off, value);
                        }
                    }
                }
            }
        }

        debug!(
            level = window.level,
            blocks,
            valid = grid.valid_count(),
            "Read raster window"
        );
        Ok(grid)
    }

    /// Scan every block of `level` for min, max and mean elevation.
    ///
    /// `progress` is called with `(blocks_done, blocks_total)` after each block.
    pub fn statistics<F>(&self, level: usize, mut progress: F) -> Result<RasterStats>
    where
        F: FnMut(usize, usize),
    {
        let lvl = self.levels.get(level).ok_or_else(|| ReliefError::Read {
            message: format!("no overview level {}", level),
        })?;
        let mut decoder = self.decoder_at(lvl)?;
        let nodata = self.nodata.map(|v| v as f32);
        let total = lvl.block_count();

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut valid_count = 0u64;

        for index in 0..total {
            let (block_w, block_h) = decoder.chunk_data_dimensions(index as u32);
            let (samples, stride) = read_block(&mut decoder, index, lvl.block_width)?;
            for row in 0..block_h as usize {
                for col in 0..block_w as usize {
                    let Some(&v) = samples.get(row * stride + col) else {
                        continue;
                    };
                    if is_nodata_value(v, nodata) {
                        continue;
                    }
                    let v = v as f64;
                    min = min.min(v);
                    max = max.max(v);
                    sum += v;
                    valid_count += 1;
                }
            }
            progress(index + 1, total);
        }

        let pixels = (lvl.width * lvl.height) as u64;
        let stats = if valid_count == 0 {
            RasterStats {
                level,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                valid_count: 0,
                nodata_count: pixels,
            }
        } else {
            RasterStats {
                level,
                min,
                max,
                mean: sum / valid_count as f64,
                valid_count,
                nodata_count: pixels.saturating_sub(valid_count),
            }
        };

        debug!(level, min = stats.min, max = stats.max, "Computed raster statistics");
        Ok(stats)
    }

    fn decoder_at(&self, level: &RasterLevel) -> Result<Decoder<Cursor<&[u8]>>> {
        let mut decoder = new_decoder(&self.data)?;
        if level.ifd > 0 {
            decoder.seek_to_image(level.ifd)?;
        }
        Ok(decoder)
    }
}

fn new_decoder(data: &[u8]) -> Result<Decoder<Cursor<&[u8]>>> {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = DECODE_LIMIT;
    limits.intermediate_buffer_size = DECODE_LIMIT;
    Ok(Decoder::new(Cursor::new(data))?.with_limits(limits))
}

/// Decode one block and return its samples with their row stride.
fn read_block(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    index: usize,
    block_width: usize,
) -> Result<(Vec<f32>, usize)> {
    let (data_w, data_h) = decoder.chunk_data_dimensions(index as u32);
    let samples = to_f32(decoder.read_chunk(index as u32)?);
    // Edge tiles come back either cropped or padded to the full block
    let stride = if samples.len() == (data_w * data_h) as usize {
        data_w as usize
    } else {
        block_width
    };
    Ok((samples, stride))
}

fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

/// What the first IFD tells us.
struct Header {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
    tiled: bool,
    transform: Option<GeoTransform>,
    epsg: Option<u16>,
    nodata: Option<f64>,
}

fn read_header(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Header> {
    match decoder.colortype()? {
        ColorType::Gray(_) => {}
        other => {
            return Err(ReliefError::Read {
                message: format!("expected a single-band raster, found {:?}", other),
            })
        }
    }

    let (width, height) = decoder.dimensions()?;
    let (block_width, block_height) = decoder.chunk_dimensions();
    let tiled = decoder.find_tag(Tag::TileWidth)?.is_some();

    let geokeys = match decoder.find_tag(geo_tag(GEO_KEY_DIRECTORY))? {
        Some(value) => parse_geokeys(&value.into_u16_vec()?),
        None => GeoKeys::default(),
    };

    let mut transform = read_transform(decoder)?;
    if geokeys.raster_type == Some(RASTER_PIXEL_IS_POINT) {
        // Tiepoints name pixel centres; shift to the corner convention
        transform = transform.map(|gt| GeoTransform {
            origin_x: gt.origin_x - 0.5 * gt.pixel_width,
            origin_y: gt.origin_y - 0.5 * gt.pixel_height,
            ..gt
        });
    }

    let nodata = match decoder.find_tag(geo_tag(GDAL_NODATA))? {
        Some(value) => parse_nodata(&value.into_string()?),
        None => None,
    };

    Ok(Header {
        width: width as usize,
        height: height as usize,
        block_width: block_width as usize,
        block_height: block_height as usize,
        tiled,
        transform,
        epsg: geokeys.epsg(),
        nodata,
    })
}

fn read_transform(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Option<GeoTransform>> {
    if let Some(value) = decoder.find_tag(geo_tag(MODEL_TRANSFORMATION))? {
        let m = value.into_f64_vec()?;
        if m.len() < 16 {
            return Err(ReliefError::Read {
                message: "ModelTransformation must hold 16 values".to_string(),
            });
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err(ReliefError::Read {
                message: "rotated or sheared rasters are not supported".to_string(),
            });
        }
        return Ok(Some(GeoTransform {
            origin_x: m[3],
            origin_y: m[7],
            pixel_width: m[0],
            pixel_height: m[5],
        }));
    }

    let scale = decoder.find_tag(geo_tag(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.find_tag(geo_tag(MODEL_TIEPOINT))?;
    let (Some(scale), Some(tiepoint)) = (scale, tiepoint) else {
        return Ok(None);
    };
    let (scale, tie) = (scale.into_f64_vec()?, tiepoint.into_f64_vec()?);
    if scale.len() < 2 || tie.len() < 6 || scale[0] == 0.0 || scale[1] == 0.0 {
        return Err(ReliefError::Read {
            message: "malformed ModelPixelScale or ModelTiepoint".to_string(),
        });
    }

    // Tiepoint (i, j, k, x, y, z) pins pixel (i, j) to CRS point (x, y)
    Ok(Some(GeoTransform {
        origin_x: tie[3] - tie[0] * scale[0],
        origin_y: tie[4] + tie[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: -scale[1],
    }))
}

#[derive(Debug, Default, PartialEq)]
struct GeoKeys {
    model_type: Option<u16>,
    raster_type: Option<u16>,
    geographic: Option<u16>,
    projected: Option<u16>,
}

impl GeoKeys {
    fn epsg(&self) -> Option<u16> {
        let usable = |code: Option<u16>| code.filter(|&c| c != 0 && c != USER_DEFINED);
        match self.model_type {
            Some(2) => usable(self.geographic),
            Some(1) => usable(self.projected),
            _ => usable(self.projected).or(usable(self.geographic)),
        }
    }
}

/// Parse the short-valued keys of a GeoKeyDirectory.
fn parse_geokeys(dir: &[u16]) -> GeoKeys {
    let mut keys = GeoKeys::default();
    let Some(&count) = dir.get(3) else {
        return keys;
    };
    for entry in dir[4..].chunks_exact(4).take(count as usize) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        // Location 0 means the value is stored inline
        if location != 0 {
            continue;
        }
        match id {
            GT_MODEL_TYPE => keys.model_type = Some(value),
            GT_RASTER_TYPE => keys.raster_type = Some(value),
            GEOGRAPHIC_TYPE => keys.geographic = Some(value),
            PROJECTED_CS_TYPE => keys.projected = Some(value),
            _ => {}
        }
    }
    keys
}

fn parse_nodata(text: &str) -> Option<f64> {
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match trimmed.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(value = trimmed, "Ignoring unparseable GDAL_NODATA");
            None
        }
    }
}

/// Advance to IFD `ifd` and describe it if it is a reduced-resolution image.
fn read_overview(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    ifd: usize,
    base: &RasterLevel,
) -> Result<Option<RasterLevel>> {
    decoder.next_image()?;

    let subfile = match decoder.find_tag(Tag::NewSubfileType)? {
        Some(value) => value.into_u32()?,
        None => 0,
    };
    if subfile & SUBFILE_MASK != 0 || subfile & SUBFILE_REDUCED == 0 {
        debug!(ifd, subfile, "Skipping non-overview IFD");
        return Ok(None);
    }
    if !matches!(decoder.colortype()?, ColorType::Gray(_)) {
        return Ok(None);
    }

    let (width, height) = decoder.dimensions()?;
    let (block_width, block_height) = decoder.chunk_dimensions();
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Ok(None);
    }

    Ok(Some(RasterLevel {
        ifd,
        width,
        height,
        block_width: block_width as usize,
        block_height: block_height as usize,
        tiled: decoder.find_tag(Tag::TileWidth)?.is_some(),
        transform: base.transform.scaled(
            base.width as f64 / width as f64,
            base.height as f64 / height as f64,
        ),
    }))
}
