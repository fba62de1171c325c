//! Grayscale image encoding.

use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};

use crate::error::{ExceptionCode, ReliefError, Result};
use crate::grid::ShadedGrid;

const JPEG_QUALITY: u8 = 90;

/// Supported `FORMAT` values for GetMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Png, OutputFormat::Jpeg];

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn supports_alpha(&self) -> bool {
        matches!(self, OutputFormat::Png)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl FromStr for OutputFormat {
    type Err = ReliefError;

    /// Accepts a MIME type, ignoring parameters such as `; mode=8bit`.
    fn from_str(s: &str) -> Result<Self> {
        let mime = s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/png" | "png" => Ok(OutputFormat::Png),
            "image/jpeg" | "image/jpg" | "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            _ => Err(ReliefError::parameter(
                ExceptionCode::InvalidFormat,
                format!("Unsupported image format: {}", s),
            )),
        }
    }
}

/// Encode a shaded grid as a single-band image.
///
/// With `transparent` set, PNG output carries an alpha channel that is zero
/// exactly on the nodata cells. Otherwise nodata cells take the `background`
/// gray. JPEG has no alpha, so it always uses `background`. The same grid and
/// arguments always produce the same bytes.
pub fn encode(
    grid: &ShadedGrid,
    format: OutputFormat,
    transparent: bool,
    background: u8,
) -> Result<Vec<u8>> {
    let (width, height) = (grid.width() as u32, grid.height() as u32);
    let mut out = Vec::new();

    match format {
        OutputFormat::Png if transparent => {
            let pixels: Vec<u8> = grid
                .to_bytes(0)
                .into_iter()
                .zip(grid.mask())
                .flat_map(|(v, &ok)| [v, if ok { 255 } else { 0 }])
                .collect();
            png_encoder(&mut out)
                .write_image(&pixels, width, height, ColorType::La8)
                .map_err(encode_error)?;
        }
        OutputFormat::Png => {
            png_encoder(&mut out)
                .write_image(&grid.to_bytes(background), width, height, ColorType::L8)
                .map_err(encode_error)?;
        }
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
                .write_image(&grid.to_bytes(background), width, height, ColorType::L8)
                .map_err(encode_error)?;
        }
    }

    Ok(out)
}

fn png_encoder(out: &mut Vec<u8>) -> PngEncoder<&mut Vec<u8>> {
    PngEncoder::new_with_quality(out, CompressionType::Default, FilterType::Adaptive)
}

fn encode_error(err: image::ImageError) -> ReliefError {
    ReliefError::Encode {
        message: err.to_string(),
    }
}
