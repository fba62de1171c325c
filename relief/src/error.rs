//! Error types for the relief library.
//!
//! Every failure in the rendering pipeline is one of four kinds. Parameter and
//! CRS errors are the client's fault, I/O errors are the server's, and source
//! errors only happen while opening the raster at startup.

use std::path::PathBuf;
use thiserror::Error;

/// WMS exception codes used in `ServiceExceptionReport` documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    InvalidParameterValue,
    MissingParameterValue,
    OperationNotSupported,
    InvalidFormat,
    LayerNotDefined,
    StyleNotDefined,
    InvalidPoint,
    InvalidCrs,
    NoApplicableCode,
}

impl ExceptionCode {
    /// The code as it appears in the `code` attribute of a `ServiceException`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionCode::InvalidParameterValue => "InvalidParameterValue",
            ExceptionCode::MissingParameterValue => "MissingParameterValue",
            ExceptionCode::OperationNotSupported => "OperationNotSupported",
            ExceptionCode::InvalidFormat => "InvalidFormat",
            ExceptionCode::LayerNotDefined => "LayerNotDefined",
            ExceptionCode::StyleNotDefined => "StyleNotDefined",
            ExceptionCode::InvalidPoint => "InvalidPoint",
            ExceptionCode::InvalidCrs => "InvalidCRS",
            ExceptionCode::NoApplicableCode => "NoApplicableCode",
        }
    }
}

/// Errors that can occur while serving a WMS request.
#[derive(Error, Debug)]
pub enum ReliefError {
    /// Missing or malformed WMS request parameter.
    #[error("{message}")]
    Parameter {
        code: ExceptionCode,
        message: String,
    },

    /// Unknown, malformed or unsupported coordinate reference system.
    #[error("CRS error: {message}")]
    Crs { message: String },

    /// Reading raster samples failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The raster could not be decoded while reading a window.
    #[error("Raster read failed: {message}")]
    Read { message: String },

    /// The raster could not be opened or is not a usable elevation COG.
    #[error("Cannot open raster {path}: {message}")]
    Source { path: PathBuf, message: String },

    /// Image encoding failed.
    #[error("Encoding failed: {message}")]
    Encode { message: String },
}

impl ReliefError {
    /// Shorthand for an `InvalidParameterValue` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Parameter {
            code: ExceptionCode::InvalidParameterValue,
            message: message.into(),
        }
    }

    /// Shorthand for a `MissingParameterValue` error naming the parameter.
    pub fn missing(name: &str) -> Self {
        Self::Parameter {
            code: ExceptionCode::MissingParameterValue,
            message: format!("Missing required parameter: {}", name.to_uppercase()),
        }
    }

    pub fn parameter(code: ExceptionCode, message: impl Into<String>) -> Self {
        Self::Parameter {
            code,
            message: message.into(),
        }
    }

    pub fn crs(message: impl Into<String>) -> Self {
        Self::Crs {
            message: message.into(),
        }
    }

    pub fn open_failed<P: Into<PathBuf>>(path: P, message: impl Into<String>) -> Self {
        Self::Source {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The WMS exception code reported to the client.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            ReliefError::Parameter { code, .. } => *code,
            ReliefError::Crs { .. } => ExceptionCode::InvalidCrs,
            _ => ExceptionCode::NoApplicableCode,
        }
    }

    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReliefError::Parameter { .. } | ReliefError::Crs { .. })
    }
}

impl From<tiff::TiffError> for ReliefError {
    fn from(err: tiff::TiffError) -> Self {
        match err {
            tiff::TiffError::IoError(e) => ReliefError::Io(e),
            other => ReliefError::Read {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias using [`ReliefError`].
pub type Result<T> = std::result::Result<T, ReliefError>;
