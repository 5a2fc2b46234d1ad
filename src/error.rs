//! Error taxonomy shared by every stage.
//!
//! Each error carries a machine-readable [`ErrorKind`] and a human message.
//! Nothing in this crate retries internally; callers decide what to do with
//! each kind.

use std::fmt;

/// Machine-readable error discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    NoDataFound,
    PartialFetchFailure,
    NamingProtocolViolation,
    GridMismatch,
    ObjectNotFound,
    Storage,
    Projection,
    InvalidData,
    Encoding,
    Io,
}

impl ErrorKind {
    /// Stable identifier used in structured error output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid_parameter",
            Self::NoDataFound => "no_data_found",
            Self::PartialFetchFailure => "partial_fetch_failure",
            Self::NamingProtocolViolation => "naming_protocol_violation",
            Self::GridMismatch => "grid_mismatch",
            Self::ObjectNotFound => "object_not_found",
            Self::Storage => "storage",
            Self::Projection => "projection",
            Self::InvalidData => "invalid_data",
            Self::Encoding => "encoding",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all tile-grid operations
#[derive(Debug)]
pub enum TileGridError {
    /// Malformed center point, distances or configuration value
    InvalidParameter(String),
    /// A catalog search or listing returned nothing to work on
    NoDataFound(String),
    /// A band could not be read from any scene
    PartialFetchFailure { band: String, message: String },
    /// A key under a transaction prefix does not follow the naming convention
    NamingProtocolViolation(String),
    /// Two tile sets of the same transaction disagree on grid shape
    GridMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// Object store key does not exist
    ObjectNotFound(String),
    /// Object store backend failure
    Storage(String),
    /// Coordinate reprojection failure
    Projection(String),
    /// Raster data is inconsistent with what the operation expects
    InvalidData(String),
    /// GeoTIFF / PNG / JSON encoding or decoding failure
    Encoding(String),
    /// I/O error
    Io(std::io::Error),
}

impl TileGridError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::NoDataFound(_) => ErrorKind::NoDataFound,
            Self::PartialFetchFailure { .. } => ErrorKind::PartialFetchFailure,
            Self::NamingProtocolViolation(_) => ErrorKind::NamingProtocolViolation,
            Self::GridMismatch { .. } => ErrorKind::GridMismatch,
            Self::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Projection(_) => ErrorKind::Projection,
            Self::InvalidData(_) => ErrorKind::InvalidData,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}

impl fmt::Display for TileGridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter(e) => write!(f, "Invalid parameter: {e}"),
            Self::NoDataFound(e) => write!(f, "No data found: {e}"),
            Self::PartialFetchFailure { band, message } => {
                write!(f, "Failed to fetch band {band}: {message}")
            }
            Self::NamingProtocolViolation(key) => {
                write!(f, "Key does not follow the tile naming convention: {key}")
            }
            Self::GridMismatch { expected, found } => write!(
                f,
                "Grid shape mismatch: expected {}x{}, found {}x{}",
                expected.0, expected.1, found.0, found.1
            ),
            Self::ObjectNotFound(key) => write!(f, "Object not found: {key}"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
            Self::Projection(e) => write!(f, "Projection error: {e}"),
            Self::InvalidData(e) => write!(f, "Invalid data: {e}"),
            Self::Encoding(e) => write!(f, "Encoding error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TileGridError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TileGridError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tiff::TiffError> for TileGridError {
    fn from(e: tiff::TiffError) -> Self {
        Self::Encoding(format!("TIFF: {e}"))
    }
}

impl From<image::ImageError> for TileGridError {
    fn from(e: image::ImageError) -> Self {
        Self::Encoding(format!("PNG: {e}"))
    }
}

impl From<serde_json::Error> for TileGridError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(format!("JSON: {e}"))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TileGridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = TileGridError::invalid_parameter("bad center");
        assert_eq!(err.kind().as_str(), "invalid_parameter");

        let err = TileGridError::GridMismatch {
            expected: (3, 3),
            found: (2, 3),
        };
        assert_eq!(err.kind(), ErrorKind::GridMismatch);
        assert_eq!(err.to_string(), "Grid shape mismatch: expected 3x3, found 2x3");
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error;

        let err: TileGridError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.source().is_some());
    }
}
