use thiserror::Error;

/// Errors reported by the public slide surface.
///
/// Every failure the library can produce maps onto one of these kinds.
/// Detection failures are reported as `NotRecognized` and never corrupt
/// state; header-validation and codec failures are `Decode`; missing
/// capabilities (unsupported codec, z-stacks) are `Unsupported`.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// The path does not point at a recognized slide format
    #[error("Not a recognized slide: {0}")]
    NotRecognized(String),

    /// File open, read, or seek failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Header validation or codec failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// The file is valid but uses a capability the reader does not have
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Out-of-range level, plane, or tile indices
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for SlideError {
    fn from(err: std::io::Error) -> Self {
        SlideError::Io(err.to_string())
    }
}

impl From<TiffError> for SlideError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(msg) => SlideError::Io(msg),
            TiffError::UnsupportedCompression(_) => SlideError::Unsupported(err.to_string()),
            other => SlideError::Decode(other.to_string()),
        }
    }
}

impl From<EtsError> for SlideError {
    fn from(err: EtsError) -> Self {
        match err {
            EtsError::Io(msg) => SlideError::Io(msg),
            EtsError::ZStackUnsupported(_) => SlideError::Unsupported(err.to_string()),
            other => SlideError::Decode(other.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// TIFF directory uses a compression codec the reader cannot decode
    #[error("Unsupported TIFF compression: {0}")]
    UnsupportedCompression(u16),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

impl From<std::io::Error> for TiffError {
    fn from(err: std::io::Error) -> Self {
        TiffError::Io(err.to_string())
    }
}

/// Errors that can occur when parsing the SIS/ETS binary container
#[derive(Debug, Clone, Error)]
pub enum EtsError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(String),

    /// Magic string mismatch in the SIS preamble or ETS descriptor
    #[error("Invalid {section} magic: expected {expected:?}")]
    InvalidMagic {
        section: &'static str,
        expected: &'static str,
    },

    /// A fixed-layout header field failed its sanity check
    #[error("Invalid {field}: expected {expected}, got {actual}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        actual: u64,
    },

    /// The container declares a z-stack depth greater than one
    #[error("Z-stack depth {0} is not supported")]
    ZStackUnsupported(u32),

    /// The container is truncated relative to its own declared layout
    #[error("Truncated container: {0}")]
    Truncated(String),
}

impl From<std::io::Error> for EtsError {
    fn from(err: std::io::Error) -> Self {
        EtsError::Io(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiff_error_maps_to_decode() {
        let err: SlideError = TiffError::InvalidMagic(0x1234).into();
        assert!(matches!(err, SlideError::Decode(_)));
    }

    #[test]
    fn test_tiff_io_error_maps_to_io() {
        let err: SlideError = TiffError::Io("read failed".to_string()).into();
        assert!(matches!(err, SlideError::Io(_)));
    }

    #[test]
    fn test_unsupported_compression_maps_to_unsupported() {
        let err: SlideError = TiffError::UnsupportedCompression(5).into();
        assert!(matches!(err, SlideError::Unsupported(_)));
    }

    #[test]
    fn test_zstack_maps_to_unsupported() {
        let err: SlideError = EtsError::ZStackUnsupported(4).into();
        assert!(matches!(err, SlideError::Unsupported(_)));
        assert!(err.to_string().contains("Z-stack"));
    }

    #[test]
    fn test_ets_field_error_message() {
        let err = EtsError::InvalidField {
            field: "headerSize",
            expected: "64",
            actual: 32,
        };
        assert_eq!(err.to_string(), "Invalid headerSize: expected 64, got 32");
    }
}
