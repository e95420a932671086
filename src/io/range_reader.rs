use bytes::Bytes;

use crate::error::SlideError;

/// Positioned byte access to a slide payload.
///
/// Everything above the I/O layer reads through this trait: the parsers
/// ask for exact ranges (a header here, a tile directory there) and never
/// see the file as a stream. Implementations are shared between reader
/// threads, so they must be `Send + Sync` and keep their own position
/// state internal.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Short reads are errors: a range that runs past the end of the
    /// resource means the file and its own declared layout disagree.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, SlideError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Stable identifier for log lines (typically the file path).
    fn identifier(&self) -> &str;
}

// =============================================================================
// Fixed-width integer readers
// =============================================================================
//
// Both container formats are built from fixed-layout records: the ETS
// container is always little-endian, while TIFF declares its byte order
// in the header and the parser picks a reader side accordingly. Each
// reader decodes one integer from the front of a slice; callers index to
// the field first. A slice shorter than the integer panics, which the
// parsers rule out with explicit length checks before cursoring.

macro_rules! int_reader {
    ($name:ident, $ty:ty, $from:ident, $order:literal) => {
        #[doc = concat!("Decode a ", $order, " `", stringify!($ty), "` from the front of a slice.")]
        #[inline]
        pub fn $name(bytes: &[u8]) -> $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(&bytes[..WIDTH]);
            <$ty>::$from(raw)
        }
    };
}

int_reader!(read_u16_le, u16, from_le_bytes, "little-endian");
int_reader!(read_u16_be, u16, from_be_bytes, "big-endian");
int_reader!(read_u32_le, u32, from_le_bytes, "little-endian");
int_reader!(read_u32_be, u32, from_be_bytes, "big-endian");
int_reader!(read_u64_le, u64, from_le_bytes, "little-endian");
int_reader!(read_u64_be, u64, from_be_bytes, "big-endian");
