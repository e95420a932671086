//! TIFF structure parsing: header, IFD chain, tags, and values.
//!
//! This is a purpose-built parser, not a general TIFF library: it reads
//! the directory structure and the handful of tags the slide paths
//! consume, and leaves pixel data on disk as addressed byte ranges.

mod file;
mod parser;
mod tags;
mod values;

pub use file::TiffFile;
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
