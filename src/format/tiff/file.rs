//! Whole-file TIFF directory access.
//!
//! Walks the next-IFD chain once at open time and keeps the parsed
//! directories in memory. Slide containers have at most a handful of
//! directories; the arrays behind the tags stay on disk until asked for.

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Safety limit on the number of IFDs to follow.
const MAX_IFDS: usize = 100;

/// A TIFF file with all of its directories parsed.
#[derive(Debug, Clone)]
pub struct TiffFile {
    /// The file header
    pub header: TiffHeader,

    /// Directories in chain order
    pub ifds: Vec<Ifd>,
}

impl TiffFile {
    /// Parse the header and every directory of a TIFF file.
    pub fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        if reader.size() < BIGTIFF_HEADER_SIZE as u64 {
            // Classic headers are smaller, but a file this short cannot
            // hold a directory either
            return Err(TiffError::FileTooSmall {
                required: BIGTIFF_HEADER_SIZE as u64,
                actual: reader.size(),
            });
        }

        let header_bytes = reader
            .read_exact_at(0, BIGTIFF_HEADER_SIZE)
            .map_err(|e| TiffError::Io(e.to_string()))?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            let count_size = header.ifd_count_size();
            let count_bytes = reader
                .read_exact_at(offset, count_size)
                .map_err(|e| TiffError::Io(e.to_string()))?;

            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            let ifd_size = Ifd::calculate_size(entry_count, &header);
            let ifd_bytes = reader
                .read_exact_at(offset, ifd_size)
                .map_err(|e| TiffError::Io(e.to_string()))?;
            let ifd = Ifd::parse(&ifd_bytes, &header)?;

            let next_offset = ifd.next_ifd_offset;
            ifds.push(ifd);
            offset = next_offset;
        }

        Ok(TiffFile { header, ifds })
    }

    /// Number of directories in the file.
    pub fn directory_count(&self) -> usize {
        self.ifds.len()
    }

    /// Get a directory by index.
    pub fn directory(&self, index: usize) -> Option<&Ifd> {
        self.ifds.get(index)
    }

    /// Read the ImageDescription string of a directory, if present.
    pub fn image_description<R: RangeReader>(
        &self,
        reader: &R,
        index: usize,
    ) -> Result<Option<String>, TiffError> {
        let ifd = match self.ifds.get(index) {
            Some(ifd) => ifd,
            None => return Ok(None),
        };
        let entry = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
            Some(e) => e,
            None => return Ok(None),
        };

        let vr = ValueReader::new(reader, &self.header);
        Ok(Some(vr.read_string(entry)?))
    }

    /// Read microns-per-pixel from a directory's resolution tags.
    ///
    /// Returns `(mpp_x, mpp_y)` when both resolution tags are present and
    /// the unit is metric or imperial; `None` otherwise.
    pub fn microns_per_pixel<R: RangeReader>(
        &self,
        reader: &R,
        index: usize,
    ) -> Result<Option<(f64, f64)>, TiffError> {
        let ifd = match self.ifds.get(index) {
            Some(ifd) => ifd,
            None => return Ok(None),
        };

        let unit = ifd
            .get_entry_by_tag(TiffTag::ResolutionUnit)
            .and_then(|e| e.inline_u32(self.header.byte_order))
            .unwrap_or(2);

        // pixels-per-unit -> microns-per-pixel
        let factor = match unit {
            2 => 25400.0, // inch
            3 => 10000.0, // centimeter
            _ => return Ok(None),
        };

        let vr = ValueReader::new(reader, &self.header);
        let x_entry = ifd.get_entry_by_tag(TiffTag::XResolution);
        let y_entry = ifd.get_entry_by_tag(TiffTag::YResolution);

        match (x_entry, y_entry) {
            (Some(x), Some(y)) => {
                let xres = vr.read_rational(x)?;
                let yres = vr.read_rational(y)?;
                if xres <= 0.0 || yres <= 0.0 {
                    return Ok(None);
                }
                Ok(Some((factor / xres, factor / yres)))
            }
            _ => Ok(None),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
