//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry (for small values) or
//! at an offset in the file (for larger values like the tile offset
//! arrays). For array values this module fetches the entire array in a
//! single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values from a TIFF file.
///
/// Combines a `RangeReader` with header information to read values
/// respecting the file's byte order and format.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    /// Create a new ValueReader.
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Get the byte order from the header.
    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Read the raw bytes of an entry's value.
    ///
    /// For inline values, returns the bytes from the entry. For offset
    /// values, fetches them from the file.
    pub fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ))
        } else {
            let offset = entry.value_offset(self.header.byte_order);
            self.reader
                .read_exact_at(offset, size as usize)
                .map_err(|e| TiffError::Io(e.to_string()))
        }
    }

    /// Read a single u32 value, converting Short to Long as needed.
    pub fn read_u32(&self, entry: &IfdEntry) -> Result<u32, TiffError> {
        if let Some(value) = entry.inline_u32(self.header.byte_order) {
            return Ok(value);
        }

        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "scalar",
                message: format!("expected count 1, got {}", entry.count),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;

        match field_type {
            FieldType::Short => Ok(byte_order.read_u16(&bytes) as u32),
            FieldType::Long => Ok(byte_order.read_u32(&bytes)),
            _ => Err(TiffError::InvalidTagValue {
                tag: "scalar",
                message: format!("expected Short or Long, got {:?}", field_type),
            }),
        }
    }

    /// Read an array of unsigned integers widened to u64.
    ///
    /// Accepts Short, Long, and Long8 element types; this covers the tile
    /// and strip offset/byte-count arrays in both TIFF and BigTIFF.
    pub fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        let bytes = self.read_bytes(entry)?;
        parse_u64_array(&bytes, field_type, entry.count, self.header.byte_order)
    }

    /// Read a Rational value (numerator/denominator pair) as f64.
    pub fn read_rational(&self, entry: &IfdEntry) -> Result<f64, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if field_type != FieldType::Rational {
            return Err(TiffError::InvalidTagValue {
                tag: "rational",
                message: format!("expected Rational, got {:?}", field_type),
            });
        }
        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "rational",
                message: format!("expected count 1, got {}", entry.count),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;
        let numerator = byte_order.read_u32(&bytes[0..4]) as f64;
        let denominator = byte_order.read_u32(&bytes[4..8]) as f64;

        if denominator == 0.0 {
            return Err(TiffError::InvalidTagValue {
                tag: "rational",
                message: "zero denominator".to_string(),
            });
        }

        Ok(numerator / denominator)
    }

    /// Read an Ascii value as a string, trimming the trailing NUL.
    pub fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read an entry's value as raw bytes (for Undefined blobs like
    /// JPEGTables).
    pub fn read_raw_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        self.read_bytes(entry)
    }
}

// =============================================================================
// Array parsing helpers
// =============================================================================

/// Parse an array of unsigned integers from raw bytes, widened to u64.
pub fn parse_u64_array(
    bytes: &[u8],
    field_type: FieldType,
    count: u64,
    byte_order: ByteOrder,
) -> Result<Vec<u64>, TiffError> {
    let elem = field_type.element_size() as usize;
    let needed = elem * count as usize;
    if bytes.len() < needed {
        return Err(TiffError::InvalidTagValue {
            tag: "array",
            message: format!("need {} bytes, have {}", needed, bytes.len()),
        });
    }

    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let chunk = &bytes[i * elem..(i + 1) * elem];
        let value = match field_type {
            FieldType::Short => byte_order.read_u16(chunk) as u64,
            FieldType::Long => byte_order.read_u32(chunk) as u64,
            FieldType::Long8 => byte_order.read_u64(chunk),
            _ => {
                return Err(TiffError::InvalidTagValue {
                    tag: "array",
                    message: format!("expected Short, Long or Long8, got {:?}", field_type),
                })
            }
        };
        values.push(value);
    }

    Ok(values)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlideError;
    use crate::format::tiff::parser::Ifd;

    struct MockReader {
        data: Vec<u8>,
    }

    impl MockReader {
        fn new(data: Vec<u8>) -> Self {
            Self { data }
        }
    }

    impl RangeReader for MockReader {
        fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, SlideError> {
            let start = offset as usize;
            if start + len > self.data.len() {
                return Err(SlideError::Io("out of bounds".to_string()));
            }
            Ok(Bytes::copy_from_slice(&self.data[start..start + len]))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "mock"
        }
    }

    fn le_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    fn inline_entry(tag_id: u16, field_type: u16, count: u64, value: [u8; 4]) -> IfdEntry {
        IfdEntry {
            tag_id,
            field_type: FieldType::from_u16(field_type),
            field_type_raw: field_type,
            count,
            value_offset_bytes: value.to_vec(),
            is_inline: true,
        }
    }

    fn offset_entry(tag_id: u16, field_type: u16, count: u64, offset: u32) -> IfdEntry {
        IfdEntry {
            tag_id,
            field_type: FieldType::from_u16(field_type),
            field_type_raw: field_type,
            count,
            value_offset_bytes: offset.to_le_bytes().to_vec(),
            is_inline: false,
        }
    }

    #[test]
    fn test_read_u32_inline_long() {
        let reader = MockReader::new(vec![]);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = inline_entry(256, 4, 1, 1024u32.to_le_bytes());
        assert_eq!(vr.read_u32(&entry).unwrap(), 1024);
    }

    #[test]
    fn test_read_u32_inline_short() {
        let reader = MockReader::new(vec![]);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = inline_entry(322, 3, 1, [0, 1, 0, 0]);
        assert_eq!(vr.read_u32(&entry).unwrap(), 256);
    }

    #[test]
    fn test_read_u64_array_at_offset() {
        // Three Longs at offset 8
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&100u32.to_le_bytes());
        data.extend_from_slice(&200u32.to_le_bytes());
        data.extend_from_slice(&300u32.to_le_bytes());

        let reader = MockReader::new(data);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = offset_entry(324, 4, 3, 8);
        assert_eq!(vr.read_u64_array(&entry).unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn test_read_u64_array_inline_shorts() {
        let reader = MockReader::new(vec![]);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        // Two Shorts fit inline in classic TIFF
        let entry = inline_entry(273, 3, 2, [0x10, 0x00, 0x20, 0x00]);
        assert_eq!(vr.read_u64_array(&entry).unwrap(), vec![0x10, 0x20]);
    }

    #[test]
    fn test_read_rational() {
        // 30000 / 3 = 10000 pixels per unit, at offset 8
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&30000u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());

        let reader = MockReader::new(data);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = offset_entry(282, 5, 1, 8);
        assert_eq!(vr.read_rational(&entry).unwrap(), 10000.0);
    }

    #[test]
    fn test_read_rational_zero_denominator() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        let reader = MockReader::new(data);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = offset_entry(282, 5, 1, 8);
        assert!(vr.read_rational(&entry).is_err());
    }

    #[test]
    fn test_read_string_trims_nul() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(b"olympus\0");

        let reader = MockReader::new(data);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = offset_entry(270, 2, 8, 8);
        assert_eq!(vr.read_string(&entry).unwrap(), "olympus");
    }

    #[test]
    fn test_read_string_inline() {
        let reader = MockReader::new(vec![]);
        let header = le_header();
        let vr = ValueReader::new(&reader, &header);

        let entry = inline_entry(270, 2, 4, *b"abc\0");
        assert_eq!(vr.read_string(&entry).unwrap(), "abc");
    }

    #[test]
    fn test_parse_u64_array_rejects_wrong_type() {
        let result = parse_u64_array(&[0u8; 8], FieldType::Rational, 1, ByteOrder::LittleEndian);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_u64_array_rejects_short_buffer() {
        let result = parse_u64_array(&[0u8; 4], FieldType::Long, 2, ByteOrder::LittleEndian);
        assert!(result.is_err());
    }

    #[test]
    fn test_value_reader_over_parsed_ifd() {
        // End-to-end: build a tiny file with one IFD and an out-of-line array
        let mut file = Vec::new();
        file.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00]);
        file.extend_from_slice(&8u32.to_le_bytes());
        // IFD: one entry, TileOffsets -> 2 Longs at offset 26
        file.extend_from_slice(&1u16.to_le_bytes());
        file.extend_from_slice(&324u16.to_le_bytes());
        file.extend_from_slice(&4u16.to_le_bytes());
        file.extend_from_slice(&2u32.to_le_bytes());
        file.extend_from_slice(&26u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes()); // next IFD
        file.extend_from_slice(&111u32.to_le_bytes());
        file.extend_from_slice(&222u32.to_le_bytes());

        let reader = MockReader::new(file.clone());
        let header = TiffHeader::parse(&file, file.len() as u64).unwrap();
        let ifd_size = Ifd::calculate_size(1, &header);
        let ifd = Ifd::parse(&file[8..8 + ifd_size], &header).unwrap();

        let vr = ValueReader::new(&reader, &header);
        let entry = &ifd.entries[0];
        assert_eq!(vr.read_u64_array(entry).unwrap(), vec![111, 222]);
    }
}
