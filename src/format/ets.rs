//! Olympus SIS/ETS binary container parsing.
//!
//! An `.ets` payload is a fixed 64-byte SIS preamble, a 228-byte ETS
//! descriptor at offset 64, a tile directory of 36-byte records at
//! `offset_tiles`, and compressed tile payloads at arbitrary offsets.
//! All integers are little-endian.
//!
//! ```text
//! offset 0:             "SIS\0" | headerSize | version | Ndim | etsoffset | ...
//! offset 64:            "ETS\0" | version | pixelType | sizeC | colorspace | ...
//! offset offset_tiles:  ntiles x { reserved, coord[3], level, offset, length, reserved }
//! ```
//!
//! Header sanity checks are fatal: a container that fails validation is
//! rejected at open rather than read on faith.

use std::collections::HashMap;

use crate::error::EtsError;
use crate::io::{read_u32_le, read_u64_le, RangeReader};

/// SIS preamble magic.
pub const SIS_MAGIC: &[u8; 4] = b"SIS\0";

/// ETS descriptor magic.
pub const ETS_MAGIC: &[u8; 4] = b"ETS\0";

/// Size of the SIS preamble in bytes.
pub const SIS_HEADER_SIZE: usize = 64;

/// Size of the ETS descriptor in bytes.
pub const ETS_HEADER_SIZE: usize = 228;

/// Size of one tile directory record in bytes.
pub const TILE_RECORD_SIZE: usize = 36;

// =============================================================================
// Enumerated descriptor fields
// =============================================================================

/// Pixel storage type of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    /// 2: unsigned 8-bit samples
    Uint8,
    /// 4: signed 32-bit samples
    Int32,
}

impl PixelType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(PixelType::Uint8),
            4 => Some(PixelType::Int32),
            _ => None,
        }
    }
}

/// Acquisition colorspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// 1: fluorescence (one grayscale plane per channel)
    Fluorescence,
    /// 4: brightfield RGB
    Brightfield,
}

impl ColorSpace {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(ColorSpace::Fluorescence),
            4 => Some(ColorSpace::Brightfield),
            _ => None,
        }
    }
}

// =============================================================================
// SisHeader
// =============================================================================

/// The fixed 64-byte SIS preamble.
#[derive(Debug, Clone, Copy)]
pub struct SisHeader {
    /// Declared header size; must be 64
    pub header_size: u32,

    /// Container version (not validated; observed 2)
    pub version: u32,

    /// Dimensionality; 4 for brightfield, 6 for fluorescence stacks
    pub ndim: u32,

    /// Offset of the ETS descriptor; must be 64
    pub ets_offset: u64,

    /// Size of the ETS descriptor; must be 228
    pub ets_nbytes: u32,

    /// Offset of the tile directory
    pub offset_tiles: u64,

    /// Number of tile directory records
    pub ntiles: u32,
}

impl SisHeader {
    /// Parse and validate the SIS preamble from its 64 raw bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, EtsError> {
        if buf.len() < SIS_HEADER_SIZE {
            return Err(EtsError::Truncated(format!(
                "SIS preamble needs {} bytes, have {}",
                SIS_HEADER_SIZE,
                buf.len()
            )));
        }

        if &buf[0..4] != SIS_MAGIC {
            return Err(EtsError::InvalidMagic {
                section: "SIS",
                expected: "SIS\\0",
            });
        }

        let header_size = read_u32_le(&buf[4..]);
        if header_size != SIS_HEADER_SIZE as u32 {
            return Err(EtsError::InvalidField {
                field: "headerSize",
                expected: "64",
                actual: header_size as u64,
            });
        }

        let version = read_u32_le(&buf[8..]);

        let ndim = read_u32_le(&buf[12..]);
        if ndim != 4 && ndim != 6 {
            return Err(EtsError::InvalidField {
                field: "Ndim",
                expected: "4 or 6",
                actual: ndim as u64,
            });
        }

        let ets_offset = read_u64_le(&buf[16..]);
        if ets_offset != SIS_HEADER_SIZE as u64 {
            return Err(EtsError::InvalidField {
                field: "etsoffset",
                expected: "64",
                actual: ets_offset,
            });
        }

        let ets_nbytes = read_u32_le(&buf[24..]);
        if ets_nbytes != ETS_HEADER_SIZE as u32 {
            return Err(EtsError::InvalidField {
                field: "etsnbytes",
                expected: "228",
                actual: ets_nbytes as u64,
            });
        }

        let offset_tiles = read_u64_le(&buf[32..]);
        let ntiles = read_u32_le(&buf[40..]);

        Ok(SisHeader {
            header_size,
            version,
            ndim,
            ets_offset,
            ets_nbytes,
            offset_tiles,
            ntiles,
        })
    }
}

// =============================================================================
// EtsHeader
// =============================================================================

/// The 228-byte ETS descriptor.
///
/// Only the fields the reader consumes are kept; the descriptor's trailing
/// reserved bytes are accounted for by parsing from the full 228-byte
/// slice, so the file position after it is deterministic.
#[derive(Debug, Clone, Copy)]
pub struct EtsHeader {
    /// Descriptor version (not validated)
    pub version: u32,

    /// Sample storage type
    pub pixel_type: PixelType,

    /// Channel count per tile: 1 (grayscale) or 3 (RGB)
    pub size_c: u32,

    /// Acquisition colorspace
    pub colorspace: ColorSpace,

    /// Tile compression tag (2 = JPEG, 3 = JPEG 2000)
    pub compression: u32,

    /// Codec quality setting
    pub quality: u32,

    /// Tile width in pixels
    pub dim_x: u32,

    /// Tile height in pixels
    pub dim_y: u32,

    /// Z depth; must be 1
    pub dim_z: u32,

    /// Background fill color, one byte per channel
    pub background_color: [u8; 3],

    /// Whether the container carries a multi-level pyramid
    pub use_pyramid: bool,
}

impl EtsHeader {
    /// Parse and validate the ETS descriptor from its 228 raw bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, EtsError> {
        if buf.len() < ETS_HEADER_SIZE {
            return Err(EtsError::Truncated(format!(
                "ETS descriptor needs {} bytes, have {}",
                ETS_HEADER_SIZE,
                buf.len()
            )));
        }

        if &buf[0..4] != ETS_MAGIC {
            return Err(EtsError::InvalidMagic {
                section: "ETS",
                expected: "ETS\\0",
            });
        }

        let version = read_u32_le(&buf[4..]);

        let pixel_type_raw = read_u32_le(&buf[8..]);
        let pixel_type = PixelType::from_u32(pixel_type_raw).ok_or(EtsError::InvalidField {
            field: "pixelType",
            expected: "2 (uint8) or 4 (int32)",
            actual: pixel_type_raw as u64,
        })?;

        let size_c = read_u32_le(&buf[12..]);
        if size_c != 1 && size_c != 3 {
            return Err(EtsError::InvalidField {
                field: "sizeC",
                expected: "1 or 3",
                actual: size_c as u64,
            });
        }

        let colorspace_raw = read_u32_le(&buf[16..]);
        let colorspace = ColorSpace::from_u32(colorspace_raw).ok_or(EtsError::InvalidField {
            field: "colorspace",
            expected: "1 (fluorescence) or 4 (brightfield)",
            actual: colorspace_raw as u64,
        })?;

        let compression = read_u32_le(&buf[20..]);
        if compression != 2 && compression != 3 {
            return Err(EtsError::InvalidField {
                field: "compression",
                expected: "2 (JPEG) or 3 (JP2)",
                actual: compression as u64,
            });
        }

        let quality = read_u32_le(&buf[24..]);
        let dim_x = read_u32_le(&buf[28..]);
        let dim_y = read_u32_le(&buf[32..]);

        let dim_z = read_u32_le(&buf[36..]);
        if dim_z != 1 {
            return Err(EtsError::ZStackUnsupported(dim_z));
        }

        // 17 reserved words separate the geometry from the background
        // color array
        let mut cursor = 40 + 17 * 4;

        let mut background_color = [0u8; 3];
        match pixel_type {
            PixelType::Uint8 => {
                for i in 0..size_c as usize {
                    background_color[i] = buf[cursor + i];
                }
                cursor += size_c as usize;
            }
            PixelType::Int32 => {
                for i in 0..size_c as usize {
                    background_color[i] = read_u32_le(&buf[cursor + i * 4..]) as u8;
                }
                cursor += size_c as usize * 4;
            }
        }

        // remaining background slots, then component order
        cursor += (10 - size_c as usize) * 4;
        cursor += 4;

        let use_pyramid = read_u32_le(&buf[cursor..]) != 0;

        Ok(EtsHeader {
            version,
            pixel_type,
            size_c,
            colorspace,
            compression,
            quality,
            dim_x,
            dim_y,
            dim_z,
            background_color,
            use_pyramid,
        })
    }
}

// =============================================================================
// Tile directory
// =============================================================================

/// One 36-byte tile directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRecord {
    /// (x index, y index, channel index)
    pub coord: [u32; 3],

    /// Pyramid level as stored on disk
    pub level: u32,

    /// Byte offset of the compressed payload
    pub offset: u64,

    /// Byte length of the compressed payload
    pub length: u32,
}

impl TileRecord {
    /// Parse a single record from its 36 raw bytes.
    pub fn parse(buf: &[u8]) -> TileRecord {
        TileRecord {
            coord: [
                read_u32_le(&buf[4..]),
                read_u32_le(&buf[8..]),
                read_u32_le(&buf[12..]),
            ],
            level: read_u32_le(&buf[16..]),
            offset: read_u64_le(&buf[20..]),
            length: read_u32_le(&buf[28..]),
        }
    }
}

/// Byte location of a compressed tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    pub offset: u64,
    pub length: u32,
}

/// Hashed tile index over the directory records.
///
/// Keyed on `(level, x, y, channel)` so the per-tile lookup on the paint
/// path is O(1) instead of a scan over the whole directory.
#[derive(Debug, Clone)]
pub struct TileIndex {
    tiles: HashMap<(u32, u32, u32, u32), TileLocation>,
    channels: u32,
    level_count: u32,
    extents: Vec<(u32, u32)>,
}

impl TileIndex {
    /// Build the index from the directory records.
    pub fn build(records: &[TileRecord]) -> Result<Self, EtsError> {
        if records.is_empty() {
            return Err(EtsError::Truncated("tile directory is empty".to_string()));
        }

        let mut tiles = HashMap::with_capacity(records.len());
        let mut max_channel = 0u32;
        let mut max_level = 0u32;

        for r in records {
            tiles.insert((r.level, r.coord[0], r.coord[1], r.coord[2]), TileLocation {
                offset: r.offset,
                length: r.length,
            });
            max_channel = max_channel.max(r.coord[2]);
            max_level = max_level.max(r.level);
        }

        let level_count = max_level + 1;

        // Per-level grid extents: (tilexmax + 1, tileymax + 1)
        let mut extents = vec![(0u32, 0u32); level_count as usize];
        for r in records {
            let e = &mut extents[r.level as usize];
            e.0 = e.0.max(r.coord[0] + 1);
            e.1 = e.1.max(r.coord[1] + 1);
        }

        // Highest resolution first. Levels are expected to shrink with
        // their on-disk index already; the sort enforces it.
        extents.sort_by(|a, b| b.cmp(a));

        Ok(TileIndex {
            tiles,
            channels: max_channel + 1,
            level_count,
            extents,
        })
    }

    /// Look up a tile by its directory key.
    pub fn find_tile(&self, level: u32, x: u32, y: u32, channel: u32) -> Option<TileLocation> {
        self.tiles.get(&(level, x, y, channel)).copied()
    }

    /// Number of channels (`max(coord[2]) + 1`; 1 when absent).
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Number of pyramid levels (`max(level) + 1`).
    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    /// Tile grid extent of a level, highest resolution first.
    pub fn level_extent(&self, level: usize) -> Option<(u32, u32)> {
        self.extents.get(level).copied()
    }

    /// Number of indexed tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

// =============================================================================
// EtsVolume
// =============================================================================

/// Pixel geometry of one ETS pyramid level.
#[derive(Debug, Clone, Copy)]
pub struct EtsLevel {
    /// Level id used in tile directory keys
    pub raw_level: u32,

    /// Level width in pixels
    pub width: u64,

    /// Level height in pixels
    pub height: u64,

    /// Tile columns covering the level
    pub tiles_across: u32,

    /// Tile rows covering the level
    pub tiles_down: u32,

    /// Downsample relative to level 0
    pub downsample: f64,
}

/// A fully parsed ETS container: headers, tile index, level geometry.
#[derive(Debug, Clone)]
pub struct EtsVolume {
    pub sis: SisHeader,
    pub ets: EtsHeader,
    pub index: TileIndex,
    pub levels: Vec<EtsLevel>,
}

impl EtsVolume {
    /// Read and validate a whole container through a range reader.
    pub fn read<R: RangeReader>(reader: &R) -> Result<Self, EtsError> {
        let sis_bytes = reader
            .read_exact_at(0, SIS_HEADER_SIZE)
            .map_err(|e| EtsError::Io(e.to_string()))?;
        let sis = SisHeader::parse(&sis_bytes)?;

        let ets_bytes = reader
            .read_exact_at(sis.ets_offset, ETS_HEADER_SIZE)
            .map_err(|e| EtsError::Io(e.to_string()))?;
        let ets = EtsHeader::parse(&ets_bytes)?;

        let dir_len = sis.ntiles as usize * TILE_RECORD_SIZE;
        let dir_bytes = reader
            .read_exact_at(sis.offset_tiles, dir_len)
            .map_err(|e| EtsError::Io(e.to_string()))?;

        let mut records = Vec::with_capacity(sis.ntiles as usize);
        for i in 0..sis.ntiles as usize {
            records.push(TileRecord::parse(
                &dir_bytes[i * TILE_RECORD_SIZE..(i + 1) * TILE_RECORD_SIZE],
            ));
        }

        let index = TileIndex::build(&records)?;
        let levels = Self::build_levels(&ets, &index);

        Ok(EtsVolume {
            sis,
            ets,
            index,
            levels,
        })
    }

    /// Derive pixel geometry for each level.
    ///
    /// The descriptor does not carry per-level dimensions: level 0 spans
    /// its full tile grid, and each further level is the ceiling half of
    /// the previous one. The downsample between adjacent levels is
    /// therefore exactly 2.
    fn build_levels(ets: &EtsHeader, index: &TileIndex) -> Vec<EtsLevel> {
        let mut levels = Vec::with_capacity(index.level_count() as usize);
        let mut width = 0u64;
        let mut height = 0u64;

        for i in 0..index.level_count() {
            if i == 0 {
                let (ex, ey) = index.level_extent(0).unwrap_or((1, 1));
                width = ets.dim_x as u64 * ex as u64;
                height = ets.dim_y as u64 * ey as u64;
            } else {
                width = width.div_ceil(2).max(1);
                height = height.div_ceil(2).max(1);
            }

            let tiles_across = (width.div_ceil(ets.dim_x as u64)).max(1) as u32;
            let tiles_down = (height.div_ceil(ets.dim_y as u64)).max(1) as u32;

            levels.push(EtsLevel {
                raw_level: i,
                width,
                height,
                tiles_across,
                tiles_down,
                downsample: 2f64.powi(i as i32),
            });
        }

        levels
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlideError;
    use bytes::Bytes;

    pub(crate) fn sis_bytes(ndim: u32, offset_tiles: u64, ntiles: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SIS_HEADER_SIZE);
        buf.extend_from_slice(SIS_MAGIC);
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes()); // version
        buf.extend_from_slice(&ndim.to_le_bytes());
        buf.extend_from_slice(&64u64.to_le_bytes());
        buf.extend_from_slice(&228u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.extend_from_slice(&offset_tiles.to_le_bytes());
        buf.extend_from_slice(&ntiles.to_le_bytes());
        buf.resize(SIS_HEADER_SIZE, 0);
        buf
    }

    pub(crate) fn ets_bytes(
        pixel_type: u32,
        size_c: u32,
        colorspace: u32,
        compression: u32,
        dim_x: u32,
        dim_y: u32,
        dim_z: u32,
        background: &[u8],
        use_pyramid: bool,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ETS_HEADER_SIZE);
        buf.extend_from_slice(ETS_MAGIC);
        buf.extend_from_slice(&0x30001u32.to_le_bytes()); // version
        buf.extend_from_slice(&pixel_type.to_le_bytes());
        buf.extend_from_slice(&size_c.to_le_bytes());
        buf.extend_from_slice(&colorspace.to_le_bytes());
        buf.extend_from_slice(&compression.to_le_bytes());
        buf.extend_from_slice(&90u32.to_le_bytes()); // quality
        buf.extend_from_slice(&dim_x.to_le_bytes());
        buf.extend_from_slice(&dim_y.to_le_bytes());
        buf.extend_from_slice(&dim_z.to_le_bytes());
        buf.resize(40 + 17 * 4, 0); // reserved words

        // background color array
        if pixel_type == 2 {
            buf.extend_from_slice(background);
        } else {
            for &b in background {
                buf.extend_from_slice(&(b as u32).to_le_bytes());
            }
        }
        buf.resize(buf.len() + (10 - size_c as usize) * 4, 0);
        buf.extend_from_slice(&0u32.to_le_bytes()); // component order
        buf.extend_from_slice(&(use_pyramid as u32).to_le_bytes());
        buf.resize(ETS_HEADER_SIZE, 0);
        buf
    }

    pub(crate) fn tile_record_bytes(
        x: u32,
        y: u32,
        channel: u32,
        level: u32,
        offset: u64,
        length: u32,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TILE_RECORD_SIZE);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf.extend_from_slice(&channel.to_le_bytes());
        buf.extend_from_slice(&level.to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    struct MemReader(Vec<u8>);

    impl RangeReader for MemReader {
        fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, SlideError> {
            let start = offset as usize;
            if start + len > self.0.len() {
                return Err(SlideError::Io("out of bounds".to_string()));
            }
            Ok(Bytes::copy_from_slice(&self.0[start..start + len]))
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }

        fn identifier(&self) -> &str {
            "mem"
        }
    }

    /// Assemble a complete in-memory container with the given tiles.
    fn container(tiles: &[(u32, u32, u32, u32)], dim: u32) -> Vec<u8> {
        let dir_offset = (SIS_HEADER_SIZE + ETS_HEADER_SIZE) as u64;
        let mut buf = sis_bytes(4, dir_offset, tiles.len() as u32);
        buf.extend_from_slice(&ets_bytes(2, 1, 4, 2, dim, dim, 1, &[255], true));
        for &(x, y, c, lvl) in tiles {
            buf.extend_from_slice(&tile_record_bytes(x, y, c, lvl, 0, 0));
        }
        buf
    }

    // -------------------------------------------------------------------------
    // SisHeader tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_sis_parse_ok() {
        let sis = SisHeader::parse(&sis_bytes(4, 292, 4)).unwrap();
        assert_eq!(sis.header_size, 64);
        assert_eq!(sis.ndim, 4);
        assert_eq!(sis.ets_offset, 64);
        assert_eq!(sis.ets_nbytes, 228);
        assert_eq!(sis.offset_tiles, 292);
        assert_eq!(sis.ntiles, 4);
    }

    #[test]
    fn test_sis_bad_magic() {
        let mut buf = sis_bytes(4, 292, 4);
        buf[0] = b'X';
        assert!(matches!(
            SisHeader::parse(&buf),
            Err(EtsError::InvalidMagic { section: "SIS", .. })
        ));
    }

    #[test]
    fn test_sis_bad_ndim() {
        let buf = sis_bytes(5, 292, 4);
        let err = SisHeader::parse(&buf).unwrap_err();
        assert!(matches!(err, EtsError::InvalidField { field: "Ndim", .. }));
    }

    #[test]
    fn test_sis_bad_header_size() {
        let mut buf = sis_bytes(4, 292, 4);
        buf[4..8].copy_from_slice(&32u32.to_le_bytes());
        assert!(matches!(
            SisHeader::parse(&buf),
            Err(EtsError::InvalidField {
                field: "headerSize",
                ..
            })
        ));
    }

    #[test]
    fn test_sis_truncated() {
        assert!(matches!(
            SisHeader::parse(&[0u8; 10]),
            Err(EtsError::Truncated(_))
        ));
    }

    // -------------------------------------------------------------------------
    // EtsHeader tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_ets_parse_uint8() {
        let buf = ets_bytes(2, 3, 4, 2, 512, 512, 1, &[0xAA, 0xBB, 0xCC], true);
        let ets = EtsHeader::parse(&buf).unwrap();
        assert_eq!(ets.pixel_type, PixelType::Uint8);
        assert_eq!(ets.size_c, 3);
        assert_eq!(ets.colorspace, ColorSpace::Brightfield);
        assert_eq!(ets.compression, 2);
        assert_eq!(ets.dim_x, 512);
        assert_eq!(ets.dim_y, 512);
        assert_eq!(ets.background_color, [0xAA, 0xBB, 0xCC]);
        assert!(ets.use_pyramid);
    }

    #[test]
    fn test_ets_parse_int32_background() {
        let buf = ets_bytes(4, 1, 1, 3, 256, 256, 1, &[0x7F], false);
        let ets = EtsHeader::parse(&buf).unwrap();
        assert_eq!(ets.pixel_type, PixelType::Int32);
        assert_eq!(ets.colorspace, ColorSpace::Fluorescence);
        assert_eq!(ets.compression, 3);
        assert_eq!(ets.background_color, [0x7F, 0, 0]);
        assert!(!ets.use_pyramid);
    }

    #[test]
    fn test_ets_bad_magic() {
        let mut buf = ets_bytes(2, 1, 4, 2, 512, 512, 1, &[0], true);
        buf[0] = b'S';
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::InvalidMagic { section: "ETS", .. })
        ));
    }

    #[test]
    fn test_ets_bad_pixel_type() {
        let buf = ets_bytes(3, 1, 4, 2, 512, 512, 1, &[0], true);
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::InvalidField {
                field: "pixelType",
                ..
            })
        ));
    }

    #[test]
    fn test_ets_bad_size_c() {
        let buf = ets_bytes(2, 2, 4, 2, 512, 512, 1, &[0, 0], true);
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::InvalidField { field: "sizeC", .. })
        ));
    }

    #[test]
    fn test_ets_bad_colorspace() {
        let buf = ets_bytes(2, 1, 2, 2, 512, 512, 1, &[0], true);
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::InvalidField {
                field: "colorspace",
                ..
            })
        ));
    }

    #[test]
    fn test_ets_bad_compression() {
        let buf = ets_bytes(2, 1, 4, 8, 512, 512, 1, &[0], true);
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::InvalidField {
                field: "compression",
                ..
            })
        ));
    }

    #[test]
    fn test_ets_zstack_rejected() {
        let buf = ets_bytes(2, 1, 4, 2, 512, 512, 5, &[0], true);
        assert!(matches!(
            EtsHeader::parse(&buf),
            Err(EtsError::ZStackUnsupported(5))
        ));
    }

    // -------------------------------------------------------------------------
    // Tile directory tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_tile_record_roundtrip() {
        let buf = tile_record_bytes(3, 7, 1, 2, 0xDEADBEEF, 4096);
        let rec = TileRecord::parse(&buf);
        assert_eq!(rec.coord, [3, 7, 1]);
        assert_eq!(rec.level, 2);
        assert_eq!(rec.offset, 0xDEADBEEF);
        assert_eq!(rec.length, 4096);
    }

    #[test]
    fn test_index_find_tile() {
        let records = vec![
            TileRecord {
                coord: [0, 0, 0],
                level: 0,
                offset: 100,
                length: 10,
            },
            TileRecord {
                coord: [1, 0, 0],
                level: 0,
                offset: 200,
                length: 20,
            },
            TileRecord {
                coord: [0, 1, 0],
                level: 0,
                offset: 300,
                length: 30,
            },
        ];
        let index = TileIndex::build(&records).unwrap();

        // Every present key resolves to exactly its record
        assert_eq!(
            index.find_tile(0, 1, 0, 0),
            Some(TileLocation {
                offset: 200,
                length: 20
            })
        );
        // Absent keys resolve to nothing
        assert_eq!(index.find_tile(0, 1, 1, 0), None);
        assert_eq!(index.find_tile(1, 0, 0, 0), None);
        assert_eq!(index.find_tile(0, 0, 0, 1), None);
    }

    #[test]
    fn test_index_channels_defaults_to_one() {
        let records = vec![TileRecord {
            coord: [0, 0, 0],
            level: 0,
            offset: 0,
            length: 0,
        }];
        let index = TileIndex::build(&records).unwrap();
        assert_eq!(index.channels(), 1);
    }

    #[test]
    fn test_index_channels_from_max_coord() {
        let records: Vec<TileRecord> = (0..3)
            .map(|c| TileRecord {
                coord: [0, 0, c],
                level: 0,
                offset: 0,
                length: 0,
            })
            .collect();
        let index = TileIndex::build(&records).unwrap();
        assert_eq!(index.channels(), 3);
    }

    #[test]
    fn test_index_empty_directory() {
        assert!(matches!(
            TileIndex::build(&[]),
            Err(EtsError::Truncated(_))
        ));
    }

    #[test]
    fn test_index_extents_sorted_descending() {
        let mut records = Vec::new();
        // level 0: 4x4 grid, level 1: 2x2, level 2: 1x1
        for lvl in 0..3u32 {
            let n = 4 >> lvl;
            for y in 0..n {
                for x in 0..n {
                    records.push(TileRecord {
                        coord: [x, y, 0],
                        level: lvl,
                        offset: 0,
                        length: 0,
                    });
                }
            }
        }
        let index = TileIndex::build(&records).unwrap();
        assert_eq!(index.level_count(), 3);
        assert_eq!(index.level_extent(0), Some((4, 4)));
        assert_eq!(index.level_extent(1), Some((2, 2)));
        assert_eq!(index.level_extent(2), Some((1, 1)));
    }

    // -------------------------------------------------------------------------
    // EtsVolume tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_volume_single_level() {
        // 2x2 grid of 2x2-pixel tiles -> one 4x4 level
        let reader = MemReader(container(
            &[(0, 0, 0, 0), (1, 0, 0, 0), (0, 1, 0, 0), (1, 1, 0, 0)],
            2,
        ));
        let vol = EtsVolume::read(&reader).unwrap();

        assert_eq!(vol.levels.len(), 1);
        assert_eq!(vol.levels[0].width, 4);
        assert_eq!(vol.levels[0].height, 4);
        assert_eq!(vol.levels[0].tiles_across, 2);
        assert_eq!(vol.levels[0].tiles_down, 2);
        assert_eq!(vol.levels[0].downsample, 1.0);
        assert_eq!(vol.index.channels(), 1);
    }

    #[test]
    fn test_volume_pyramid_descending_widths() {
        let tiles = vec![
            // level 0: 2x2 grid
            (0, 0, 0, 0),
            (1, 0, 0, 0),
            (0, 1, 0, 0),
            (1, 1, 0, 0),
            // level 1: single tile
            (0, 0, 0, 1),
            // level 2: single tile
            (0, 0, 0, 2),
        ];
        let reader = MemReader(container(&tiles, 2));
        let vol = EtsVolume::read(&reader).unwrap();

        assert_eq!(vol.levels.len(), 3);
        let widths: Vec<u64> = vol.levels.iter().map(|l| l.width).collect();
        assert_eq!(widths, vec![4, 2, 1]);
        assert!(widths.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(vol.levels[1].downsample, 2.0);
        assert_eq!(vol.levels[2].downsample, 4.0);
    }

    #[test]
    fn test_volume_truncated_directory() {
        let mut data = container(&[(0, 0, 0, 0)], 2);
        data.truncate(data.len() - 10);
        let reader = MemReader(data);
        assert!(matches!(EtsVolume::read(&reader), Err(EtsError::Io(_))));
    }
}
