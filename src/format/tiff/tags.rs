//! TIFF tag and field type definitions.
//!
//! Only the tags the Olympus paths actually consume are modeled. Unknown
//! tags are skipped during IFD parsing, not rejected: slide scanners add
//! plenty of private tags.

// =============================================================================
// FieldType
// =============================================================================

/// TIFF field (value) types.
///
/// Each IFD entry declares the type of its value, which determines the
/// per-element byte size and whether the value fits inline in the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
    /// BigTIFF 64-bit unsigned
    Long8,
    /// BigTIFF 64-bit signed
    SLong8,
    /// BigTIFF 64-bit IFD offset
    Ifd8,
}

impl FieldType {
    /// Parse a field type from its on-disk numeric code.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            16 => Some(FieldType::Long8),
            17 => Some(FieldType::SLong8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Byte size of a single element of this type.
    pub const fn element_size(self) -> u64 {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Whether `count` elements of this type fit in the entry's value field.
    ///
    /// Classic TIFF has a 4-byte value field; BigTIFF has 8 bytes.
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let limit = if is_bigtiff { 8 } else { 4 };
        self.element_size().saturating_mul(count) <= limit
    }
}

// =============================================================================
// TiffTag
// =============================================================================

/// TIFF tags consumed by the slide reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffTag {
    /// 254: bit 0 marks a reduced-resolution image
    NewSubfileType,
    /// 256: image width in pixels
    ImageWidth,
    /// 257: image height in pixels
    ImageLength,
    /// 258: bits per sample
    BitsPerSample,
    /// 259: compression scheme
    Compression,
    /// 262: photometric interpretation
    PhotometricInterpretation,
    /// 270: free-text or XML description
    ImageDescription,
    /// 273: strip data offsets
    StripOffsets,
    /// 277: samples per pixel
    SamplesPerPixel,
    /// 278: rows per strip
    RowsPerStrip,
    /// 279: strip byte counts
    StripByteCounts,
    /// 282: pixels per resolution unit, x axis
    XResolution,
    /// 283: pixels per resolution unit, y axis
    YResolution,
    /// 296: resolution unit (2 = inch, 3 = centimeter)
    ResolutionUnit,
    /// 322: tile width in pixels
    TileWidth,
    /// 323: tile height in pixels
    TileLength,
    /// 324: tile data offsets
    TileOffsets,
    /// 325: tile byte counts
    TileByteCounts,
    /// 347: abbreviated-JPEG tables shared by all tiles of a directory
    JpegTables,
}

impl TiffTag {
    /// Parse a tag from its on-disk numeric id.
    ///
    /// Returns `None` for tags the reader does not consume.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(TiffTag::NewSubfileType),
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            282 => Some(TiffTag::XResolution),
            283 => Some(TiffTag::YResolution),
            296 => Some(TiffTag::ResolutionUnit),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            347 => Some(TiffTag::JpegTables),
            _ => None,
        }
    }

    /// On-disk numeric id of this tag.
    pub const fn id(self) -> u16 {
        match self {
            TiffTag::NewSubfileType => 254,
            TiffTag::ImageWidth => 256,
            TiffTag::ImageLength => 257,
            TiffTag::BitsPerSample => 258,
            TiffTag::Compression => 259,
            TiffTag::PhotometricInterpretation => 262,
            TiffTag::ImageDescription => 270,
            TiffTag::StripOffsets => 273,
            TiffTag::SamplesPerPixel => 277,
            TiffTag::RowsPerStrip => 278,
            TiffTag::StripByteCounts => 279,
            TiffTag::XResolution => 282,
            TiffTag::YResolution => 283,
            TiffTag::ResolutionUnit => 296,
            TiffTag::TileWidth => 322,
            TiffTag::TileLength => 323,
            TiffTag::TileOffsets => 324,
            TiffTag::TileByteCounts => 325,
            TiffTag::JpegTables => 347,
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// TIFF compression schemes the reader knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// 1: uncompressed
    None,
    /// 5: LZW
    Lzw,
    /// 6: old-style JPEG (rejected)
    JpegOld,
    /// 7: JPEG (optionally abbreviated, with JPEGTables)
    Jpeg,
    /// 8: zlib deflate
    Deflate,
}

impl Compression {
    /// Parse a compression scheme from its on-disk numeric code.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            6 => Some(Compression::JpegOld),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            _ => None,
        }
    }

    /// Whether a decode path exists for this scheme.
    pub const fn is_available(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }
}

// =============================================================================
// Tests
// =============================================================================
