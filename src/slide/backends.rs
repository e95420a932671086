//! Payload backends.
//!
//! Every payload kind implements [`Backend`]: paint a requested region
//! onto a caller surface, pulling tiles through the shared decoded-tile
//! cache. Teardown is `Drop`; backends hold no state beyond their parsed
//! directory structures and a range reader on the payload file.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::SlideError;
use crate::format::ets::EtsVolume;
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::ome::OmeDescription;
use crate::format::tiff::{Compression, TiffFile, TiffTag, ValueReader};
use crate::io::{FileRangeReader, RangeReader};
use crate::tile::{decode_tile, pack_samples, CodecTag, Surface, TileCache, TileKey, TilePixels};

use super::handle::Level;

/// Region-painting capability of a payload backend.
///
/// `x` and `y` are level-0 coordinates; the backend scales them by the
/// level's downsample before walking the tile grid.
pub(crate) trait Backend: Send + Sync {
    fn paint_region(
        &self,
        cache: &TileCache,
        level: &Level,
        surface: &mut Surface<'_>,
        x: i64,
        y: i64,
        plane: u32,
        w: u32,
        h: u32,
    ) -> Result<(), SlideError>;
}

// =============================================================================
// ETS backend
// =============================================================================

/// Backend over a SIS/ETS binary container.
pub(crate) struct EtsBackend {
    reader: FileRangeReader,
    volume: EtsVolume,
    codec: CodecTag,
}

impl EtsBackend {
    pub(crate) fn new(reader: FileRangeReader, volume: EtsVolume) -> Result<Self, SlideError> {
        let codec = CodecTag::from_ets_tag(volume.ets.compression)?;
        Ok(EtsBackend {
            reader,
            volume,
            codec,
        })
    }

    /// Fetch one tile, through the cache.
    ///
    /// A coordinate with no directory entry paints as a zero-filled tile:
    /// sparse grids are normal for slides whose tissue does not cover the
    /// scan area. Tiles are always decoded at the descriptor's native
    /// dimensions; edge tiles reaching past the level rectangle are
    /// source-clipped by the grid renderer at composite time.
    fn read_tile(
        &self,
        cache: &TileCache,
        level: &Level,
        col: u32,
        row: u32,
        channel: u32,
    ) -> Result<Arc<TilePixels>, SlideError> {
        let key = TileKey::new(level.index, col, row, channel);
        if let Some(tile) = cache.get(&key) {
            return Ok(tile);
        }

        let ets_level = &self.volume.levels[level.index as usize];
        let image_w = self.volume.ets.dim_x;
        let image_h = self.volume.ets.dim_y;

        let decoded = match self
            .volume
            .index
            .find_tile(ets_level.raw_level, col, row, channel)
        {
            None => TilePixels::filled(image_w, image_h, 0),
            Some(loc) => {
                let data = self.reader.read_exact_at(loc.offset, loc.length as usize)?;
                let argb = decode_tile(self.codec, &data, image_w, image_h)?;
                TilePixels {
                    width: image_w,
                    height: image_h,
                    argb,
                }
            }
        };

        Ok(cache.put(key, decoded))
    }
}

impl Backend for EtsBackend {
    fn paint_region(
        &self,
        cache: &TileCache,
        level: &Level,
        surface: &mut Surface<'_>,
        x: i64,
        y: i64,
        plane: u32,
        _w: u32,
        _h: u32,
    ) -> Result<(), SlideError> {
        if plane >= self.volume.index.channels() {
            return Err(SlideError::InvalidArgument(format!(
                "plane {} out of range ({} channels)",
                plane,
                self.volume.index.channels()
            )));
        }

        level.grid.paint_region(
            surface,
            x as f64 / level.downsample,
            y as f64 / level.downsample,
            level.width,
            level.height,
            |col, row| self.read_tile(cache, level, col, row, plane),
        )
    }
}

// =============================================================================
// TIFF directory data
// =============================================================================

/// One tiled TIFF directory, fully indexed for tile access.
pub(crate) struct TiffDirData {
    pub width: u32,
    pub height: u32,
    pub tile_w: u32,
    pub tile_h: u32,
    pub tiles_across: u32,
    pub compression: Compression,
    pub samples_per_pixel: u32,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TiffDirData {
    /// Index a tiled directory, rejecting unavailable compression codecs.
    pub(crate) fn load(
        reader: &FileRangeReader,
        tiff: &TiffFile,
        dir_index: usize,
    ) -> Result<Self, SlideError> {
        let byte_order = tiff.header.byte_order;
        let ifd = tiff.directory(dir_index).ok_or_else(|| {
            SlideError::Decode(format!("TIFF directory {} does not exist", dir_index))
        })?;

        let width = ifd.image_width(byte_order).ok_or_else(|| {
            SlideError::Decode(format!("TIFF directory {}: no ImageWidth", dir_index))
        })?;
        let height = ifd.image_height(byte_order).ok_or_else(|| {
            SlideError::Decode(format!("TIFF directory {}: no ImageLength", dir_index))
        })?;
        let tile_w = ifd.tile_width(byte_order).ok_or_else(|| {
            SlideError::Decode(format!("TIFF directory {}: not tiled", dir_index))
        })?;
        let tile_h = ifd.tile_height(byte_order).ok_or_else(|| {
            SlideError::Decode(format!("TIFF directory {}: not tiled", dir_index))
        })?;

        let compression_code = ifd.compression(byte_order).unwrap_or(1);
        let compression = Compression::from_u16(compression_code)
            .filter(|c| c.is_available())
            .ok_or(SlideError::Unsupported(format!(
                "TIFF directory {}: compression {} has no codec",
                dir_index, compression_code
            )))?;

        let vr = ValueReader::new(reader, &tiff.header);
        let tile_offsets = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .ok_or(SlideError::Decode(format!(
                "TIFF directory {}: no TileOffsets",
                dir_index
            )))
            .and_then(|e| vr.read_u64_array(e).map_err(SlideError::from))?;
        let tile_byte_counts = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .ok_or(SlideError::Decode(format!(
                "TIFF directory {}: no TileByteCounts",
                dir_index
            )))
            .and_then(|e| vr.read_u64_array(e).map_err(SlideError::from))?;

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(e) => Some(vr.read_raw_bytes(e).map_err(SlideError::from)?),
            None => None,
        };

        Ok(TiffDirData {
            width,
            height,
            tile_w,
            tile_h,
            tiles_across: width.div_ceil(tile_w),
            compression,
            samples_per_pixel: ifd.samples_per_pixel(byte_order),
            tile_offsets,
            tile_byte_counts,
            jpeg_tables,
        })
    }

    fn tile_location(&self, col: u32, row: u32) -> Result<(u64, u64), SlideError> {
        let index = (row * self.tiles_across + col) as usize;
        match (
            self.tile_offsets.get(index),
            self.tile_byte_counts.get(index),
        ) {
            (Some(&offset), Some(&count)) => Ok((offset, count)),
            _ => Err(SlideError::Decode(format!(
                "tile ({}, {}) has no directory entry",
                col, row
            ))),
        }
    }
}

// =============================================================================
// TIFF backend
// =============================================================================

/// One slide level of a TIFF payload: a directory per channel.
pub(crate) struct TiffLevelData {
    pub channels: Vec<TiffDirData>,
}

/// Backend over a tiled or OME pyramidal TIFF.
pub(crate) struct TiffBackend {
    reader: FileRangeReader,
    levels: Vec<TiffLevelData>,
}

impl TiffBackend {
    /// Build levels from every tiled directory that is the first image or
    /// carries the reduced-image bit, sorted by descending width.
    pub(crate) fn new_generic(
        reader: FileRangeReader,
        tiff: &TiffFile,
    ) -> Result<Self, SlideError> {
        const REDUCED_IMAGE: u32 = 1;
        let byte_order = tiff.header.byte_order;
        let mut levels = Vec::new();

        for (index, ifd) in tiff.ifds.iter().enumerate() {
            if !ifd.is_tiled() {
                continue;
            }
            if index != 0 && ifd.subfile_type(byte_order) & REDUCED_IMAGE == 0 {
                continue;
            }
            levels.push(TiffLevelData {
                channels: vec![TiffDirData::load(&reader, tiff, index)?],
            });
        }

        if levels.is_empty() {
            return Err(SlideError::Decode(
                "TIFF has no usable pyramid directories".to_string(),
            ));
        }

        levels.sort_by(|a, b| b.channels[0].width.cmp(&a.channels[0].width));

        Ok(TiffBackend { reader, levels })
    }

    /// Build levels from an OME description: each `Image` is a level, and
    /// its channels map to consecutive directories. All channels of a
    /// level must share pixel dimensions.
    pub(crate) fn new_ome(
        reader: FileRangeReader,
        tiff: &TiffFile,
        ome: &OmeDescription,
    ) -> Result<Self, SlideError> {
        let channel_count = ome.channel_count() as usize;
        let mut levels = Vec::new();

        for (level_index, _image) in ome.images.iter().enumerate() {
            let mut channels = Vec::with_capacity(channel_count);
            for ch in 0..channel_count {
                let dir_index = level_index * channel_count + ch;
                let dir = TiffDirData::load(&reader, tiff, dir_index)?;

                if let Some(first) = channels.first() {
                    let first: &TiffDirData = first;
                    if dir.width != first.width || dir.height != first.height {
                        return Err(SlideError::Decode(format!(
                            "level {} channel {} is {}x{}, channel 0 is {}x{}",
                            level_index, ch, dir.width, dir.height, first.width, first.height
                        )));
                    }
                }
                channels.push(dir);
            }
            levels.push(TiffLevelData { channels });
        }

        if levels.is_empty() {
            return Err(SlideError::Decode(
                "OME description has no pyramid levels".to_string(),
            ));
        }

        levels.sort_by(|a, b| b.channels[0].width.cmp(&a.channels[0].width));

        Ok(TiffBackend { reader, levels })
    }

    pub(crate) fn levels(&self) -> &[TiffLevelData] {
        &self.levels
    }

    fn read_tile(
        &self,
        cache: &TileCache,
        level: &Level,
        col: u32,
        row: u32,
        channel: u32,
    ) -> Result<Arc<TilePixels>, SlideError> {
        let key = TileKey::new(level.index, col, row, channel);
        if let Some(tile) = cache.get(&key) {
            return Ok(tile);
        }

        let dir = &self.levels[level.index as usize].channels[channel as usize];
        let (offset, count) = dir.tile_location(col, row)?;
        let data = self.reader.read_exact_at(offset, count as usize)?;

        let argb = match dir.compression {
            Compression::Jpeg => {
                let stream = prepare_tile_jpeg(dir.jpeg_tables.as_deref(), &data);
                decode_tile(CodecTag::Jpeg, &stream, dir.tile_w, dir.tile_h)?
            }
            Compression::None => pack_samples(&data, dir.tile_w, dir.tile_h, dir.samples_per_pixel)?,
            other => {
                return Err(SlideError::Unsupported(format!(
                    "TIFF compression {:?}",
                    other
                )))
            }
        };

        Ok(cache.put(
            key,
            TilePixels {
                width: dir.tile_w,
                height: dir.tile_h,
                argb,
            },
        ))
    }
}

impl Backend for TiffBackend {
    fn paint_region(
        &self,
        cache: &TileCache,
        level: &Level,
        surface: &mut Surface<'_>,
        x: i64,
        y: i64,
        plane: u32,
        _w: u32,
        _h: u32,
    ) -> Result<(), SlideError> {
        let level_data = &self.levels[level.index as usize];
        if plane as usize >= level_data.channels.len() {
            return Err(SlideError::InvalidArgument(format!(
                "plane {} out of range ({} channels)",
                plane,
                level_data.channels.len()
            )));
        }

        level.grid.paint_region(
            surface,
            x as f64 / level.downsample,
            y as f64 / level.downsample,
            level.width,
            level.height,
            |col, row| self.read_tile(cache, level, col, row, plane),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
