//! DeepZoom pyramid engine.
//!
//! Wraps any opened [`Slide`] and presents it as a power-of-two pyramid
//! the way web tile viewers expect: level 0 is a single pixel, the top
//! level is full resolution, and every level is the ceiling-halving of
//! the one above it. Tiles have a configurable side, interior-edge
//! overlap, and optional clipping to the slide's declared non-empty
//! rectangle.
//!
//! Two downsample ladders bridge the conventions: `l0_l_downsamples`
//! (slide level 0 to each slide level, reported by the backend) and the
//! power-of-two DeepZoom ladder. Each DeepZoom level reads from the
//! slide level whose downsample is the largest one not exceeding its
//! own.

use std::path::Path;
use std::sync::OnceLock;

use crate::error::SlideError;
use crate::slide::Slide;

/// Geometry of one DeepZoom tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DzTileInfo {
    /// Level-0 x of the region to read (includes the bounds offset)
    pub x: i64,

    /// Level-0 y of the region to read
    pub y: i64,

    /// Slide level the tile reads from
    pub slide_level: u32,

    /// Region width in slide-level pixels
    pub width: u64,

    /// Region height in slide-level pixels
    pub height: u64,

    /// Final tile width in DeepZoom pixels (after viewer scaling)
    pub scale_width: u64,

    /// Final tile height in DeepZoom pixels
    pub scale_height: u64,
}

/// A painted DeepZoom tile, sized `width x height` slide-level pixels.
///
/// The caller owns the buffer; scaling to `scale_width x scale_height`
/// is the viewer's final step.
#[derive(Debug, Clone)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    /// Premultiplied ARGB pixels
    pub argb: Vec<u32>,
}

// =============================================================================
// DeepZoom
// =============================================================================

/// A DeepZoom view over an open slide.
pub struct DeepZoom {
    slide: Slide,
    tile_size: u64,
    overlap: u64,

    /// Level-0 offset of the active area
    l0_offset: (f64, f64),

    /// Per-slide-level dimensions, scaled to the active area
    l_dimensions: Vec<(f64, f64)>,

    /// Slide level 0 -> slide level downsamples
    l0_l_downsamples: Vec<f64>,

    /// Number of DeepZoom levels
    dz_levels: usize,

    /// Per-DeepZoom-level pixel dimensions, level 0 = (1, 1)
    z_dimensions: Vec<(u64, u64)>,

    /// Per-DeepZoom-level tile counts
    t_dimensions: Vec<(u64, u64)>,

    /// Chosen slide level per DeepZoom level
    slide_from_dz_level: Vec<u32>,

    /// Slide level -> DeepZoom level downsamples
    l_z_downsamples: Vec<f64>,

    error: OnceLock<SlideError>,
}

impl DeepZoom {
    /// Open a slide and wrap it.
    ///
    /// An unrecognized path is an error; a recognized slide whose open
    /// failed yields a wrapper that reports through [`DeepZoom::get_error`].
    pub fn open(
        path: &Path,
        tile_size: u32,
        overlap: u32,
        limit_bounds: bool,
    ) -> Result<DeepZoom, SlideError> {
        let slide = Slide::open(path)?;
        Self::new(slide, tile_size, overlap, limit_bounds)
    }

    /// Wrap an already-open slide.
    pub fn new(
        slide: Slide,
        tile_size: u32,
        overlap: u32,
        limit_bounds: bool,
    ) -> Result<DeepZoom, SlideError> {
        if tile_size == 0 {
            return Err(SlideError::InvalidArgument(
                "tile_size must be positive".to_string(),
            ));
        }

        if let Some(msg) = slide.get_error() {
            let error = OnceLock::new();
            let _ = error.set(SlideError::Decode(msg));
            return Ok(DeepZoom {
                slide,
                tile_size: tile_size as u64,
                overlap: overlap as u64,
                l0_offset: (0.0, 0.0),
                l_dimensions: Vec::new(),
                l0_l_downsamples: Vec::new(),
                dz_levels: 0,
                z_dimensions: Vec::new(),
                t_dimensions: Vec::new(),
                slide_from_dz_level: Vec::new(),
                l_z_downsamples: Vec::new(),
                error,
            });
        }

        let slide_levels = slide.level_count();

        // Active-area offset and per-level dimensions
        let mut l0_offset = (0.0, 0.0);
        let mut scale = (1.0, 1.0);

        if limit_bounds {
            let (l0_w, l0_h) = slide.dimensions()?;
            l0_offset = (
                parse_prop_f64(&slide, crate::slide::properties::BOUNDS_X).unwrap_or(0.0),
                parse_prop_f64(&slide, crate::slide::properties::BOUNDS_Y).unwrap_or(0.0),
            );
            scale = (
                parse_prop_f64(&slide, crate::slide::properties::BOUNDS_WIDTH)
                    .map(|w| w / l0_w as f64)
                    .unwrap_or(1.0),
                parse_prop_f64(&slide, crate::slide::properties::BOUNDS_HEIGHT)
                    .map(|h| h / l0_h as f64)
                    .unwrap_or(1.0),
            );
        }

        let mut l_dimensions = Vec::with_capacity(slide_levels as usize);
        let mut l0_l_downsamples = Vec::with_capacity(slide_levels as usize);
        for level in 0..slide_levels {
            let (w, h) = slide.level_dimensions(level)?;
            l_dimensions.push((
                (w as f64 * scale.0).ceil(),
                (h as f64 * scale.1).ceil(),
            ));
            l0_l_downsamples.push(slide.level_downsample(level)?);
        }

        // DeepZoom level dimensions: repeated ceiling-halving down to
        // (1, 1), assigned back-to-front
        let seed = (l_dimensions[0].0 as u64, l_dimensions[0].1 as u64);
        let mut z_dimensions = vec![seed];
        let (mut w, mut h) = seed;
        while w > 1 || h > 1 {
            w = half_dim(w);
            h = half_dim(h);
            z_dimensions.push((w, h));
        }
        z_dimensions.reverse();
        let dz_levels = z_dimensions.len();

        let t_dimensions: Vec<(u64, u64)> = z_dimensions
            .iter()
            .map(|&(zw, zh)| {
                (
                    zw.div_ceil(tile_size as u64),
                    zh.div_ceil(tile_size as u64),
                )
            })
            .collect();

        // Preferred slide level and piecewise downsample per DZ level
        let mut slide_from_dz_level = Vec::with_capacity(dz_levels);
        let mut l_z_downsamples = Vec::with_capacity(dz_levels);
        for i in 0..dz_levels {
            let l0_z_downsample = 2f64.powi((dz_levels - i - 1) as i32);
            let best = slide.best_level_for_downsample(l0_z_downsample);
            slide_from_dz_level.push(best);
            l_z_downsamples.push(l0_z_downsample / l0_l_downsamples[best as usize]);
        }

        Ok(DeepZoom {
            slide,
            tile_size: tile_size as u64,
            overlap: overlap as u64,
            l0_offset,
            l_dimensions,
            l0_l_downsamples,
            dz_levels,
            z_dimensions,
            t_dimensions,
            slide_from_dz_level,
            l_z_downsamples,
            error: OnceLock::new(),
        })
    }

    /// The wrapped slide.
    pub fn slide(&self) -> &Slide {
        &self.slide
    }

    /// Consume the wrapper and release the slide.
    pub fn into_slide(self) -> Slide {
        self.slide
    }

    /// First error recorded against this wrapper or its slide.
    pub fn get_error(&self) -> Option<String> {
        self.error
            .get()
            .map(|e| e.to_string())
            .or_else(|| self.slide.get_error())
    }

    /// Number of DeepZoom levels.
    pub fn level_count(&self) -> u32 {
        self.dz_levels as u32
    }

    /// Number of planes (channels) of the underlying slide.
    pub fn plane_count(&self) -> u32 {
        self.slide.plane_count()
    }

    /// Pixel dimensions of a DeepZoom level.
    pub fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError> {
        self.z_dimensions
            .get(level as usize)
            .copied()
            .ok_or_else(|| self.bad_level(level))
    }

    /// Tile grid dimensions of a DeepZoom level.
    pub fn level_tiles(&self, level: u32) -> Result<(u64, u64), SlideError> {
        self.t_dimensions
            .get(level as usize)
            .copied()
            .ok_or_else(|| self.bad_level(level))
    }

    /// Total number of tiles across all levels.
    pub fn tile_count(&self) -> u64 {
        self.t_dimensions.iter().map(|&(x, y)| x * y).sum()
    }

    /// Active-area dimensions at slide level 0.
    pub fn l0_dimensions(&self) -> (u64, u64) {
        self.l_dimensions
            .first()
            .map(|&(w, h)| (w as u64, h as u64))
            .unwrap_or((0, 0))
    }

    /// Microns per pixel from the slide properties; `(0, 0)` when absent.
    pub fn micron_per_pixel(&self) -> (f64, f64) {
        let x = parse_prop_f64(&self.slide, crate::slide::properties::MPP_X);
        let y = parse_prop_f64(&self.slide, crate::slide::properties::MPP_Y);
        match (x, y) {
            (Some(x), Some(y)) => (x, y),
            _ => (0.0, 0.0),
        }
    }

    /// Background color from the slide properties, as `[r, g, b]`.
    pub fn background_color(&self) -> Option<[u8; 3]> {
        let hex = self
            .slide
            .property_value(crate::slide::properties::BACKGROUND_COLOR)?;
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some([r, g, b])
    }

    /// Property keys of the underlying slide.
    pub fn property_names(&self) -> Vec<&str> {
        self.slide.property_names()
    }

    /// Property lookup on the underlying slide.
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.slide.property_value(name)
    }

    /// Geometry of the tile at `(level, col, row)`.
    ///
    /// Out-of-range addresses are `InvalidArgument` errors.
    pub fn tile_info(&self, level: u32, col: u64, row: u64) -> Result<DzTileInfo, SlideError> {
        if let Some(err) = self.error.get() {
            return Err(err.clone());
        }

        let (tiles_x, tiles_y) = self.level_tiles(level)?;
        if col >= tiles_x || row >= tiles_y {
            return Err(SlideError::InvalidArgument(format!(
                "tile ({}, {}) out of range for level {} ({}x{} tiles)",
                col, row, level, tiles_x, tiles_y
            )));
        }

        let level_idx = level as usize;
        let slide_level = self.slide_from_dz_level[level_idx];
        let (z_w, z_h) = self.z_dimensions[level_idx];

        // Overlap is added to interior edges only
        let overlap_tl = (
            if col > 0 { self.overlap } else { 0 },
            if row > 0 { self.overlap } else { 0 },
        );
        let overlap_br = (
            if col < tiles_x - 1 { self.overlap } else { 0 },
            if row < tiles_y - 1 { self.overlap } else { 0 },
        );

        // DeepZoom-space tile size and location
        let z_size = (
            self.tile_size.min(z_w - self.tile_size * col) + overlap_tl.0 + overlap_br.0,
            self.tile_size.min(z_h - self.tile_size * row) + overlap_tl.1 + overlap_br.1,
        );
        let z_location = (self.tile_size * col, self.tile_size * row);

        // Slide-level location, pulled back by the top-left overlap
        let l_z = self.l_z_downsamples[level_idx];
        let l_location = (
            l_z * (z_location.0 as f64 - overlap_tl.0 as f64),
            l_z * (z_location.1 as f64 - overlap_tl.1 as f64),
        );

        // Level-0 location, rounded down, shifted by the active-area
        // offset
        let l0_l = self.l0_l_downsamples[slide_level as usize];
        let l0_location = (
            (l0_l * l_location.0 + self.l0_offset.0).floor() as i64,
            (l0_l * l_location.1 + self.l0_offset.1).floor() as i64,
        );

        // Read size, clipped to the slide level's active rectangle
        let (l_dim_w, l_dim_h) = self.l_dimensions[slide_level as usize];
        let l_size = (
            (l_z * z_size.0 as f64).ceil().min(l_dim_w - l_location.0.ceil()),
            (l_z * z_size.1 as f64).ceil().min(l_dim_h - l_location.1.ceil()),
        );

        Ok(DzTileInfo {
            x: l0_location.0,
            y: l0_location.1,
            slide_level,
            width: l_size.0 as u64,
            height: l_size.1 as u64,
            scale_width: z_size.0,
            scale_height: z_size.1,
        })
    }

    /// Paint the tile at `(level, col, row)` for one plane.
    ///
    /// The returned buffer is `width x height` slide-level pixels; the
    /// caller scales it to `scale_width x scale_height` per
    /// [`DzTileInfo`].
    pub fn read_tile(
        &self,
        plane: u32,
        level: u32,
        col: u64,
        row: u64,
    ) -> Result<TileImage, SlideError> {
        let info = self.tile_info(level, col, row)?;

        let w = info.width as u32;
        let h = info.height as u32;
        let mut argb = vec![0u32; (w as usize) * (h as usize)];
        self.slide
            .read_region(&mut argb, info.x, info.y, plane, info.slide_level, w, h)?;

        Ok(TileImage {
            width: w,
            height: h,
            argb,
        })
    }

    fn bad_level(&self, level: u32) -> SlideError {
        SlideError::InvalidArgument(format!(
            "DeepZoom level {} out of range ({} levels)",
            level, self.dz_levels
        ))
    }
}

/// One ceiling-halving step, floored at 1.
fn half_dim(d: u64) -> u64 {
    d.div_ceil(2).max(1)
}

fn parse_prop_f64(slide: &Slide, name: &str) -> Option<f64> {
    slide.property_value(name).and_then(|v| v.parse().ok())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::testutil::synthetic_slide;

    fn wrap(
        level_dims: &[(u64, u64)],
        tile_size: u32,
        overlap: u32,
        limit_bounds: bool,
        props: &[(&str, &str)],
    ) -> DeepZoom {
        let slide = synthetic_slide(level_dims, 1, props);
        DeepZoom::new(slide, tile_size, overlap, limit_bounds).unwrap()
    }

    #[test]
    fn test_level_count_1024x512() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        assert_eq!(dz.level_count(), 11);
    }

    #[test]
    fn test_top_level_is_full_resolution() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        assert_eq!(dz.level_dimensions(10).unwrap(), (1024, 512));
    }

    #[test]
    fn test_level_zero_is_unit() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        assert_eq!(dz.level_dimensions(0).unwrap(), (1, 1));
    }

    #[test]
    fn test_dimensions_are_ceiling_halvings() {
        let dz = wrap(&[(1000, 700)], 254, 1, false, &[]);

        for level in 0..dz.level_count() - 1 {
            let (w, h) = dz.level_dimensions(level).unwrap();
            let (nw, nh) = dz.level_dimensions(level + 1).unwrap();
            assert_eq!(w, nw.div_ceil(2).max(1));
            assert_eq!(h, nh.div_ceil(2).max(1));
        }
    }

    #[test]
    fn test_level_tiles() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        // ceil(1024/254) = 5, ceil(512/254) = 3
        assert_eq!(dz.level_tiles(10).unwrap(), (5, 3));
        assert_eq!(dz.level_tiles(0).unwrap(), (1, 1));
    }

    #[test]
    fn test_tile_count_sums_levels() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        let total: u64 = (0..dz.level_count())
            .map(|l| {
                let (x, y) = dz.level_tiles(l).unwrap();
                x * y
            })
            .sum();
        assert_eq!(dz.tile_count(), total);
    }

    #[test]
    fn test_tile_info_origin_tile() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        let info = dz.tile_info(10, 0, 0).unwrap();

        assert_eq!(info.x, 0);
        assert_eq!(info.y, 0);
        assert_eq!(info.slide_level, 0);
        // No top-left overlap, one pixel bottom-right overlap
        assert_eq!(info.width, 255);
        assert_eq!(info.height, 255);
        assert_eq!(info.scale_width, 255);
        assert_eq!(info.scale_height, 255);
    }

    #[test]
    fn test_tile_info_interior_tile_has_both_overlaps() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        let info = dz.tile_info(10, 1, 1).unwrap();

        // Interior in x (tiles 0..5), interior in y (tiles 0..3)
        assert_eq!(info.scale_width, 254 + 2);
        assert_eq!(info.scale_height, 254 + 2);
        // Pulled back one pixel for the top-left overlap
        assert_eq!(info.x, 254 - 1);
        assert_eq!(info.y, 254 - 1);
    }

    #[test]
    fn test_tile_info_last_column_clips() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        let info = dz.tile_info(10, 4, 0).unwrap();

        // 1024 - 254*4 = 8 remaining pixels + 1 left overlap
        assert_eq!(info.scale_width, 8 + 1);
        assert!(info.width > 0 && info.height > 0);
    }

    #[test]
    fn test_tile_info_out_of_range() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);

        assert!(matches!(
            dz.tile_info(10, 5, 0),
            Err(SlideError::InvalidArgument(_))
        ));
        assert!(matches!(
            dz.tile_info(10, 0, 3),
            Err(SlideError::InvalidArgument(_))
        ));
        assert!(matches!(
            dz.tile_info(11, 0, 0),
            Err(SlideError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tile_info_in_range_invariants() {
        let dz = wrap(&[(1000, 700), (500, 350), (250, 175)], 256, 1, false, &[]);

        for level in 0..dz.level_count() {
            let (tx, ty) = dz.level_tiles(level).unwrap();
            for col in 0..tx.min(3) {
                for row in 0..ty.min(3) {
                    let info = dz.tile_info(level, col, row).unwrap();
                    assert!(info.width > 0, "level {} tile ({},{})", level, col, row);
                    assert!(info.height > 0);
                    assert!(info.x >= 0 && info.y >= 0);
                    assert!(info.slide_level < 3);
                }
            }
        }
    }

    #[test]
    fn test_multi_level_slide_uses_best_level() {
        // Slide levels at downsamples 1, 2, 4
        let dz = wrap(&[(1024, 1024), (512, 512), (256, 256)], 256, 0, false, &[]);
        let n = dz.level_count();
        assert_eq!(n, 11);

        // Full-resolution DZ level reads slide level 0
        assert_eq!(dz.tile_info(n - 1, 0, 0).unwrap().slide_level, 0);
        // One halving down reads slide level 1
        assert_eq!(dz.tile_info(n - 2, 0, 0).unwrap().slide_level, 1);
        // Two halvings down reads slide level 2
        assert_eq!(dz.tile_info(n - 3, 0, 0).unwrap().slide_level, 2);
        // Deeper levels still read the lowest-resolution slide level
        assert_eq!(dz.tile_info(0, 0, 0).unwrap().slide_level, 2);
    }

    #[test]
    fn test_limit_bounds_scales_and_offsets() {
        let props = [
            ("openslide.bounds-x", "100"),
            ("openslide.bounds-y", "50"),
            ("openslide.bounds-width", "512"),
            ("openslide.bounds-height", "256"),
        ];
        let dz = wrap(&[(1024, 512)], 254, 0, true, &props);

        // The pyramid covers only the bounded region
        assert_eq!(dz.l0_dimensions(), (512, 256));
        let top = dz.level_count() - 1;
        assert_eq!(dz.level_dimensions(top).unwrap(), (512, 256));

        // Tile origin is shifted by the bounds offset
        let info = dz.tile_info(top, 0, 0).unwrap();
        assert_eq!(info.x, 100);
        assert_eq!(info.y, 50);
    }

    #[test]
    fn test_limit_bounds_without_bounds_props() {
        let dz = wrap(&[(1024, 512)], 254, 0, true, &[]);
        assert_eq!(dz.l0_dimensions(), (1024, 512));
        assert_eq!(dz.tile_info(dz.level_count() - 1, 0, 0).unwrap().x, 0);
    }

    #[test]
    fn test_read_tile_paints_region() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        let tile = dz.read_tile(0, 10, 0, 0).unwrap();

        assert_eq!(tile.width, 255);
        assert_eq!(tile.height, 255);
        assert_eq!(tile.argb.len(), 255 * 255);
        assert!(tile.argb.iter().all(|&p| p == 0xFF336699));
    }

    #[test]
    fn test_read_tile_out_of_range() {
        let dz = wrap(&[(1024, 512)], 254, 1, false, &[]);
        assert!(matches!(
            dz.read_tile(0, 10, 9, 9),
            Err(SlideError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_micron_per_pixel() {
        let dz = wrap(
            &[(128, 128)],
            254,
            0,
            false,
            &[("openslide.mpp-x", "0.25"), ("openslide.mpp-y", "0.5")],
        );
        assert_eq!(dz.micron_per_pixel(), (0.25, 0.5));

        let dz = wrap(&[(128, 128)], 254, 0, false, &[]);
        assert_eq!(dz.micron_per_pixel(), (0.0, 0.0));
    }

    #[test]
    fn test_background_color() {
        let dz = wrap(
            &[(128, 128)],
            254,
            0,
            false,
            &[("openslide.background-color", "ff8000")],
        );
        assert_eq!(dz.background_color(), Some([0xFF, 0x80, 0x00]));

        let dz = wrap(&[(128, 128)], 254, 0, false, &[]);
        assert_eq!(dz.background_color(), None);
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let slide = synthetic_slide(&[(128, 128)], 1, &[]);
        assert!(matches!(
            DeepZoom::new(slide, 0, 0, false),
            Err(SlideError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_single_pixel_slide() {
        let dz = wrap(&[(1, 1)], 254, 1, false, &[]);
        assert_eq!(dz.level_count(), 1);
        assert_eq!(dz.level_dimensions(0).unwrap(), (1, 1));
        assert_eq!(dz.level_tiles(0).unwrap(), (1, 1));
    }

    #[test]
    fn test_property_passthrough() {
        let dz = wrap(&[(64, 64)], 254, 0, false, &[("olympus.ets.quality", "90")]);
        assert_eq!(dz.property_value("olympus.ets.quality"), Some("90"));
        assert!(dz.property_names().contains(&"olympus.ets.quality"));
    }
}
