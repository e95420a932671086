//! Region rendering over a tile grid.
//!
//! A level's pixels are organized as a uniform grid of tiles. Given a
//! viewport in level coordinates, the renderer enumerates every tile
//! whose grid rectangle intersects it, asks the backend for each tile's
//! pixels, and composites them onto the caller's surface at the right
//! offset. Tiles that extend past the level rectangle are clipped to it.
//! The first tile error aborts the paint and propagates.

use std::sync::Arc;

use crate::error::SlideError;

use super::cache::TilePixels;

// =============================================================================
// Surface
// =============================================================================

/// A caller-owned ARGB output surface.
pub struct Surface<'a> {
    data: &'a mut [u32],
    width: u32,
    height: u32,
}

impl<'a> Surface<'a> {
    /// Wrap a pixel buffer as a paint target.
    ///
    /// The buffer length must be exactly `width * height`.
    pub fn new(data: &'a mut [u32], width: u32, height: u32) -> Result<Self, SlideError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(SlideError::InvalidArgument(format!(
                "surface buffer has {} pixels, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Surface {
            data,
            width,
            height,
        })
    }

    /// Surface width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the whole surface with one color.
    pub fn fill(&mut self, argb: u32) {
        self.data.fill(argb);
    }

    /// Blit a source image at `(dst_x, dst_y)`, clipped to the surface
    /// and to `(clip_w, clip_h)` source pixels.
    pub fn draw(
        &mut self,
        src: &[u32],
        src_w: u32,
        src_h: u32,
        dst_x: i64,
        dst_y: i64,
        clip_w: u32,
        clip_h: u32,
    ) {
        let copy_w = src_w.min(clip_w) as i64;
        let copy_h = src_h.min(clip_h) as i64;

        for sy in 0..copy_h {
            let dy = dst_y + sy;
            if dy < 0 || dy >= self.height as i64 {
                continue;
            }

            let sx_start = (-dst_x).clamp(0, copy_w);
            let sx_end = (self.width as i64 - dst_x).clamp(0, copy_w);
            if sx_start >= sx_end {
                continue;
            }

            let src_row = (sy * src_w as i64 + sx_start) as usize;
            let dst_row = (dy * self.width as i64 + dst_x + sx_start) as usize;
            let run = (sx_end - sx_start) as usize;
            self.data[dst_row..dst_row + run]
                .copy_from_slice(&src[src_row..src_row + run]);
        }
    }
}

// =============================================================================
// Grid
// =============================================================================

/// Tile geometry of one pyramid level.
///
/// Tile sizes are fractional: clipped level rectangles can produce
/// sub-pixel cell widths, and offsets are floored only at composite time.
#[derive(Debug, Clone, Copy)]
pub struct Grid {
    tiles_across: u32,
    tiles_down: u32,
    tile_w: f64,
    tile_h: f64,
}

impl Grid {
    /// Create a grid of `tiles_across x tiles_down` cells of
    /// `tile_w x tile_h` pixels.
    pub fn new(tiles_across: u32, tiles_down: u32, tile_w: f64, tile_h: f64) -> Self {
        Grid {
            tiles_across,
            tiles_down,
            tile_w,
            tile_h,
        }
    }

    /// Number of tile columns.
    pub fn tiles_across(&self) -> u32 {
        self.tiles_across
    }

    /// Number of tile rows.
    pub fn tiles_down(&self) -> u32 {
        self.tiles_down
    }

    /// Nominal tile width in pixels.
    pub fn tile_width(&self) -> f64 {
        self.tile_w
    }

    /// Nominal tile height in pixels.
    pub fn tile_height(&self) -> f64 {
        self.tile_h
    }

    /// Paint the viewport at `(x, y)` in level coordinates onto `surface`.
    ///
    /// `level_w`/`level_h` bound the painted area; `fetch` produces the
    /// pixels of one tile by `(column, row)`.
    pub fn paint_region<F>(
        &self,
        surface: &mut Surface<'_>,
        x: f64,
        y: f64,
        level_w: f64,
        level_h: f64,
        fetch: F,
    ) -> Result<(), SlideError>
    where
        F: Fn(u32, u32) -> Result<Arc<TilePixels>, SlideError>,
    {
        let w = surface.width() as f64;
        let h = surface.height() as f64;

        let start_col = (x / self.tile_w).floor().max(0.0) as u32;
        let start_row = (y / self.tile_h).floor().max(0.0) as u32;

        let mut row = start_row;
        while row < self.tiles_down && (row as f64) * self.tile_h < y + h {
            let mut col = start_col;
            while col < self.tiles_across && (col as f64) * self.tile_w < x + w {
                let tile = fetch(col, row)?;

                // cell rectangle, clipped to the level bounds
                let cell_x = col as f64 * self.tile_w;
                let cell_y = row as f64 * self.tile_h;
                let cell_w = self.tile_w.min(level_w - cell_x).ceil().max(0.0) as u32;
                let cell_h = self.tile_h.min(level_h - cell_y).ceil().max(0.0) as u32;

                surface.draw(
                    &tile.argb,
                    tile.width,
                    tile.height,
                    (cell_x - x).floor() as i64,
                    (cell_y - y).floor() as i64,
                    cell_w,
                    cell_h,
                );

                col += 1;
            }
            row += 1;
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
