//! Tile plumbing: decode dispatch, decoded-tile cache, and the grid
//! renderer that turns region requests into tile fetches.

pub mod cache;
pub mod decode;
pub mod grid;

pub use cache::{TileCache, TileKey, TilePixels, DEFAULT_TILE_CACHE_CAPACITY};
pub use decode::{decode_tile, pack_rgb, pack_samples, CodecTag};
pub use grid::{Grid, Surface};
