//! # vsi-reader
//!
//! A reader for Olympus VSI whole slide images.
//!
//! A VSI slide is a directory tree: a top-level `.vsi` descriptor (a
//! non-tiled TIFF-like container holding acquisition metadata) alongside
//! a sibling `_<stem>_/stack<N>/` directory whose `frame_t.{ets,tif}`
//! payload carries the pixels, as either a SIS/ETS binary container of
//! compressed tiles or an OME pyramidal TIFF. This crate opens any of
//! the three entry points and exposes the result as a multi-resolution,
//! tile-addressable pyramid suitable for interactive viewers.
//!
//! ## Architecture
//!
//! - [`io`] - range-based file access shared by all parsers
//! - [`mod@format`] - format detection, SIS/ETS container, TIFF structure
//!   and OME XML parsing
//! - [`tile`] - codec dispatch, decoded-tile cache, grid renderer
//! - [`slide`] - the [`Slide`] handle and its payload backends
//! - [`deepzoom`] - power-of-two pyramid derivation for web viewers
//! - [`convert`] - premultiplied-ARGB to straight-RGBA conversion
//! - [`config`] - CLI argument types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vsi_reader::{DeepZoom, Slide};
//!
//! // Open a slide and read a region at full resolution
//! let slide = Slide::open(Path::new("scan.vsi")).unwrap();
//! let (w, h) = slide.dimensions().unwrap();
//! println!("{}x{} pixels, {} levels", w, h, slide.level_count());
//! let region = slide.read_region_to_vec(0, 0, 0, 0, 512, 512).unwrap();
//!
//! // Or wrap it for a DeepZoom viewer
//! let dz = DeepZoom::open(Path::new("scan.vsi"), 254, 1, true).unwrap();
//! let tile = dz.read_tile(0, dz.level_count() - 1, 0, 0).unwrap();
//! ```

pub mod config;
pub mod convert;
pub mod deepzoom;
pub mod error;
pub mod format;
pub mod io;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use convert::{argb2rgba, argb_words_to_rgba};
pub use deepzoom::{DeepZoom, DzTileInfo, TileImage};
pub use error::{EtsError, SlideError, TiffError};
pub use format::detect::{detect_vendor, formats, FormatRecord, PayloadKind};
pub use format::ets::{EtsHeader, EtsVolume, SisHeader, TileIndex, TileRecord};
pub use format::ome::{OmeChannel, OmeDescription, OmeImage};
pub use format::tiff::{ByteOrder, Compression, Ifd, IfdEntry, TiffFile, TiffHeader, TiffTag};
pub use io::{FileRangeReader, RangeReader};
pub use slide::{properties, AssociatedImage, Slide};
pub use tile::{CodecTag, TileCache, TileKey, TilePixels};
