//! The public slide handle.
//!
//! A [`Slide`] is created by [`Slide::open`], holds its level list,
//! plane count, string property table, decoded-tile cache and payload
//! backend, and stays thread-safe for concurrent reads until dropped.
//!
//! Open failures split two ways: a path no registered format claims is an
//! `Err(NotRecognized)`, while a recognized slide whose payload fails to
//! open yields an *errored handle* that reports the failure through
//! [`Slide::get_error`] and fails every region read fast.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::SlideError;
use crate::format::detect;
use crate::format::ets::{ColorSpace, EtsVolume, PixelType};
use crate::format::ome::OmeDescription;
use crate::format::tiff::{Compression, TiffFile, TiffTag, ValueReader};
use crate::io::{FileRangeReader, RangeReader};
use crate::tile::{decode_tile, pack_samples, CodecTag, Grid, Surface, TileCache};

use super::backends::{Backend, EtsBackend, TiffBackend};

/// Well-known property keys.
pub mod properties {
    /// Microns per pixel, x axis
    pub const MPP_X: &str = "openslide.mpp-x";
    /// Microns per pixel, y axis
    pub const MPP_Y: &str = "openslide.mpp-y";
    /// Left edge of the non-empty region, level-0 pixels
    pub const BOUNDS_X: &str = "openslide.bounds-x";
    /// Top edge of the non-empty region, level-0 pixels
    pub const BOUNDS_Y: &str = "openslide.bounds-y";
    /// Width of the non-empty region, level-0 pixels
    pub const BOUNDS_WIDTH: &str = "openslide.bounds-width";
    /// Height of the non-empty region, level-0 pixels
    pub const BOUNDS_HEIGHT: &str = "openslide.bounds-height";
    /// Slide background color as 6 hex digits
    pub const BACKGROUND_COLOR: &str = "openslide.background-color";
    /// Vendor identifier
    pub const VENDOR: &str = "openslide.vendor";
}

// =============================================================================
// Level
// =============================================================================

/// One resolution of the pyramid.
///
/// Dimensions are floating-point: clipped level rectangles can carry
/// sub-pixel widths. Level 0 is full resolution and widths decrease with
/// the index.
pub(crate) struct Level {
    pub index: u32,
    pub width: f64,
    pub height: f64,
    pub downsample: f64,
    pub grid: Grid,
}

/// A non-pyramidal auxiliary picture (label, macro overview).
#[derive(Debug, Clone)]
pub struct AssociatedImage {
    pub width: u32,
    pub height: u32,
    /// Premultiplied ARGB pixels
    pub argb: Vec<u32>,
}

// =============================================================================
// Slide
// =============================================================================

/// An open whole-slide image.
pub struct Slide {
    levels: Vec<Level>,
    plane_count: u32,
    properties: BTreeMap<String, String>,
    associated: BTreeMap<String, AssociatedImage>,
    backend: Option<Box<dyn Backend>>,
    cache: TileCache,
    error: OnceLock<SlideError>,
}

impl Slide {
    /// Open a slide, dispatching through the format registry.
    ///
    /// Returns `Err(NotRecognized)` when no format claims the path.
    pub fn open(path: &Path) -> Result<Slide, SlideError> {
        let mut last_err =
            SlideError::NotRecognized(format!("{}: no formats registered", path.display()));

        for record in detect::formats() {
            match (record.detect)(path) {
                Ok(()) => {
                    debug!(format = record.name, path = %path.display(), "format detected");
                    return (record.open)(path);
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    fn from_parts(
        levels: Vec<Level>,
        plane_count: u32,
        properties: BTreeMap<String, String>,
        associated: BTreeMap<String, AssociatedImage>,
        backend: Box<dyn Backend>,
    ) -> Slide {
        Slide {
            levels,
            plane_count,
            properties,
            associated,
            backend: Some(backend),
            cache: TileCache::new(),
            error: OnceLock::new(),
        }
    }

    /// Build an opened-but-errored handle: metadata gathered so far is
    /// kept, every operation on pixels fails fast with the stored error.
    fn errored(
        err: SlideError,
        properties: BTreeMap<String, String>,
        associated: BTreeMap<String, AssociatedImage>,
    ) -> Slide {
        let error = OnceLock::new();
        let _ = error.set(err);
        Slide {
            levels: Vec::new(),
            plane_count: 0,
            properties,
            associated,
            backend: None,
            cache: TileCache::new(),
            error,
        }
    }

    /// The first error recorded against this handle, if any.
    pub fn get_error(&self) -> Option<String> {
        self.error.get().map(|e| e.to_string())
    }

    /// Number of pyramid levels (0 for an errored handle).
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Number of planes (channels); brightfield slides have one.
    pub fn plane_count(&self) -> u32 {
        self.plane_count
    }

    /// Pixel dimensions of a level.
    pub fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError> {
        self.levels
            .get(level as usize)
            .map(|l| (l.width as u64, l.height as u64))
            .ok_or_else(|| {
                SlideError::InvalidArgument(format!(
                    "level {} out of range ({} levels)",
                    level,
                    self.levels.len()
                ))
            })
    }

    /// Pixel dimensions of level 0.
    pub fn dimensions(&self) -> Result<(u64, u64), SlideError> {
        self.level_dimensions(0)
    }

    /// Downsample of a level relative to level 0.
    pub fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.levels
            .get(level as usize)
            .map(|l| l.downsample)
            .ok_or_else(|| {
                SlideError::InvalidArgument(format!(
                    "level {} out of range ({} levels)",
                    level,
                    self.levels.len()
                ))
            })
    }

    /// The level with the largest downsample not exceeding `downsample`.
    pub fn best_level_for_downsample(&self, downsample: f64) -> u32 {
        let mut best = 0;
        for (i, level) in self.levels.iter().enumerate() {
            if level.downsample <= downsample * 1.0001 {
                best = i;
            }
        }
        best as u32
    }

    /// Property keys, sorted.
    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(|k| k.as_str()).collect()
    }

    /// Look up a property value.
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|v| v.as_str())
    }

    /// Names of the associated images carried by the slide.
    pub fn associated_image_names(&self) -> Vec<&str> {
        self.associated.keys().map(|k| k.as_str()).collect()
    }

    /// Fetch an associated image by name.
    pub fn associated_image(&self, name: &str) -> Option<&AssociatedImage> {
        self.associated.get(name)
    }

    /// Paint a region into `dest`.
    ///
    /// `x` and `y` address the region's top-left corner in level-0
    /// coordinates; `w` and `h` are the size of `dest` in pixels of the
    /// requested `level`. Pixels are premultiplied ARGB. Tile-level read
    /// errors surface to the caller without poisoning the handle.
    pub fn read_region(
        &self,
        dest: &mut [u32],
        x: i64,
        y: i64,
        plane: u32,
        level: u32,
        w: u32,
        h: u32,
    ) -> Result<(), SlideError> {
        if let Some(err) = self.error.get() {
            return Err(err.clone());
        }

        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| SlideError::InvalidArgument("slide has no backend".to_string()))?;

        let level_ref = self.levels.get(level as usize).ok_or_else(|| {
            SlideError::InvalidArgument(format!(
                "level {} out of range ({} levels)",
                level,
                self.levels.len()
            ))
        })?;
        if plane >= self.plane_count {
            return Err(SlideError::InvalidArgument(format!(
                "plane {} out of range ({} planes)",
                plane, self.plane_count
            )));
        }

        let mut surface = Surface::new(dest, w, h)?;
        surface.fill(0);
        backend.paint_region(&self.cache, level_ref, &mut surface, x, y, plane, w, h)
    }

    /// Paint a region into a freshly allocated buffer.
    pub fn read_region_to_vec(
        &self,
        x: i64,
        y: i64,
        plane: u32,
        level: u32,
        w: u32,
        h: u32,
    ) -> Result<Vec<u32>, SlideError> {
        let mut dest = vec![0u32; (w as usize) * (h as usize)];
        self.read_region(&mut dest, x, y, plane, level, w, h)?;
        Ok(dest)
    }
}

// =============================================================================
// Open paths
// =============================================================================

/// Registry entry point: open any recognized Olympus path.
pub fn open_olympus(path: &Path) -> Result<Slide, SlideError> {
    let ext = path.extension().and_then(|e| e.to_str());
    match ext {
        Some("ets") => open_from_ets(path),
        Some("tif") => open_from_tiff(path),
        Some("vsi") => open_from_vsi(path),
        _ => Err(SlideError::NotRecognized(format!(
            "{}: not a .vsi, .ets or .tif file",
            path.display()
        ))),
    }
}

/// Open a `.vsi` descriptor: container metadata plus the sibling payload.
fn open_from_vsi(path: &Path) -> Result<Slide, SlideError> {
    detect::detect_vsi(path)?;

    let mut props = BTreeMap::new();
    let mut associated = BTreeMap::new();
    props.insert(properties::VENDOR.to_string(), "olympus".to_string());

    if let Err(e) = read_container_metadata(path, &mut props, &mut associated) {
        return Ok(Slide::errored(e, props, associated));
    }

    let (payload, kind) = match detect::related_payload_path(path) {
        Ok(found) => found,
        Err(e) => return Ok(Slide::errored(e, props, associated)),
    };

    let result = match kind {
        detect::PayloadKind::Ets => build_ets_slide(&payload, props.clone(), associated.clone()),
        detect::PayloadKind::Tiff => build_tiff_slide(&payload, props.clone(), associated.clone()),
    };

    match result {
        Ok(slide) => Ok(slide),
        Err(e) => Ok(Slide::errored(e, props, associated)),
    }
}

/// Open an `.ets` payload directly, recovering metadata from the owning
/// `.vsi` when the directory layout reveals one.
fn open_from_ets(path: &Path) -> Result<Slide, SlideError> {
    detect::detect_ets(path)?;

    let mut props = BTreeMap::new();
    let mut associated = BTreeMap::new();
    props.insert(properties::VENDOR.to_string(), "olympus".to_string());

    if let Some(vsi) = detect::parent_vsi_path(path) {
        if vsi.exists() {
            if let Err(e) = read_container_metadata(&vsi, &mut props, &mut associated) {
                debug!(vsi = %vsi.display(), error = %e, "ignoring unreadable parent container");
            }
        }
    }

    match build_ets_slide(path, props.clone(), associated.clone()) {
        Ok(slide) => Ok(slide),
        Err(e) => Ok(Slide::errored(e, props, associated)),
    }
}

/// Open an OME `.tif` payload directly.
fn open_from_tiff(path: &Path) -> Result<Slide, SlideError> {
    detect::detect_olympus_tiff(path)?;

    let mut props = BTreeMap::new();
    props.insert(properties::VENDOR.to_string(), "olympus".to_string());

    match build_tiff_slide(path, props.clone(), BTreeMap::new()) {
        Ok(slide) => Ok(slide),
        Err(e) => Ok(Slide::errored(e, props, BTreeMap::new())),
    }
}

/// Build an ETS-backed slide.
fn build_ets_slide(
    path: &Path,
    mut props: BTreeMap<String, String>,
    associated: BTreeMap<String, AssociatedImage>,
) -> Result<Slide, SlideError> {
    let reader = FileRangeReader::open(path)?;
    let volume = EtsVolume::read(&reader)?;

    let levels: Vec<Level> = volume
        .levels
        .iter()
        .enumerate()
        .map(|(i, l)| Level {
            index: i as u32,
            width: l.width as f64,
            height: l.height as f64,
            downsample: l.downsample,
            grid: Grid::new(
                l.tiles_across,
                l.tiles_down,
                volume.ets.dim_x as f64,
                volume.ets.dim_y as f64,
            ),
        })
        .collect();

    let plane_count = volume.index.channels();
    let bg = volume.ets.background_color;
    props.insert(
        properties::BACKGROUND_COLOR.to_string(),
        format!("{:02x}{:02x}{:02x}", bg[0], bg[1], bg[2]),
    );

    // The declared non-empty rectangle is the full level-0 grid
    props.insert(properties::BOUNDS_X.to_string(), "0".to_string());
    props.insert(properties::BOUNDS_Y.to_string(), "0".to_string());
    props.insert(
        properties::BOUNDS_WIDTH.to_string(),
        format!("{}", volume.levels[0].width),
    );
    props.insert(
        properties::BOUNDS_HEIGHT.to_string(),
        format!("{}", volume.levels[0].height),
    );

    props.insert(
        "olympus.ets.quality".to_string(),
        volume.ets.quality.to_string(),
    );
    props.insert(
        "olympus.ets.use-pyramid".to_string(),
        volume.ets.use_pyramid.to_string(),
    );
    props.insert(
        "olympus.ets.pixel-type".to_string(),
        match volume.ets.pixel_type {
            PixelType::Uint8 => "uint8".to_string(),
            PixelType::Int32 => "int32".to_string(),
        },
    );
    props.insert(
        "olympus.ets.colorspace".to_string(),
        match volume.ets.colorspace {
            ColorSpace::Fluorescence => "fluorescence".to_string(),
            ColorSpace::Brightfield => "brightfield".to_string(),
        },
    );

    let backend = EtsBackend::new(reader, volume)?;
    Ok(Slide::from_parts(
        levels,
        plane_count,
        props,
        associated,
        Box::new(backend),
    ))
}

/// Build an OME-TIFF-backed slide.
fn build_tiff_slide(
    path: &Path,
    mut props: BTreeMap<String, String>,
    associated: BTreeMap<String, AssociatedImage>,
) -> Result<Slide, SlideError> {
    let reader = FileRangeReader::open(path)?;
    let tiff = TiffFile::parse(&reader)?;

    let description = tiff
        .image_description(&reader, 0)?
        .ok_or_else(|| SlideError::Decode("payload TIFF has no ImageDescription".to_string()))?;
    let ome = OmeDescription::parse(&description)?;

    if let Some(v) = &ome.microscope_manufacturer {
        props.insert("olympus.device-model".to_string(), v.clone());
    }
    if let Some(v) = &ome.microscope_model {
        props.insert("olympus.device-version".to_string(), v.clone());
    }

    if let Some(image) = ome.images.first() {
        if let Some(date) = &image.acquisition_date {
            props.insert("olympus.acquisition-date".to_string(), date.clone());
        }
        if let (Some(x), Some(y)) = (image.physical_size_x, image.physical_size_y) {
            props.insert(properties::MPP_X.to_string(), format_double(x));
            props.insert(properties::MPP_Y.to_string(), format_double(y));
        }
        for (i, ch) in image.channels.iter().enumerate() {
            if let Some(name) = &ch.name {
                props.insert(format!("olympus.channel[{}].name", i), name.clone());
            }
            if let Some(wl) = ch.emission_wavelength {
                props.insert(
                    format!("olympus.channel[{}].emission-wavelength", i),
                    wl.to_string(),
                );
            }
        }
    }

    let backend = TiffBackend::new_ome(reader, &tiff, &ome)?;

    let levels: Vec<Level> = backend
        .levels()
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let dir = &l.channels[0];
            Level {
                index: i as u32,
                width: dir.width as f64,
                height: dir.height as f64,
                downsample: backend.levels()[0].channels[0].width as f64 / dir.width as f64,
                grid: Grid::new(
                    dir.tiles_across,
                    dir.height.div_ceil(dir.tile_h),
                    dir.tile_w as f64,
                    dir.tile_h as f64,
                ),
            }
        })
        .collect();

    let plane_count = backend.levels()[0].channels.len() as u32;

    Ok(Slide::from_parts(
        levels,
        plane_count,
        props,
        associated,
        Box::new(backend),
    ))
}

/// Format a floating property value the way the C library does.
fn format_double(value: f64) -> String {
    format!("{}", value)
}

// =============================================================================
// Container metadata
// =============================================================================

/// Pull resolution properties and the macro image out of a `.vsi`
/// container.
///
/// Directory 0 carries resolution tags that become MPP properties; the
/// raw ImageDescription is deliberately not copied into the property
/// table. Directory 1, when present, is the macro overview.
fn read_container_metadata(
    path: &Path,
    props: &mut BTreeMap<String, String>,
    associated: &mut BTreeMap<String, AssociatedImage>,
) -> Result<(), SlideError> {
    let reader = FileRangeReader::open(path)?;
    let tiff = TiffFile::parse(&reader)?;

    if let Some((mpp_x, mpp_y)) = tiff.microns_per_pixel(&reader, 0)? {
        props.insert(properties::MPP_X.to_string(), format_double(mpp_x));
        props.insert(properties::MPP_Y.to_string(), format_double(mpp_y));
    }

    if tiff.directory_count() > 1 {
        match read_strip_image(&reader, &tiff, 1) {
            Ok(Some(image)) => {
                associated.insert("macro".to_string(), image);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read macro image");
            }
        }
    }

    Ok(())
}

/// Read a strip-organized directory into an associated image.
///
/// Handles uncompressed strips and single-strip JPEG; anything else is
/// skipped rather than failing the open.
fn read_strip_image(
    reader: &FileRangeReader,
    tiff: &TiffFile,
    dir_index: usize,
) -> Result<Option<AssociatedImage>, SlideError> {
    let byte_order = tiff.header.byte_order;
    let ifd = match tiff.directory(dir_index) {
        Some(ifd) => ifd,
        None => return Ok(None),
    };

    let (width, height) = match (ifd.image_width(byte_order), ifd.image_height(byte_order)) {
        (Some(w), Some(h)) => (w, h),
        _ => return Ok(None),
    };

    let vr = ValueReader::new(reader, &tiff.header);
    let offsets = match ifd.get_entry_by_tag(TiffTag::StripOffsets) {
        Some(e) => vr.read_u64_array(e).map_err(SlideError::from)?,
        None => return Ok(None),
    };
    let counts = match ifd.get_entry_by_tag(TiffTag::StripByteCounts) {
        Some(e) => vr.read_u64_array(e).map_err(SlideError::from)?,
        None => return Ok(None),
    };
    if offsets.len() != counts.len() || offsets.is_empty() {
        return Ok(None);
    }

    let compression = ifd
        .compression(byte_order)
        .and_then(Compression::from_u16)
        .unwrap_or(Compression::None);

    match compression {
        Compression::None => {
            let mut samples = Vec::new();
            for (&offset, &count) in offsets.iter().zip(&counts) {
                samples.extend_from_slice(&reader.read_exact_at(offset, count as usize)?);
            }
            let argb = pack_samples(&samples, width, height, ifd.samples_per_pixel(byte_order))?;
            Ok(Some(AssociatedImage {
                width,
                height,
                argb,
            }))
        }
        Compression::Jpeg if offsets.len() == 1 => {
            let data = reader.read_exact_at(offsets[0], counts[0] as usize)?;
            let argb = decode_tile(CodecTag::Jpeg, &data, width, height)?;
            Ok(Some(AssociatedImage {
                width,
                height,
                argb,
            }))
        }
        other => {
            debug!(?other, "skipping associated image with unsupported compression");
            Ok(None)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
