//! Format detection for Olympus slide files.
//!
//! A slide can be addressed three ways:
//!
//! - **`.vsi`**: the top-level descriptor, a non-tiled TIFF-like container
//!   whose pixel payload lives in a sibling directory
//!   `_<stem>_/stack<N>/frame_t.{ets,tif}`.
//! - **`.ets`**: a SIS/ETS binary payload opened directly.
//! - **`.tif`**: an OME pyramidal TIFF payload, identified by an
//!   `/OME/Experimenter/@UserName` of `olympus` in its ImageDescription.
//!
//! Detection is by extension plus successful header validation, and is
//! side-effect free: failures are reported as `NotRecognized` with a
//! descriptive message and never corrupt state.

use std::path::{Path, PathBuf};

use crate::error::SlideError;
use crate::format::ets::{EtsHeader, SisHeader, ETS_HEADER_SIZE, SIS_HEADER_SIZE};
use crate::format::ome::OmeDescription;
use crate::format::tiff::TiffFile;
use crate::io::{FileRangeReader, RangeReader};
use crate::slide::Slide;

/// Extension of the SIS/ETS binary payload.
pub const ETS_EXT: &str = "ets";

/// Extension of the OME-TIFF payload.
pub const TIF_EXT: &str = "tif";

/// Extension of the top-level descriptor.
pub const VSI_EXT: &str = "vsi";

// =============================================================================
// Format registry
// =============================================================================

/// One registered slide format.
///
/// The registry is a static table of `{name, vendor, detect, open}`
/// records; dispatch walks it in order.
pub struct FormatRecord {
    /// Format name reported by detection
    pub name: &'static str,

    /// Vendor identifier
    pub vendor: &'static str,

    /// Cheap recognition check; `Ok(())` claims the path
    pub detect: fn(&Path) -> Result<(), SlideError>,

    /// Full open of a recognized path
    pub open: fn(&Path) -> Result<Slide, SlideError>,
}

/// All registered formats.
pub fn formats() -> &'static [FormatRecord] {
    static FORMATS: [FormatRecord; 1] = [FormatRecord {
        name: "olympus-vsi",
        vendor: "olympus",
        detect: detect_olympus,
        open: crate::slide::open_olympus,
    }];
    &FORMATS
}

/// Identify the format of a path.
///
/// Returns the format name of the first registry record that claims the
/// path, or the last record's rejection when none does.
pub fn detect_vendor(path: &Path) -> Result<&'static str, SlideError> {
    let mut last_err =
        SlideError::NotRecognized(format!("{}: no formats registered", path.display()));

    for record in formats() {
        match (record.detect)(path) {
            Ok(()) => return Ok(record.name),
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}

// =============================================================================
// Payload kinds and path conventions
// =============================================================================

/// Kind of pixel payload backing a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// SIS/ETS binary container
    Ets,
    /// OME pyramidal TIFF
    Tiff,
}

/// Locate the payload of a `.vsi` descriptor.
///
/// For `<dir>/<stem>.vsi` the payload is the first
/// `<dir>/_<stem>_/stack*/frame_t.{ets,tif}`, scanning stacks in name
/// order for determinism.
pub fn related_payload_path(vsi_path: &Path) -> Result<(PathBuf, PayloadKind), SlideError> {
    let stem = vsi_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            SlideError::NotRecognized(format!("{}: no file stem", vsi_path.display()))
        })?;
    let dir = vsi_path.parent().unwrap_or_else(|| Path::new("."));
    let slidedat_dir = dir.join(format!("_{}_", stem));

    let mut stacks: Vec<PathBuf> = std::fs::read_dir(&slidedat_dir)
        .map_err(|e| {
            SlideError::NotRecognized(format!(
                "{}: no payload directory {}: {}",
                vsi_path.display(),
                slidedat_dir.display(),
                e
            ))
        })?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("stack"))
                    .unwrap_or(false)
        })
        .collect();
    stacks.sort();

    for stack in &stacks {
        let entries = match std::fs::read_dir(stack) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let mut frames: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("frame_t"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        for frame in frames {
            match extension(&frame) {
                Some(ext) if ext == ETS_EXT => return Ok((frame, PayloadKind::Ets)),
                Some(ext) if ext == TIF_EXT => return Ok((frame, PayloadKind::Tiff)),
                _ => {}
            }
        }
    }

    Err(SlideError::NotRecognized(format!(
        "{}: no frame_t payload under {}",
        vsi_path.display(),
        slidedat_dir.display()
    )))
}

/// Walk from an `.ets` payload up to its owning `.vsi` descriptor.
///
/// The payload lives at `<dir>/_<stem>_/stack<N>/frame_t.ets`; the
/// descriptor is `<dir>/<stem>.vsi`. Returns `None` when the directory
/// names do not follow that convention.
pub fn parent_vsi_path(ets_path: &Path) -> Option<PathBuf> {
    let stack_dir = ets_path.parent()?;
    let slidedat_dir = stack_dir.parent()?;
    let name = slidedat_dir.file_name()?.to_str()?;

    // the payload directory is the stem wrapped in underscores
    let stem = name.strip_prefix('_')?.strip_suffix('_')?;
    if stem.is_empty() {
        return None;
    }

    let root = slidedat_dir.parent()?;
    Some(root.join(format!("{}.{}", stem, VSI_EXT)))
}

// =============================================================================
// Per-kind detection
// =============================================================================

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Entry point for the registry record.
fn detect_olympus(path: &Path) -> Result<(), SlideError> {
    match extension(path) {
        Some(ext) if ext == ETS_EXT => detect_ets(path),
        Some(ext) if ext == TIF_EXT => detect_olympus_tiff(path),
        Some(ext) if ext == VSI_EXT => detect_vsi(path),
        _ => Err(SlideError::NotRecognized(format!(
            "{}: not a .vsi, .ets or .tif file",
            path.display()
        ))),
    }
}

/// Recognize a SIS/ETS payload: extension, existence, valid headers.
pub fn detect_ets(path: &Path) -> Result<(), SlideError> {
    if extension(path) != Some(ETS_EXT) {
        return Err(SlideError::NotRecognized(format!(
            "{}: missing .{} extension",
            path.display(),
            ETS_EXT
        )));
    }

    let reader = FileRangeReader::open(path)
        .map_err(|e| SlideError::NotRecognized(format!("{}", e)))?;

    let sis_bytes = reader
        .read_exact_at(0, SIS_HEADER_SIZE)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;
    let sis = SisHeader::parse(&sis_bytes)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;

    let ets_bytes = reader
        .read_exact_at(sis.ets_offset, ETS_HEADER_SIZE)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;
    EtsHeader::parse(&ets_bytes)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;

    Ok(())
}

/// Recognize an Olympus OME-TIFF payload: tiled TIFF whose OME
/// description names the `olympus` experimenter.
pub fn detect_olympus_tiff(path: &Path) -> Result<(), SlideError> {
    if extension(path) != Some(TIF_EXT) {
        return Err(SlideError::NotRecognized(format!(
            "{}: missing .{} extension",
            path.display(),
            TIF_EXT
        )));
    }

    let reader = FileRangeReader::open(path)
        .map_err(|e| SlideError::NotRecognized(format!("{}", e)))?;
    let tiff = TiffFile::parse(&reader)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;

    let first = tiff.directory(0).ok_or_else(|| {
        SlideError::NotRecognized(format!("{}: TIFF has no directories", path.display()))
    })?;
    if !first.is_tiled() {
        return Err(SlideError::NotRecognized(format!(
            "{}: TIFF is not tiled",
            path.display()
        )));
    }

    let description = tiff
        .image_description(&reader, 0)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| {
            SlideError::NotRecognized(format!("{}: no ImageDescription", path.display()))
        })?;

    let ome = OmeDescription::parse(&description)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;

    match ome.experimenter_user_name.as_deref() {
        Some("olympus") => Ok(()),
        other => Err(SlideError::NotRecognized(format!(
            "{}: experimenter user name is {:?}, not \"olympus\"",
            path.display(),
            other
        ))),
    }
}

/// Recognize a `.vsi` descriptor: an existing, non-tiled TIFF-like
/// container with a recognizable sibling payload.
pub fn detect_vsi(path: &Path) -> Result<(), SlideError> {
    if extension(path) != Some(VSI_EXT) {
        return Err(SlideError::NotRecognized(format!(
            "{}: missing .{} extension",
            path.display(),
            VSI_EXT
        )));
    }
    if !path.exists() {
        return Err(SlideError::NotRecognized(format!(
            "{}: file does not exist",
            path.display()
        )));
    }

    let reader = FileRangeReader::open(path)
        .map_err(|e| SlideError::NotRecognized(format!("{}", e)))?;
    let tiff = TiffFile::parse(&reader)
        .map_err(|e| SlideError::NotRecognized(format!("{}: {}", path.display(), e)))?;

    let first = tiff.directory(0).ok_or_else(|| {
        SlideError::NotRecognized(format!("{}: container has no directories", path.display()))
    })?;
    if first.is_tiled() {
        return Err(SlideError::NotRecognized(format!(
            "{}: container TIFF is tiled",
            path.display()
        )));
    }

    let (payload, kind) = related_payload_path(path)?;
    match kind {
        PayloadKind::Ets => detect_ets(&payload),
        PayloadKind::Tiff => detect_olympus_tiff(&payload),
    }
}

// =============================================================================
// Tests
// =============================================================================
