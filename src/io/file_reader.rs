//! Local-file range reader.
//!
//! Slide payloads live on the local filesystem; this reader provides
//! positioned reads over a shared file handle. The handle is guarded by a
//! mutex so a single reader can be shared between threads painting
//! different regions concurrently.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::SlideError;

use super::RangeReader;

/// Range reader over a local file.
///
/// Reads are seek-then-read under an internal lock. The file size is
/// captured once at open time; payload files are never mutated while a
/// slide is open.
#[derive(Debug)]
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for range reading.
    pub fn open(path: &Path) -> Result<Self, SlideError> {
        let file = File::open(path)
            .map_err(|e| SlideError::Io(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .map_err(|e| SlideError::Io(format!("{}: {}", path.display(), e)))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier: path.display().to_string(),
        })
    }
}

impl RangeReader for FileRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, SlideError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(SlideError::Io(format!(
                "range out of bounds: requested {} bytes at offset {}, size is {}",
                len, offset, self.size
            )));
        }

        let mut buf = vec![0u8; len];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| SlideError::Io(format!("{}: seek: {}", self.identifier, e)))?;
            file.read_exact(&mut buf)
                .map_err(|e| SlideError::Io(format!("{}: read: {}", self.identifier, e)))?;
        }

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Tests
// =============================================================================
