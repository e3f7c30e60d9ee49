//! # Storage Module
//!
//! The on-disk side of a grid: per-chunk files, the grid metadata file and
//! the optional resident-set snapshot.
//!
//! ## Grid Directory Layout
//!
//! Every grid owns one directory:
//!
//! ```text
//! grid_dir/
//! ├── grid.meta            # Shape, dimensions, no-data, statistics
//! ├── resident.cache       # Optional snapshot of the resident chunks
//! └── chunks/
//!     ├── 0_0.chunk        # One file per persisted chunk
//!     ├── 0_1.chunk
//!     └── ...
//! ```
//!
//! A chunk that was never persisted has no file and reads as all no-data.
//!
//! ## Durability
//!
//! Chunk files, grid.meta and resident.cache are written to a temporary file
//! and renamed into place, so a reader never observes a half-written file.
//! There is no journal: a crash between two writes can leave grid.meta and
//! the chunk files out of step.
//!
//! ## Checksums
//!
//! Chunk payloads and snapshot records carry a CRC-64/ECMA-182 checksum.
//! A mismatch on load is reported as [`StorageErrorKind::Corrupt`].
//!
//! ## Module Organization
//!
//! - `headers`: zerocopy header structs for all three file types
//! - `layout`: path derivation for a grid directory
//! - `swap`: chunk save/load (the persistence bridge)
//! - `metadata`: grid.meta read/write
//! - `snapshot`: resident.cache read/write

mod headers;
mod layout;
pub mod metadata;
pub mod snapshot;
pub mod swap;

use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};

pub use headers::{ChunkFileHeader, GridFileHeader, SnapshotHeader};
pub use layout::GridFiles;
pub use metadata::GridMetadata;
pub use swap::SaveOutcome;

pub(crate) const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The file does not exist.
    Missing,
    /// The file exists but fails validation.
    Corrupt,
    /// The file names an encoding this build does not know.
    UnknownEncoding,
    /// The operating system refused the read or write.
    Io,
}

impl StorageErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            StorageErrorKind::Missing => "missing",
            StorageErrorKind::Corrupt => "corrupt",
            StorageErrorKind::UnknownEncoding => "unknown encoding in",
            StorageErrorKind::Io => "i/o failure on",
        }
    }
}

/// A grid file could not be read or written.
#[derive(Debug, Clone)]
pub struct StorageError {
    pub path: PathBuf,
    pub kind: StorageErrorKind,
    pub detail: String,
}

impl StorageError {
    pub fn new(path: &Path, kind: StorageErrorKind, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn report(
        path: &Path,
        kind: StorageErrorKind,
        detail: impl Into<String>,
    ) -> eyre::Report {
        eyre::Report::new(Self::new(path, kind, detail))
    }

    pub(crate) fn from_io(path: &Path, err: &std::io::Error) -> eyre::Report {
        let kind = if err.kind() == std::io::ErrorKind::NotFound {
            StorageErrorKind::Missing
        } else {
            StorageErrorKind::Io
        };
        Self::report(path, kind, err.to_string())
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} file '{}': {}", self.kind.name(), self.path.display(), self.detail)
    }
}

impl std::error::Error for StorageError {}

/// The storage error carried by a report, if any.
pub fn storage_error(err: &eyre::Report) -> Option<&StorageError> {
    err.chain().find_map(|cause| cause.downcast_ref::<StorageError>())
}

/// Writes `parts` back to back into `dest` through a temporary sibling and a
/// rename.
pub(crate) fn atomic_write(dest: &Path, parts: &[&[u8]]) -> std::io::Result<()> {
    use std::io::Write;

    let tmp = dest.with_extension("tmp");
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        for part in parts {
            file.write_all(part)?;
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_maps_to_missing_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");
        let io = std::fs::read(&path).unwrap_err();

        let err = StorageError::from_io(&path, &io);
        assert_eq!(storage_error(&err).unwrap().kind, StorageErrorKind::Missing);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.chunk");
        atomic_write(&path, &[b"old".as_slice()]).unwrap();
        atomic_write(&path, &[b"ne".as_slice(), b"w".as_slice()]).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!path.with_extension("tmp").exists());
    }
}
