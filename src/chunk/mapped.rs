//! # Mapped Chunk Store
//!
//! Dense values living directly in a chunk file through a shared memory map.
//! Writes reach the file without going through the persistence bridge, so a
//! mapped chunk costs no heap and evicting it only flushes the map.
//!
//! ## File Layout
//!
//! ```text
//! +------------------------------+
//! | chunk header (64 bytes)      |  owned by the persistence layer
//! +------------------------------+
//! | len * WIDTH value bytes      |  little-endian, row-major
//! +------------------------------+
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::{CellStore, ChunkEncoding};
use crate::grid::CellValue;

pub struct MappedStore<V: CellValue> {
    path: PathBuf,
    _file: File,
    mmap: MmapMut,
    header_len: usize,
    len: u32,
    nodata: V,
}

impl<V: CellValue> MappedStore<V> {
    /// Creates the file, writes `header` at the front and fills the value
    /// region with no-data.
    pub fn create<P: AsRef<Path>>(path: P, header: &[u8], len: u32, nodata: V) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create mapped chunk '{}'", path.display()))?;

        let file_size = (header.len() + len as usize * V::WIDTH) as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: the file was just created and truncated by this process, and
        // the map is owned by the store together with the file handle. Every
        // access goes through get/set which bounds-check against `len`.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let mut store = Self {
            path: path.to_path_buf(),
            _file: file,
            mmap,
            header_len: header.len(),
            len,
            nodata,
        };
        store.mmap[..header.len()].copy_from_slice(header);
        for offset in 0..len {
            store.set(offset, nodata);
        }
        Ok(store)
    }

    /// Maps an existing file whose header the caller already validated.
    pub fn open<P: AsRef<Path>>(path: P, header_len: usize, len: u32, nodata: V) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open mapped chunk '{}'", path.display()))?;

        let expected = (header_len + len as usize * V::WIDTH) as u64;
        let actual = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();
        ensure!(
            actual == expected,
            "mapped chunk '{}' is {} bytes, expected {}",
            path.display(),
            actual,
            expected
        );

        // SAFETY: chunk files are private to the grid directory and the size
        // was checked above, so every offset below `len` maps a valid value.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            mmap,
            header_len,
            len,
            nodata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The value region as stored in the file.
    pub fn payload(&self) -> &[u8] {
        &self.mmap[self.header_len..]
    }

    /// Rewrites the header region and flushes the whole map to disk.
    pub fn flush_with_header(&mut self, header: &[u8]) -> Result<()> {
        ensure!(
            header.len() == self.header_len,
            "header is {} bytes, mapped chunk reserves {}",
            header.len(),
            self.header_len
        );
        self.mmap[..self.header_len].copy_from_slice(header);
        self.mmap
            .flush()
            .wrap_err_with(|| format!("failed to sync mapped chunk '{}'", self.path.display()))
    }

    fn slot(&self, offset: u32) -> usize {
        self.header_len + offset as usize * V::WIDTH
    }
}

impl<V: CellValue> CellStore<V> for MappedStore<V> {
    fn len(&self) -> u32 {
        self.len
    }

    fn get(&self, offset: u32) -> V {
        let at = self.slot(offset);
        V::read_le(&self.mmap[at..at + V::WIDTH])
    }

    fn set(&mut self, offset: u32, value: V) -> V {
        let old = self.get(offset);
        let at = self.slot(offset);
        value.write_le(&mut self.mmap[at..at + V::WIDTH]);
        old
    }

    fn heap_bytes_after(&self, _offset: u32, _value: V) -> usize {
        0
    }

    fn heap_bytes(&self) -> usize {
        0
    }

    fn nodata(&self) -> V {
        self.nodata
    }

    fn for_each_data(&self, f: &mut dyn FnMut(u32, V)) {
        for offset in 0..self.len {
            let value = self.get(offset);
            if !value.is_nodata(self.nodata) {
                f(offset, value);
            }
        }
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::Mapped
    }

    fn entry_count(&self) -> u64 {
        self.len as u64
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.payload());
    }

    fn payload_len(&self) -> usize {
        self.len as usize * V::WIDTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_fills_nodata_and_keeps_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0_0.chunk");

        let store = MappedStore::create(&path, &[7u8; 16], 6, -1.0f64).unwrap();
        assert!((0..6).all(|o| store.get(o) == -1.0));
        assert_eq!(&store.mmap[..16], &[7u8; 16]);
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0_0.chunk");

        {
            let mut store = MappedStore::create(&path, &[0u8; 16], 6, i32::MIN).unwrap();
            store.set(4, 42);
            store.flush_with_header(&[1u8; 16]).unwrap();
        }

        let store = MappedStore::<i32>::open(&path, 16, 6, i32::MIN).unwrap();
        assert_eq!(store.get(4), 42);
        assert_eq!(store.get(0), i32::MIN);
    }

    #[test]
    fn open_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0_0.chunk");
        MappedStore::create(&path, &[0u8; 16], 6, i32::MIN).unwrap();

        assert!(MappedStore::<i32>::open(&path, 16, 7, i32::MIN).is_err());
    }
}
