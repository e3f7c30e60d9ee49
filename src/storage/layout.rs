use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::config::{CHUNK_DIR_NAME, CHUNK_FILE_EXTENSION, META_FILE_NAME, SNAPSHOT_FILE_NAME};
use crate::grid::ChunkId;

/// Paths inside one grid directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridFiles {
    root: PathBuf,
}

impl GridFiles {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE_NAME)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE_NAME)
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.root.join(CHUNK_DIR_NAME)
    }

    /// `<root>/chunks/<chunk_row>_<chunk_col>.chunk`
    pub fn chunk_path(&self, id: ChunkId) -> PathBuf {
        self.chunk_dir()
            .join(format!("{}_{}.{}", id.row, id.col, CHUNK_FILE_EXTENSION))
    }

    pub fn create_dirs(&self) -> Result<()> {
        let chunks = self.chunk_dir();
        std::fs::create_dir_all(&chunks)
            .wrap_err_with(|| format!("failed to create grid directory '{}'", chunks.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_path_is_derived_from_id() {
        let files = GridFiles::new("/data/dem");
        assert_eq!(
            files.chunk_path(ChunkId::new(3, 12)),
            PathBuf::from("/data/dem/chunks/3_12.chunk")
        );
        assert_eq!(files.meta_path(), PathBuf::from("/data/dem/grid.meta"));
    }
}
