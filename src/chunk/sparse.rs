//! Sparse chunk encoding: only cells holding data are stored.

use eyre::{ensure, Result};
use hashbrown::HashMap;

use super::{CellStore, ChunkEncoding};
use crate::config::SPARSE_ENTRY_BYTES;
use crate::grid::CellValue;

pub struct SparseStore<V: CellValue> {
    len: u32,
    entries: HashMap<u32, V>,
    nodata: V,
}

impl<V: CellValue> SparseStore<V> {
    pub fn new(len: u32, nodata: V) -> Self {
        Self {
            len,
            entries: HashMap::new(),
            nodata,
        }
    }

    /// Payload layout: `entry_count` records of (u32 offset, value).
    pub fn decode(payload: &[u8], len: u32, entry_count: u64, nodata: V) -> Result<Self> {
        let record = 4 + V::WIDTH;
        ensure!(
            payload.len() as u64 == entry_count * record as u64,
            "sparse payload is {} bytes, expected {} entries of {} bytes",
            payload.len(),
            entry_count,
            record
        );

        let mut entries = HashMap::with_capacity(entry_count as usize);
        for raw in payload.chunks_exact(record) {
            let offset = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            ensure!(
                offset < len,
                "sparse entry offset {} outside chunk of {} cells",
                offset,
                len
            );
            entries.insert(offset, V::read_le(&raw[4..]));
        }

        Ok(Self {
            len,
            entries,
            nodata,
        })
    }

    pub fn populated(&self) -> usize {
        self.entries.len()
    }
}

impl<V: CellValue> CellStore<V> for SparseStore<V> {
    fn len(&self) -> u32 {
        self.len
    }

    fn get(&self, offset: u32) -> V {
        self.entries.get(&offset).copied().unwrap_or(self.nodata)
    }

    fn set(&mut self, offset: u32, value: V) -> V {
        let old = if value.is_nodata(self.nodata) {
            self.entries.remove(&offset)
        } else {
            self.entries.insert(offset, value)
        };
        old.unwrap_or(self.nodata)
    }

    fn heap_bytes_after(&self, offset: u32, value: V) -> usize {
        let present = self.entries.contains_key(&offset);
        let populated = match (present, value.is_nodata(self.nodata)) {
            (false, false) => self.entries.len() + 1,
            (true, true) => self.entries.len() - 1,
            _ => self.entries.len(),
        };
        populated * SPARSE_ENTRY_BYTES
    }

    fn heap_bytes(&self) -> usize {
        self.entries.len() * SPARSE_ENTRY_BYTES
    }

    fn nodata(&self) -> V {
        self.nodata
    }

    fn for_each_data(&self, f: &mut dyn FnMut(u32, V)) {
        let mut offsets: Vec<u32> = self.entries.keys().copied().collect();
        offsets.sort_unstable();
        for offset in offsets {
            f(offset, self.entries[&offset]);
        }
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::Sparse
    }

    fn entry_count(&self) -> u64 {
        self.entries.len() as u64
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        let mut record = vec![0u8; V::WIDTH];
        self.for_each_data(&mut |offset, value| {
            out.extend_from_slice(&offset.to_le_bytes());
            value.write_le(&mut record);
            out.extend_from_slice(&record);
        });
    }

    fn payload_len(&self) -> usize {
        self.entries.len() * (4 + V::WIDTH)
    }
}
