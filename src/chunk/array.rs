//! Dense row-major chunk encoding.

use eyre::{ensure, Result};

use super::{CellStore, ChunkEncoding};
use crate::grid::CellValue;

pub struct ArrayStore<V: CellValue> {
    values: Vec<V>,
    nodata: V,
}

impl<V: CellValue> ArrayStore<V> {
    pub fn filled(len: u32, nodata: V) -> Self {
        Self {
            values: vec![nodata; len as usize],
            nodata,
        }
    }

    pub fn from_values(values: Vec<V>, nodata: V) -> Self {
        Self { values, nodata }
    }

    pub fn bytes_for(len: u32) -> usize {
        len as usize * V::WIDTH
    }

    pub fn decode(payload: &[u8], len: u32, nodata: V) -> Result<Self> {
        ensure!(
            payload.len() == Self::bytes_for(len),
            "array payload is {} bytes, expected {} for {} cells",
            payload.len(),
            Self::bytes_for(len),
            len
        );
        let values = payload.chunks_exact(V::WIDTH).map(V::read_le).collect();
        Ok(Self { values, nodata })
    }

    pub fn as_slice(&self) -> &[V] {
        &self.values
    }
}

impl<V: CellValue> CellStore<V> for ArrayStore<V> {
    fn len(&self) -> u32 {
        self.values.len() as u32
    }

    fn get(&self, offset: u32) -> V {
        self.values[offset as usize]
    }

    fn set(&mut self, offset: u32, value: V) -> V {
        std::mem::replace(&mut self.values[offset as usize], value)
    }

    fn heap_bytes_after(&self, _offset: u32, _value: V) -> usize {
        self.heap_bytes()
    }

    fn heap_bytes(&self) -> usize {
        Self::bytes_for(self.len())
    }

    fn nodata(&self) -> V {
        self.nodata
    }

    fn for_each_data(&self, f: &mut dyn FnMut(u32, V)) {
        for (offset, &value) in self.values.iter().enumerate() {
            if !value.is_nodata(self.nodata) {
                f(offset as u32, value);
            }
        }
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::Array
    }

    fn entry_count(&self) -> u64 {
        self.values.len() as u64
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.payload_len(), 0);
        for (slot, value) in out[start..].chunks_exact_mut(V::WIDTH).zip(&self.values) {
            value.write_le(slot);
        }
    }

    fn payload_len(&self) -> usize {
        self.heap_bytes()
    }
}
