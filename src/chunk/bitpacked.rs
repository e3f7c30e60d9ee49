//! Bit-packed chunk encoding for single-valued chunks such as masks.
//!
//! The store keeps one data value and a presence bit per cell. A set bit reads
//! as the data value, a clear bit as no-data. Writing a second distinct value
//! is impossible in this layout; [`BitPackedStore::needs_widening`] tells the
//! owning [`super::ChunkStore`] to convert to an array first.

use eyre::{ensure, Result};

use super::{ArrayStore, CellStore, ChunkEncoding};
use crate::grid::CellValue;

pub struct BitPackedStore<V: CellValue> {
    len: u32,
    value: Option<V>,
    bits: Vec<u64>,
    populated: u32,
    nodata: V,
}

impl<V: CellValue> BitPackedStore<V> {
    pub fn new(len: u32, nodata: V) -> Self {
        Self {
            len,
            value: None,
            bits: vec![0; Self::words_for(len)],
            populated: 0,
            nodata,
        }
    }

    fn words_for(len: u32) -> usize {
        (len as usize).div_ceil(64)
    }

    fn mask_bytes(len: u32) -> usize {
        (len as usize).div_ceil(8)
    }

    pub fn bytes_for(len: u32) -> usize {
        Self::words_for(len) * 8
    }

    /// Payload layout: the data value, then one presence bit per cell,
    /// least-significant bit first.
    pub fn decode(payload: &[u8], len: u32, nodata: V) -> Result<Self> {
        let mask_len = Self::mask_bytes(len);
        ensure!(
            payload.len() == V::WIDTH + mask_len,
            "bit-packed payload is {} bytes, expected {}",
            payload.len(),
            V::WIDTH + mask_len
        );

        let value = V::read_le(payload);
        let mut store = Self::new(len, nodata);
        for (i, &byte) in payload[V::WIDTH..].iter().enumerate() {
            store.bits[i / 8] |= (byte as u64) << ((i % 8) * 8);
        }

        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = store.bits.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }

        store.populated = store.bits.iter().map(|w| w.count_ones()).sum();
        if store.populated > 0 {
            ensure!(
                !value.is_nodata(nodata),
                "bit-packed payload marks cells present with the no-data value"
            );
            store.value = Some(value);
        }
        Ok(store)
    }

    fn bit(&self, offset: u32) -> bool {
        self.bits[offset as usize / 64] & (1u64 << (offset % 64)) != 0
    }

    fn set_bit(&mut self, offset: u32, on: bool) {
        let word = &mut self.bits[offset as usize / 64];
        let mask = 1u64 << (offset % 64);
        if on {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// True when storing `value` would need a second distinct data value.
    pub fn needs_widening(&self, value: V) -> bool {
        if value.is_nodata(self.nodata) || self.populated == 0 {
            return false;
        }
        self.value.is_some_and(|existing| existing != value)
    }

    pub fn to_array(&self) -> ArrayStore<V> {
        let values = (0..self.len).map(|offset| self.get(offset)).collect();
        ArrayStore::from_values(values, self.nodata)
    }
}

impl<V: CellValue> CellStore<V> for BitPackedStore<V> {
    fn len(&self) -> u32 {
        self.len
    }

    fn get(&self, offset: u32) -> V {
        match self.value {
            Some(value) if self.bit(offset) => value,
            _ => self.nodata,
        }
    }

    fn set(&mut self, offset: u32, value: V) -> V {
        let old = self.get(offset);
        let was_set = self.bit(offset);

        if value.is_nodata(self.nodata) {
            if was_set {
                self.set_bit(offset, false);
                self.populated -= 1;
            }
            return old;
        }

        debug_assert!(!self.needs_widening(value));
        self.value = Some(value);
        if !was_set {
            self.set_bit(offset, true);
            self.populated += 1;
        }
        old
    }

    fn heap_bytes_after(&self, _offset: u32, value: V) -> usize {
        if self.needs_widening(value) {
            ArrayStore::<V>::bytes_for(self.len)
        } else {
            self.heap_bytes()
        }
    }

    fn heap_bytes(&self) -> usize {
        Self::bytes_for(self.len)
    }

    fn nodata(&self) -> V {
        self.nodata
    }

    fn for_each_data(&self, f: &mut dyn FnMut(u32, V)) {
        let Some(value) = self.value else {
            return;
        };
        for (w, &word) in self.bits.iter().enumerate() {
            let mut remaining = word;
            while remaining != 0 {
                let bit = remaining.trailing_zeros();
                f(w as u32 * 64 + bit, value);
                remaining &= remaining - 1;
            }
        }
    }

    fn encoding(&self) -> ChunkEncoding {
        ChunkEncoding::BitPacked
    }

    fn entry_count(&self) -> u64 {
        self.populated as u64
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + V::WIDTH, 0);
        self.value.unwrap_or(self.nodata).write_le(&mut out[start..]);

        let mask_len = Self::mask_bytes(self.len);
        out.extend(
            self.bits
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .take(mask_len),
        );
    }

    fn payload_len(&self) -> usize {
        V::WIDTH + Self::mask_bytes(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_every_cell_allows_a_new_value() {
        let mut store = BitPackedStore::new(10, 0i32);
        store.set(1, 5);
        assert!(store.needs_widening(6));

        store.set(1, 0);
        assert!(!store.needs_widening(6));
        store.set(2, 6);
        assert_eq!(store.get(2), 6);
        assert_eq!(store.get(1), 0);
    }

    #[test]
    fn payload_round_trip_across_word_boundary() {
        let mut store = BitPackedStore::new(70, -1.0f64);
        for offset in [0, 63, 64, 69] {
            store.set(offset, 2.5);
        }

        let mut out = Vec::new();
        store.encode_payload(&mut out);
        assert_eq!(out.len(), store.payload_len());

        let decoded = BitPackedStore::<f64>::decode(&out, 70, -1.0).unwrap();
        assert_eq!(decoded.entry_count(), 4);
        let mut seen = Vec::new();
        decoded.for_each_data(&mut |offset, v| seen.push((offset, v)));
        assert_eq!(seen, vec![(0, 2.5), (63, 2.5), (64, 2.5), (69, 2.5)]);
    }

    #[test]
    fn to_array_preserves_cells() {
        let mut store = BitPackedStore::new(4, i32::MIN);
        store.set(3, 9);
        let array = store.to_array();
        assert_eq!(array.as_slice(), &[i32::MIN, i32::MIN, i32::MIN, 9]);
    }
}
