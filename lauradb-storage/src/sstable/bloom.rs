//! Bloom filter with double-hashing, and its on-disk framing.
//!
//! Wire format: `[bits_len:u32][numHashes:u32][bits...]`, one byte per bit
//! for simplicity of the marshal/unmarshal round trip the spec describes as
//! a "framed byte dump".

use lauradb_common::{Result, StorageError};

pub struct BloomFilter {
    bits: Vec<bool>,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let num_bits = Self::optimal_num_bits(expected_items, false_positive_rate);
        let num_hashes = Self::optimal_num_hashes(num_bits, expected_items);
        Self {
            bits: vec![false; num_bits.max(1)],
            num_hashes: num_hashes.max(1),
        }
    }

    fn optimal_num_bits(n: usize, p: f64) -> usize {
        if n == 0 {
            return 8;
        }
        let n = n as f64;
        (-(n * p.ln()) / (2f64.ln().powi(2))).ceil() as usize
    }

    fn optimal_num_hashes(num_bits: usize, n: usize) -> u32 {
        if n == 0 {
            return 1;
        }
        ((num_bits as f64 / n as f64) * 2f64.ln()).round().max(1.0) as u32
    }

    fn hash_pair(item: &[u8]) -> (u64, u64) {
        let h1 = xxhash_rust::xxh3::xxh3_64_with_seed(item, 0);
        let h2 = xxhash_rust::xxh3::xxh3_64_with_seed(item, 0x9E37_79B9_7F4A_7C15);
        (h1, h2)
    }

    /// Double-hashing: `hash_i(x) = h1(x) + i * h2(x)`, the independent
    /// `numHashes` hash functions derived from one base 64-bit hash.
    fn positions(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = Self::hash_pair(item);
        let len = self.bits.len() as u64;
        (0..self.num_hashes)
            .map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % len) as usize)
    }

    pub fn add(&mut self, item: &[u8]) {
        for pos in self.positions(item).collect::<Vec<_>>() {
            self.bits[pos] = true;
        }
    }

    /// No false negatives: every added item reports `contains == true`.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item).all(|pos| self.bits[pos])
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.bits.len());
        out.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend(self.bits.iter().map(|&b| u8::from(b)));
        out
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(StorageError::InvalidBloomFilter("truncated header".into()).into());
        }
        let bits_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let num_hashes = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let body = &buf[8..];
        if body.len() != bits_len {
            return Err(StorageError::InvalidBloomFilter(format!(
                "expected {bits_len} bits, got {}",
                body.len()
            ))
            .into());
        }
        Ok(Self {
            bits: body.iter().map(|&b| b != 0).collect(),
            num_hashes,
        })
    }
}
