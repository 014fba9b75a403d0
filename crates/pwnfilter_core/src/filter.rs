//! Bloom filter backing each shard.
//!
//! Serialized form (big-endian):
//!   m[8]       = bit count
//!   k[8]       = hash projections
//!   len[8]     = bit length, always equal to m
//!   words[8*w] = w = ceil(m / 64) words, bit i in word i/64 at position i%64
//!
//! Projections follow the Go `bits-and-blooms/bloom` scheme, so a filter written
//! here answers the same way when loaded by that library.

use crate::consts::FILTER_HDR_SIZE;
use crate::errors::{PwnError, Result};
use crate::hash::{base_hashes, location};
use crate::utils::{read_u64, write_u64};
use std::f64::consts::LN_2;
use std::io::{Read, Write};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bloom {
    m: u64,
    k: u64,
    words: Vec<u64>,
}

impl Bloom {
    /// Filter with `m` bits and `k` projections; zero values are raised to 1.
    pub fn new(m: u64, k: u64) -> Self {
        let m = m.max(1);
        Self { m, k: k.max(1), words: vec![0u64; words_for(m)] }
    }

    /// Filter sized for `n` items at false-positive rate `p`.
    pub fn with_estimates(n: u64, p: f64) -> Self {
        let (m, k) = estimate_parameters(n, p);
        Self::new(m, k)
    }

    pub fn bits(&self) -> u64 { self.m }
    pub fn hashes(&self) -> u64 { self.k }
    pub fn words(&self) -> &[u64] { &self.words }

    pub fn add(&mut self, key: &[u8]) {
        let h = base_hashes(key);
        for i in 0..self.k {
            let bit = location(&h, i) % self.m;
            self.words[(bit >> 6) as usize] |= 1u64 << (bit & 63);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let h = base_hashes(key);
        (0..self.k).all(|i| {
            let bit = location(&h, i) % self.m;
            self.words[(bit >> 6) as usize] & (1u64 << (bit & 63)) != 0
        })
    }

    pub fn bits_set(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.bits_set() as f64 / self.m as f64
    }

    /// Swamidass–Baldi estimate of how many distinct keys were added.
    pub fn approximate_len(&self) -> u64 {
        let m = self.m as f64;
        let x = self.bits_set() as f64;
        if x >= m {
            return u64::MAX;
        }
        (-(m / self.k as f64) * (1.0 - x / m).ln()).round() as u64
    }

    /// False-positive rate expected after `n` insertions: `(1 - e^(-kn/m))^k`.
    pub fn expected_fpp(&self, n: u64) -> f64 {
        let k = self.k as f64;
        (1.0 - (-k * n as f64 / self.m as f64).exp()).powf(k)
    }

    pub fn serialized_len(&self) -> u64 {
        FILTER_HDR_SIZE as u64 + 8 * self.words.len() as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<u64> {
        write_u64(w, self.m)?;
        write_u64(w, self.k)?;
        write_u64(w, self.m)?;
        let mut buf = Vec::with_capacity(8 * self.words.len().min(8192));
        for chunk in self.words.chunks(8192) {
            buf.clear();
            for word in chunk {
                buf.extend_from_slice(&word.to_be_bytes());
            }
            w.write_all(&buf)?;
        }
        Ok(self.serialized_len())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len() as usize);
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let m = read_u64(r)?;
        let k = read_u64(r)?;
        let len = read_u64(r)?;
        if m == 0 || k == 0 {
            return Err(PwnError::Corrupt(format!("filter header m={m} k={k}")));
        }
        if len != m {
            return Err(PwnError::Corrupt(format!("bit length {len} does not match m={m}")));
        }
        // Grow with the data actually present; the header alone is not trusted.
        let want = m.div_ceil(64) * 8;
        let mut raw = Vec::new();
        r.by_ref().take(want).read_to_end(&mut raw)?;
        if (raw.len() as u64) < want {
            return Err(PwnError::Corrupt(format!(
                "filter with m={m} needs {want} payload bytes, found {}",
                raw.len()
            )));
        }
        let words = raw
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                u64::from_be_bytes(b)
            })
            .collect();
        Ok(Self { m, k, words })
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= FILTER_HDR_SIZE {
            let mut m = [0u8; 8];
            m.copy_from_slice(&bytes[..8]);
            let m = u64::from_be_bytes(m);
            let body = (bytes.len() - FILTER_HDR_SIZE) as u64;
            if m.div_ceil(64) * 8 > body {
                return Err(PwnError::Corrupt(format!("filter with m={m} exceeds its {body}-byte payload")));
            }
        }
        let bloom = Self::read_from(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(PwnError::Corrupt(format!("{} trailing bytes after filter", bytes.len())));
        }
        Ok(bloom)
    }
}

/// Shards tested together. Keys are routed by insertion order, so a lookup has
/// to consult every shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardSet {
    shards: Vec<Bloom>,
}

impl ShardSet {
    pub fn new(shards: Vec<Bloom>) -> Self { Self { shards } }

    pub fn len(&self) -> usize { self.shards.len() }
    pub fn is_empty(&self) -> bool { self.shards.is_empty() }
    pub fn shards(&self) -> &[Bloom] { &self.shards }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.shards.iter().any(|s| s.contains(key))
    }
}

/// Optimal `(m, k)` for `n` items at rate `p`:
/// `m = ceil(-n ln p / ln²2)`, `k = ceil(ln 2 · m / n)`.
pub fn estimate_parameters(n: u64, p: f64) -> (u64, u64) {
    let n = n.max(1) as f64;
    let m = (-n * p.ln() / (LN_2 * LN_2)).ceil().max(1.0);
    let k = (LN_2 * m / n).ceil().max(1.0);
    (m as u64, k as u64)
}

fn words_for(m: u64) -> usize { m.div_ceil(64) as usize }
