//! 128-bit MurmurHash3 (x64 variant) and the four base hashes the filter derives
//! its projections from.

const C1: u64 = 0x87c37b91114253d5;
const C2: u64 = 0x4cf5ad432745937f;

/// Streaming MurmurHash3 x64/128 state.
#[derive(Debug, Clone)]
pub struct Murmur128 {
    h1: u64,
    h2: u64,
    total: u64,
    buf: [u8; 16],
    buf_len: usize,
}

impl Murmur128 {
    pub fn with_seed(seed: u64) -> Self {
        Murmur128 { h1: seed, h2: seed, total: 0, buf: [0; 16], buf_len: 0 }
    }

    pub fn write(&mut self, mut bytes: &[u8]) {
        if self.buf_len + bytes.len() < 16 {
            self.buf[self.buf_len..self.buf_len + bytes.len()].copy_from_slice(bytes);
            self.buf_len += bytes.len();
            return;
        }

        if self.buf_len != 0 {
            let wanted = 16 - self.buf_len;
            self.buf[self.buf_len..].copy_from_slice(&bytes[..wanted]);
            let (k1, k2) = split_block(&self.buf);
            self.mix_block(k1, k2);
            bytes = &bytes[wanted..];
            self.buf_len = 0;
        }

        let mut chunks = bytes.chunks_exact(16);
        for block in &mut chunks {
            let (k1, k2) = split_block(block);
            self.mix_block(k1, k2);
        }
        let rest = chunks.remainder();
        self.buf[..rest.len()].copy_from_slice(rest);
        self.buf_len = rest.len();
    }

    pub fn finish128(&self) -> (u64, u64) {
        let mut h1 = self.h1;
        let mut h2 = self.h2;
        let rem = self.buf_len;

        if rem > 8 {
            let mut k2 = read_partial(&self.buf[8..rem]);
            k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
            h2 ^= k2;
        }
        if rem > 0 {
            let mut k1 = read_partial(&self.buf[..rem.min(8)]);
            k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
            h1 ^= k1;
        }

        let total = self.total + rem as u64;
        h1 ^= total;
        h2 ^= total;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix64(h1);
        h2 = fmix64(h2);
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        (h1, h2)
    }

    #[inline]
    fn mix_block(&mut self, k1: u64, k2: u64) {
        self.h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        self.h1 = self.h1.rotate_left(27).wrapping_add(self.h2);
        self.h1 = self.h1.wrapping_mul(5).wrapping_add(0x52dce729);

        self.h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        self.h2 = self.h2.rotate_left(31).wrapping_add(self.h1);
        self.h2 = self.h2.wrapping_mul(5).wrapping_add(0x38495ab5);

        self.total += 16;
    }
}

pub fn murmur3_x64_128(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h = Murmur128::with_seed(seed);
    h.write(data);
    h.finish128()
}

/// Hashes of `key` and of `key ++ [0x01]`, both with seed 0.
pub fn base_hashes(key: &[u8]) -> [u64; 4] {
    let mut h = Murmur128::with_seed(0);
    h.write(key);
    let (a, b) = h.finish128();
    h.write(&[1]);
    let (c, d) = h.finish128();
    [a, b, c, d]
}

/// Projection `i` before reduction modulo the bit count.
#[inline]
pub fn location(h: &[u64; 4], i: u64) -> u64 {
    let idx = 2 + (((i + (i % 2)) % 4) / 2) as usize;
    h[(i % 2) as usize].wrapping_add(i.wrapping_mul(h[idx]))
}

#[inline]
fn split_block(block: &[u8]) -> (u64, u64) {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&block[0..8]);
    hi.copy_from_slice(&block[8..16]);
    (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
}

#[inline]
fn read_partial(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^ (k >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over the lazy dog", 0);
        assert_eq!((h1, h2), (0xe34bbc7bbc071b6c, 0x7a433ca9c49a9347));

        let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over the lazy dogdogdog", 0);
        assert_eq!((h1, h2), (0x9c8205300e612fc4, 0xcbc0af6136aa3df9));

        let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over the lazy1", 0);
        assert_eq!((h1, h2), (0xe3301a827e5cdfe3, 0xbdbf05f8da0f0392));

        // exact multiple of the block size
        let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over t", 0);
        assert_eq!((h1, h2), (0xdf6af91bb29bdacf, 0x91a341c58df1f3a6));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8:3861493";
        let mut h = Murmur128::with_seed(0);
        for chunk in data.chunks(7) {
            h.write(chunk);
        }
        assert_eq!(h.finish128(), murmur3_x64_128(data, 0));
    }

    #[test]
    fn second_pair_hashes_key_with_appended_one() {
        for len in [0usize, 1, 14, 15, 16, 17, 40] {
            let key = vec![b'A'; len];
            let mut ext = key.clone();
            ext.push(1);
            let h = base_hashes(&key);
            assert_eq!((h[0], h[1]), murmur3_x64_128(&key, 0));
            assert_eq!((h[2], h[3]), murmur3_x64_128(&ext, 0), "len {len}");
        }
    }

    #[test]
    fn location_cycles_through_second_pair() {
        let h = [10, 20, 1, 1000];
        assert_eq!(location(&h, 0), 10);
        // i=1: h[1] + 1*h[3]
        assert_eq!(location(&h, 1), 20 + 1000);
        // i=2: h[0] + 2*h[3]
        assert_eq!(location(&h, 2), 10 + 2000);
        // i=3: h[1] + 3*h[2]
        assert_eq!(location(&h, 3), 20 + 3);
        // i=4: h[0] + 4*h[2]
        assert_eq!(location(&h, 4), 10 + 4);
    }
}
