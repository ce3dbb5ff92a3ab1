//! Hash functions for rule indexing
//!
//! Domains are keyed by a 64-bit composite of two Murmur3 passes with
//! different seeds; URL tokens use a single 32-bit pass. Both are computed
//! on lowercased ASCII so host lookups are case-insensitive.

/// 64-bit hash represented as two 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash64 {
    pub lo: u32,
    pub hi: u32,
}

impl Hash64 {
    #[inline]
    pub const fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    /// Pack into a single `u64` map key.
    #[inline]
    pub const fn to_u64(self) -> u64 {
        ((self.hi as u64) << 32) | (self.lo as u64)
    }
}

const SEED_LO: u32 = 0x9e3779b9;
const SEED_HI: u32 = 0x85ebca6b;
const SEED_TOKEN: u32 = 0x811c9dc5;

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(0xcc9e2d51)
        .rotate_left(15)
        .wrapping_mul(0x1b873593)
}

/// Murmur3 32-bit over an iterator of bytes, so callers can fold a
/// lowercase transform into the pass without allocating.
fn murmur3_iter<I>(bytes: I, len: usize, seed: u32) -> u32
where
    I: Iterator<Item = u8>,
{
    let mut h = seed;
    let mut block = [0u8; 4];
    let mut filled = 0;

    for b in bytes {
        block[filled] = b;
        filled += 1;
        if filled == 4 {
            h ^= mix_k(u32::from_le_bytes(block));
            h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
            filled = 0;
        }
    }

    if filled > 0 {
        let mut k = 0u32;
        for (i, &b) in block[..filled].iter().enumerate() {
            k ^= (b as u32) << (8 * i);
        }
        h ^= mix_k(k);
    }

    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

/// Murmur3 32-bit hash of raw bytes.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    murmur3_iter(data.iter().copied(), data.len(), seed)
}

/// Hash a hostname (ASCII case-folded) for the host-anchor index and
/// `$domain=` constraint sets.
#[inline]
pub fn hash_domain(domain: &str) -> Hash64 {
    let bytes = domain.as_bytes();
    let lower = || bytes.iter().map(|b| b.to_ascii_lowercase());
    Hash64 {
        lo: murmur3_iter(lower(), bytes.len(), SEED_LO),
        hi: murmur3_iter(lower(), bytes.len(), SEED_HI),
    }
}

/// Hash an alphanumeric URL token (ASCII case-folded).
#[inline]
pub fn hash_token(token: &[u8]) -> u32 {
    murmur3_iter(
        token.iter().map(|b| b.to_ascii_lowercase()),
        token.len(),
        SEED_TOKEN,
    )
}
