//! # Universal Hash Family
//!
//! A refreshable universal hash producing 64-bit digests from trivially
//! copyable keys, in the multiply-mod-prime style of CLRS.
//!
//! A [`UniversalHash`] carries four independent 16-bit parameter sets. The
//! key's object bytes (via `zerocopy::IntoBytes`, so there is never padding
//! noise in the input) are consumed as 32-bit words; each word is hashed
//! into one of four 16-bit lanes of the digest. Short keys cycle their words
//! across the lanes, long keys cycle the lanes across their words, so every
//! key width fills the whole digest.
//!
//! Parameters are drawn from a caller-provided RNG. The index structures
//! seed that RNG with [`DEFAULT_HASH_SEED`] unless told otherwise, keeping
//! runs reproducible.

use std::marker::PhantomData;

use rand::rngs::SmallRng;
use rand::Rng;
use zerocopy::{Immutable, IntoBytes};

/// Seed the index structures use for their hash families unless a caller
/// supplies one.
pub const DEFAULT_HASH_SEED: u64 = 0x5EED_1DEA_0DD5_EED5;

/// A prime just above 2^32, from the UTM small-primes list.
const BIG_PRIME: u64 = 5_915_587_277;

const NUM_LANES: usize = 4;

/// One 16-bit universal hash: mask, multiplier and adder over a large prime.
#[derive(Debug, Clone, Copy)]
pub struct UniHash16 {
    mask: u32,
    multiplier: u32,
    adder: u32,
}

impl UniHash16 {
    fn from_rng(rng: &mut SmallRng) -> Self {
        Self {
            mask: rng.gen(),
            multiplier: rng.gen(),
            adder: rng.gen(),
        }
    }

    /// Draws fresh parameters.
    pub fn refresh(&mut self, rng: &mut SmallRng) {
        *self = Self::from_rng(rng);
    }

    /// Hashes one 32-bit word down to 16 bits.
    pub fn hash16(&self, word: u32) -> u16 {
        // (word ^ mask) * multiplier stays below 2^64, so a single
        // mod-prime after the multiply is exact.
        let mut h = (word ^ self.mask) as u64;
        h = (h * self.multiplier as u64) % BIG_PRIME;
        h = (h + self.adder as u64) % BIG_PRIME;
        h as u16
    }
}

/// A universal hash over keys of type `K`.
#[derive(Debug, Clone, Copy)]
pub struct UniversalHash<K> {
    lanes: [UniHash16; NUM_LANES],
    _key: PhantomData<fn(K)>,
}

impl<K: IntoBytes + Immutable> UniversalHash<K> {
    pub fn new(rng: &mut SmallRng) -> Self {
        Self {
            lanes: std::array::from_fn(|_| UniHash16::from_rng(rng)),
            _key: PhantomData,
        }
    }

    /// Re-draws every lane's parameters.
    pub fn refresh(&mut self, rng: &mut SmallRng) {
        for lane in &mut self.lanes {
            lane.refresh(rng);
        }
    }

    /// 64-bit digest of `key`'s object bytes.
    pub fn digest(&self, key: &K) -> u64 {
        let bytes = key.as_bytes();
        let word_count = bytes.len().div_ceil(4).max(1);

        let mut acc = [0u16; NUM_LANES];
        if word_count >= NUM_LANES {
            for i in 0..word_count {
                acc[i % NUM_LANES] ^= self.lanes[i % NUM_LANES].hash16(word_at(bytes, i));
            }
        } else {
            for (i, lane) in self.lanes.iter().enumerate() {
                acc[i] ^= lane.hash16(word_at(bytes, i % word_count));
            }
        }

        (acc[0] as u64)
            | (acc[1] as u64) << 16
            | (acc[2] as u64) << 32
            | (acc[3] as u64) << 48
    }
}

/// The `i`-th 32-bit word of `bytes`, zero-padded past the end.
fn word_at(bytes: &[u8], i: usize) -> u32 {
    let mut word = [0u8; 4];
    let start = i * 4;
    if start < bytes.len() {
        let take = (bytes.len() - start).min(4);
        word[..take].copy_from_slice(&bytes[start..start + take]);
    }
    u32::from_le_bytes(word)
}
