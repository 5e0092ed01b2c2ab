//! Node locators and the placement hash family.
//!
//! A node is identified by its locator `(primary bucket, tag, color)`. The
//! child reached from a parent via a symbol gets its `(primary, tag)` from a
//! permutation of the parent's `(primary, tag)` keyed by the parent's color
//! and the symbol. Because the mapping is a bijection for every key, a stored
//! child header (tag, parent color, last symbol) found in a given bucket
//! names exactly one parent, so edges need no stored pointers.

use crate::config::Geometry;
use crate::entry::ROOT_COLOR;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Locator {
    pub primary: usize,
    pub tag: u16,
    pub color: u8,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct HashFamily {
    bucket_bits: u32,
    tag_bits: u32,
    seed: u64,
}

/// SplitMix64 finalizer.
#[inline]
pub(crate) fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

impl HashFamily {
    pub fn new(geometry: &Geometry, seed: u64) -> Self {
        debug_assert!(geometry.bucket_bits >= 1);
        Self {
            bucket_bits: geometry.bucket_bits,
            tag_bits: geometry.tag_bits,
            seed,
        }
    }

    #[inline]
    fn space_bits(&self) -> u32 {
        self.bucket_bits + self.tag_bits
    }

    #[inline]
    fn space_mask(&self) -> u64 {
        (1u64 << self.space_bits()) - 1
    }

    #[inline]
    fn bucket_mask(&self) -> u64 {
        (1u64 << self.bucket_bits) - 1
    }

    #[inline]
    fn tag_mask(&self) -> u64 {
        (1u64 << self.tag_bits) - 1
    }

    #[inline]
    fn split(&self, x: u64) -> (usize, u16) {
        ((x >> self.tag_bits) as usize, (x & self.tag_mask()) as u16)
    }

    /// Locator of the virtual root.
    pub fn root(&self) -> Locator {
        let (primary, tag) = self.split(mix64(self.seed) & self.space_mask());
        Locator {
            primary,
            tag,
            color: ROOT_COLOR,
        }
    }

    /// The other candidate bucket of a node with `tag` currently in `bucket`.
    ///
    /// `alternate(alternate(b, t), t) == b` and `alternate(b, t) != b`.
    #[inline]
    pub fn alternate(&self, bucket: usize, tag: u16) -> usize {
        let offset = (mix64(u64::from(tag) ^ self.seed.rotate_left(29)) & self.bucket_mask()).max(1);
        bucket ^ offset as usize
    }

    /// `(primary, tag)` of the child reached from `parent` via `symbol`.
    #[inline]
    pub fn child(&self, parent: Locator, symbol: u16) -> (usize, u16) {
        let n = self.space_bits();
        let mask = self.space_mask();
        let key = mix64(self.seed ^ (u64::from(parent.color) << 16) ^ u64::from(symbol));

        // Each step is a permutation of the n-bit space.
        let mut x = ((parent.primary as u64) << self.tag_bits) | u64::from(parent.tag);
        x ^= key & mask;
        x = x.wrapping_mul(0x9E37_79B9_7F4A_7C15) & mask;
        x ^= x >> (n / 2 + 1);
        x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9) & mask;
        x ^= (key >> 32) & mask;
        self.split(x)
    }

    #[inline]
    pub fn candidates(&self, primary: usize, tag: u16) -> [usize; 2] {
        [primary, self.alternate(primary, tag)]
    }
}
