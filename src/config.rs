//! Creation-time configuration.

use crate::entry::{MAX_BUCKET_WIDTH, MAX_COLOR_BITS, MAX_TAG_BITS};
use crate::error::{Error, Result};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_BUCKET_WIDTH: usize = 4;
pub const DEFAULT_TAG_BITS: u32 = 8;
pub const DEFAULT_COLOR_BITS: u32 = 4;
pub const DEFAULT_MAX_DISPLACEMENT_DEPTH: usize = 16;
pub const DEFAULT_MAX_KEY_LEN: usize = 4096;

/// Upper bound accepted for `max_displacement_depth`.
pub const MAX_DISPLACEMENT_DEPTH: usize = 64;

const MAX_BUCKET_BITS: u32 = 40;
const DEFAULT_SEED: u64 = 0x243F_6A88_85A3_08D3;

/// Which bucket search implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Best vector unit detected at runtime, scalar otherwise.
    #[default]
    Auto,
    /// Always the scalar loop.
    Scalar,
    /// Request a vector unit; falls back to scalar (with a warning) if none exists.
    Simd,
}

/// Configuration for a [`CuckooTrie`](crate::CuckooTrie).
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of node slots requested. Rounded up to a power-of-two number of
    /// buckets.
    pub capacity: usize,
    /// Slots per bucket (`1..=8`).
    pub bucket_width: usize,
    /// Width of the tag fingerprint (`1..=16`).
    pub tag_bits: u32,
    /// Width of node colors (`1..=7`).
    pub color_bits: u32,
    /// Longest displacement path attempted before giving up (`1..=64`).
    pub max_displacement_depth: usize,
    /// Longest accepted key in bytes.
    pub max_key_len: usize,
    pub search: SearchMode,
    /// Seed for the placement hash family.
    pub seed: u64,
    /// Maintain operation counters (see [`Stats`](crate::Stats)).
    pub collect_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            bucket_width: DEFAULT_BUCKET_WIDTH,
            tag_bits: DEFAULT_TAG_BITS,
            color_bits: DEFAULT_COLOR_BITS,
            max_displacement_depth: DEFAULT_MAX_DISPLACEMENT_DEPTH,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            search: SearchMode::Auto,
            seed: DEFAULT_SEED,
            collect_stats: false,
        }
    }
}

impl Config {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Checks every field and derives the table geometry.
    pub(crate) fn validate(&self) -> Result<Geometry> {
        if self.capacity == 0 {
            return Err(Error::invalid("capacity must be at least 1"));
        }
        if !(1..=MAX_BUCKET_WIDTH).contains(&self.bucket_width) {
            return Err(Error::invalid(format!(
                "bucket_width must be in 1..={MAX_BUCKET_WIDTH}, got {}",
                self.bucket_width
            )));
        }
        if !(1..=MAX_TAG_BITS).contains(&self.tag_bits) {
            return Err(Error::invalid(format!(
                "tag_bits must be in 1..={MAX_TAG_BITS}, got {}",
                self.tag_bits
            )));
        }
        if !(1..=MAX_COLOR_BITS).contains(&self.color_bits) {
            return Err(Error::invalid(format!(
                "color_bits must be in 1..={MAX_COLOR_BITS}, got {}",
                self.color_bits
            )));
        }
        if !(1..=MAX_DISPLACEMENT_DEPTH).contains(&self.max_displacement_depth) {
            return Err(Error::invalid(format!(
                "max_displacement_depth must be in 1..={MAX_DISPLACEMENT_DEPTH}, got {}",
                self.max_displacement_depth
            )));
        }
        if self.max_key_len == 0 {
            return Err(Error::invalid("max_key_len must be at least 1"));
        }

        let num_buckets = self
            .capacity
            .div_ceil(self.bucket_width)
            .max(2)
            .checked_next_power_of_two()
            .ok_or_else(|| Error::invalid("capacity too large"))?;
        let bucket_bits = num_buckets.trailing_zeros();
        if bucket_bits > MAX_BUCKET_BITS {
            return Err(Error::invalid(format!(
                "capacity {} needs 2^{bucket_bits} buckets, limit is 2^{MAX_BUCKET_BITS}",
                self.capacity
            )));
        }

        Ok(Geometry {
            num_buckets,
            bucket_bits,
            width: self.bucket_width,
            tag_bits: self.tag_bits,
            max_colors: 1u16 << self.color_bits,
            max_displacement_depth: self.max_displacement_depth,
        })
    }
}

/// Validated table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub num_buckets: usize,
    pub bucket_bits: u32,
    pub width: usize,
    pub tag_bits: u32,
    /// Number of assignable colors (`2^color_bits`).
    pub max_colors: u16,
    pub max_displacement_depth: usize,
}

impl Geometry {
    #[inline]
    pub fn slots(&self) -> usize {
        self.num_buckets * self.width
    }
}
