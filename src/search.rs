//! Bucket search: "first slot whose header satisfies a masked equality".
//!
//! Scalar and SIMD implementations are observably identical. The vector
//! paths load the (padded) header array, broadcast the query mask and value,
//! compare lane-wise and extract the lowest matching lane:
//! AVX2 (4 lanes) → SSE4.1 (2 lanes) → scalar on x86_64, NEON (2 lanes) →
//! scalar on aarch64. The engine is chosen once per table by runtime feature
//! detection, so a binary never executes an unsupported instruction.

use std::fmt;

use tracing::warn;

use crate::config::SearchMode;
use crate::entry::{Header, HeaderQuery, MAX_BUCKET_WIDTH};

/// Instruction set used by a [`SearchEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Scalar,
    Sse41,
    Avx2,
    Neon,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Scalar => "scalar",
            EngineKind::Sse41 => "sse4.1",
            EngineKind::Avx2 => "avx2",
            EngineKind::Neon => "neon",
        })
    }
}

impl EngineKind {
    fn is_supported(self) -> bool {
        match self {
            EngineKind::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            EngineKind::Sse41 => std::is_x86_feature_detected!("sse4.1"),
            #[cfg(target_arch = "x86_64")]
            EngineKind::Avx2 => std::is_x86_feature_detected!("avx2"),
            #[cfg(target_arch = "aarch64")]
            EngineKind::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}

/// A bucket matcher bound to an instruction set the running CPU supports.
///
/// Only constructible through [`SearchEngine::new`], [`SearchEngine::scalar`],
/// [`SearchEngine::detect`] or [`SearchEngine::available`], all of which
/// verify CPU support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SearchEngine {
    kind: EngineKind,
}

impl SearchEngine {
    pub const fn scalar() -> Self {
        Self {
            kind: EngineKind::Scalar,
        }
    }

    /// Returns `None` if the CPU lacks `kind`.
    pub fn new(kind: EngineKind) -> Option<Self> {
        kind.is_supported().then_some(Self { kind })
    }

    /// Every engine usable on this CPU, scalar first.
    pub fn available() -> Vec<Self> {
        [
            EngineKind::Scalar,
            EngineKind::Sse41,
            EngineKind::Avx2,
            EngineKind::Neon,
        ]
        .into_iter()
        .filter_map(Self::new)
        .collect()
    }

    fn best() -> Self {
        [EngineKind::Avx2, EngineKind::Sse41, EngineKind::Neon]
            .into_iter()
            .find_map(Self::new)
            .unwrap_or_else(Self::scalar)
    }

    /// Resolves a configured [`SearchMode`].
    pub fn detect(mode: SearchMode) -> Self {
        match mode {
            SearchMode::Scalar => Self::scalar(),
            SearchMode::Auto => Self::best(),
            SearchMode::Simd => {
                let engine = Self::best();
                if engine.kind == EngineKind::Scalar {
                    warn!("SIMD bucket search requested but no vector unit detected; using scalar search");
                }
                engine
            }
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Index of the first of the `width` headers matching `query`, skipping
    /// unused slots when `live_only` is set. Entries past `width` are ignored.
    ///
    /// # Panics
    /// Panics if `width > MAX_BUCKET_WIDTH`.
    #[inline]
    pub fn find(
        &self,
        headers: &[u64; MAX_BUCKET_WIDTH],
        width: usize,
        query: HeaderQuery,
        live_only: bool,
    ) -> Option<usize> {
        assert!(width <= MAX_BUCKET_WIDTH, "bucket width {width} out of range");
        match self.kind {
            #[cfg(target_arch = "x86_64")]
            // SAFETY: constructors only hand out engines whose feature was detected.
            EngineKind::Avx2 => unsafe { find_avx2(headers, width, query, live_only) },
            #[cfg(target_arch = "x86_64")]
            // SAFETY: as above.
            EngineKind::Sse41 => unsafe { find_sse41(headers, width, query, live_only) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: as above.
            EngineKind::Neon => unsafe { find_neon(headers, width, query, live_only) },
            _ => find_scalar(&headers[..width], query, live_only),
        }
    }

    /// Slot holding the node `(tag, color)` with the given secondary flag.
    #[inline]
    pub fn search_by_identity(
        &self,
        headers: &[u64; MAX_BUCKET_WIDTH],
        width: usize,
        tag: u16,
        color: u8,
        secondary: bool,
    ) -> Option<usize> {
        self.find(headers, width, HeaderQuery::identity(tag, color, secondary), false)
    }

    /// Live slot holding the child with placement tag `tag` reached from a
    /// parent of color `parent_color` via `last_symbol`.
    #[inline]
    pub fn search_by_parent(
        &self,
        headers: &[u64; MAX_BUCKET_WIDTH],
        width: usize,
        tag: u16,
        parent_color: u8,
        last_symbol: u16,
        secondary: bool,
    ) -> Option<usize> {
        let query = HeaderQuery::parent_edge(tag, parent_color, last_symbol, secondary);
        self.find(headers, width, query, true)
    }
}

#[inline]
fn find_scalar(headers: &[u64], query: HeaderQuery, live_only: bool) -> Option<usize> {
    headers
        .iter()
        .position(|&h| query.matches(h) && (!live_only || h & Header::TYPE_MASK != 0))
}

/// Bitmask of the lanes `base..base + lanes` that fall inside `width`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline]
fn lane_mask(base: usize, lanes: usize, width: usize) -> u32 {
    let valid = (width - base).min(lanes);
    (1u32 << valid) - 1
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn find_avx2(
    headers: &[u64; MAX_BUCKET_WIDTH],
    width: usize,
    query: HeaderQuery,
    live_only: bool,
) -> Option<usize> {
    use std::arch::x86_64::*;

    let mut base = 0;
    // SAFETY: `base + 4 <= MAX_BUCKET_WIDTH` for every load; unaligned loads.
    unsafe {
        let mask = _mm256_set1_epi64x(query.mask as i64);
        let value = _mm256_set1_epi64x(query.value as i64);
        let type_mask = _mm256_set1_epi64x(Header::TYPE_MASK as i64);
        let zero = _mm256_setzero_si256();
        while base < width {
            let lanes = _mm256_loadu_si256(headers.as_ptr().add(base) as *const __m256i);
            let hit = _mm256_cmpeq_epi64(_mm256_and_si256(lanes, mask), value);
            let mut bits = _mm256_movemask_pd(_mm256_castsi256_pd(hit)) as u32;
            if live_only {
                let dead = _mm256_cmpeq_epi64(_mm256_and_si256(lanes, type_mask), zero);
                bits &= !(_mm256_movemask_pd(_mm256_castsi256_pd(dead)) as u32);
            }
            bits &= lane_mask(base, 4, width);
            if bits != 0 {
                return Some(base + bits.trailing_zeros() as usize);
            }
            base += 4;
        }
    }
    None
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
unsafe fn find_sse41(
    headers: &[u64; MAX_BUCKET_WIDTH],
    width: usize,
    query: HeaderQuery,
    live_only: bool,
) -> Option<usize> {
    use std::arch::x86_64::*;

    let mut base = 0;
    // SAFETY: `base + 2 <= MAX_BUCKET_WIDTH` for every load; unaligned loads.
    unsafe {
        let mask = _mm_set1_epi64x(query.mask as i64);
        let value = _mm_set1_epi64x(query.value as i64);
        let type_mask = _mm_set1_epi64x(Header::TYPE_MASK as i64);
        let zero = _mm_setzero_si128();
        while base < width {
            let lanes = _mm_loadu_si128(headers.as_ptr().add(base) as *const __m128i);
            let hit = _mm_cmpeq_epi64(_mm_and_si128(lanes, mask), value);
            let mut bits = _mm_movemask_pd(_mm_castsi128_pd(hit)) as u32;
            if live_only {
                let dead = _mm_cmpeq_epi64(_mm_and_si128(lanes, type_mask), zero);
                bits &= !(_mm_movemask_pd(_mm_castsi128_pd(dead)) as u32);
            }
            bits &= lane_mask(base, 2, width);
            if bits != 0 {
                return Some(base + bits.trailing_zeros() as usize);
            }
            base += 2;
        }
    }
    None
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn find_neon(
    headers: &[u64; MAX_BUCKET_WIDTH],
    width: usize,
    query: HeaderQuery,
    live_only: bool,
) -> Option<usize> {
    use std::arch::aarch64::*;

    let mut base = 0;
    // SAFETY: `base + 2 <= MAX_BUCKET_WIDTH` for every load.
    unsafe {
        let mask = vdupq_n_u64(query.mask);
        let value = vdupq_n_u64(query.value);
        let type_mask = vdupq_n_u64(Header::TYPE_MASK);
        while base < width {
            let lanes = vld1q_u64(headers.as_ptr().add(base));
            let mut hit = vceqq_u64(vandq_u64(lanes, mask), value);
            if live_only {
                hit = vandq_u64(hit, vtstq_u64(lanes, type_mask));
            }
            let mut bits = (vgetq_lane_u64::<0>(hit) & 1) as u32 | ((vgetq_lane_u64::<1>(hit) & 1) as u32) << 1;
            bits &= lane_mask(base, 2, width);
            if bits != 0 {
                return Some(base + bits.trailing_zeros() as usize);
            }
            base += 2;
        }
    }
    None
}
