//! Optional operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::MAX_BUCKET_WIDTH;

/// Point-in-time copy of a trie's counters. All zero unless
/// [`Config::collect_stats`](crate::Config::collect_stats) is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub lookups: u64,
    /// Keys created by `insert` or `upsert`.
    pub inserts: u64,
    /// Payload swaps by `upsert` on an existing key.
    pub updates: u64,
    /// Descents restarted because a bucket changed under an optimistic read.
    pub read_retries: u64,
    /// Entries moved to their alternate bucket.
    pub displacements: u64,
    /// Placements that gave up with `CapacityExceeded`.
    pub placement_failures: u64,
    /// Parent-edge hits found in the child's primary bucket.
    pub parent_hits_primary: u64,
    /// Parent-edge hits found in the child's alternate bucket.
    pub parent_hits_secondary: u64,
    /// Per-slot histogram of primary-bucket parent-edge hits.
    pub primary_hit_slots: [u64; MAX_BUCKET_WIDTH],
    /// Per-slot histogram of alternate-bucket parent-edge hits.
    pub secondary_hit_slots: [u64; MAX_BUCKET_WIDTH],
}

impl Stats {
    pub fn parent_hits(&self) -> u64 {
        self.parent_hits_primary + self.parent_hits_secondary
    }

    /// Share of parent-edge hits served by the primary bucket, if any hit was recorded.
    pub fn primary_hit_ratio(&self) -> Option<f64> {
        let total = self.parent_hits();
        (total > 0).then(|| self.parent_hits_primary as f64 / total as f64)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    enabled: bool,
    lookups: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    read_retries: AtomicU64,
    displacements: AtomicU64,
    placement_failures: AtomicU64,
    parent_hits_primary: AtomicU64,
    parent_hits_secondary: AtomicU64,
    primary_hit_slots: [AtomicU64; MAX_BUCKET_WIDTH],
    secondary_hit_slots: [AtomicU64; MAX_BUCKET_WIDTH],
}

impl Counters {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64) {
        if self.enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn lookup(&self) {
        self.bump(&self.lookups);
    }

    #[inline]
    pub fn insert(&self) {
        self.bump(&self.inserts);
    }

    #[inline]
    pub fn update(&self) {
        self.bump(&self.updates);
    }

    #[inline]
    pub fn read_retry(&self) {
        self.bump(&self.read_retries);
    }

    #[inline]
    pub fn displacement(&self) {
        self.bump(&self.displacements);
    }

    #[inline]
    pub fn placement_failure(&self) {
        self.bump(&self.placement_failures);
    }

    #[inline]
    pub fn parent_hit(&self, secondary: bool, slot: usize) {
        if secondary {
            self.bump(&self.parent_hits_secondary);
            self.bump(&self.secondary_hit_slots[slot]);
        } else {
            self.bump(&self.parent_hits_primary);
            self.bump(&self.primary_hit_slots[slot]);
        }
    }

    pub fn snapshot(&self) -> Stats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Stats {
            lookups: load(&self.lookups),
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            read_retries: load(&self.read_retries),
            displacements: load(&self.displacements),
            placement_failures: load(&self.placement_failures),
            parent_hits_primary: load(&self.parent_hits_primary),
            parent_hits_secondary: load(&self.parent_hits_secondary),
            primary_hit_slots: std::array::from_fn(|i| load(&self.primary_hit_slots[i])),
            secondary_hit_slots: std::array::from_fn(|i| load(&self.secondary_hit_slots[i])),
        }
    }
}
