//! # cuckoo-trie
//!
//! A concurrent in-memory key-value index: a byte-wise trie whose nodes live
//! in a cuckoo hash table of fixed-width buckets.
//!
//! Nodes carry no child pointers. A child's two candidate buckets are a hash
//! of its parent's identity and the edge symbol, and each bucket stores
//! packed `u64` headers that a single masked comparison (scalar or SIMD)
//! matches against either a node identity or a parent edge. Every bucket is
//! guarded by a sequence lock: readers never write shared memory, writers
//! lock at most two buckets at a time.
//!
//! ## Example
//!
//! ```rust
//! use cuckoo_trie::CuckooTrie;
//!
//! let trie = CuckooTrie::new(1024)?;
//! trie.insert(b"hello", b"world")?;
//! assert_eq!(trie.lookup(b"hello")?, Some(b"world".to_vec()));
//!
//! // `upsert` reports whether the key was new.
//! assert!(!trie.upsert(b"hello", b"there")?);
//! assert!(trie.upsert(b"help", b"!")?);
//! assert_eq!(trie.len(), 2);
//! # Ok::<(), cuckoo_trie::Error>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod config;
mod entry;
mod error;
mod locator;
mod placement;
mod record;
mod resolve;
mod search;
mod seqlock;
mod stats;
mod table;

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch as epoch;
use tracing::{debug, trace};

pub use config::{Config, SearchMode};
pub use entry::{EntryType, Header, HeaderQuery, END_SYMBOL, MAX_BUCKET_WIDTH};
pub use error::{Error, Result};
pub use search::{EngineKind, SearchEngine};
pub use stats::Stats;

use entry::symbol_at;
use locator::{HashFamily, Locator};
use placement::Placement;
use record::PendingRecord;
use resolve::{Descent, Found};
use seqlock::backoff;
use stats::Counters;
use table::Table;

// =============================================================================
// Key helpers
// =============================================================================

/// First index `>= from` at which the symbol sequences of two distinct keys
/// differ.
fn first_difference(a: &[u8], b: &[u8], from: usize) -> usize {
    debug_assert_ne!(a, b);
    let end = a.len().max(b.len());
    let mut i = from;
    while i < end && symbol_at(a, i) == symbol_at(b, i) {
        i += 1;
    }
    i
}

// =============================================================================
// CuckooTrie
// =============================================================================

/// A concurrent byte-keyed map stored as a trie in a cuckoo hash table.
///
/// All operations take `&self`; share it across threads with `Arc` or scoped
/// threads. Capacity is fixed at creation.
pub struct CuckooTrie {
    table: Table,
    len: AtomicUsize,
    max_key_len: usize,
}

impl CuckooTrie {
    /// Creates a trie with room for about `capacity` nodes and default settings.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(Config::with_capacity(capacity))
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let geometry = config.validate()?;
        let engine = SearchEngine::detect(config.search);
        debug!(
            num_buckets = geometry.num_buckets,
            bucket_width = geometry.width,
            tag_bits = config.tag_bits,
            color_bits = config.color_bits,
            engine = %engine.kind(),
            "created cuckoo trie"
        );
        Ok(Self {
            table: Table::new(
                geometry,
                HashFamily::new(&geometry, config.seed),
                engine,
                Counters::new(config.collect_stats),
            ),
            len: AtomicUsize::new(0),
            max_key_len: config.max_key_len,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total node slots. Every key needs one leaf plus any internal nodes its
    /// prefix shares with other keys.
    pub fn capacity(&self) -> usize {
        self.table.geometry().slots()
    }

    pub fn num_buckets(&self) -> usize {
        self.table.geometry().num_buckets
    }

    pub fn bucket_width(&self) -> usize {
        self.table.width()
    }

    /// Bytes held by the bucket arrays (records not included).
    pub fn memory_usage(&self) -> usize {
        self.table.memory_usage() + std::mem::size_of::<Self>() - std::mem::size_of::<Table>()
    }

    pub fn stats(&self) -> Stats {
        self.table.stats.snapshot()
    }

    /// Instruction set used for bucket search.
    pub fn search_engine(&self) -> EngineKind {
        self.table.engine.kind()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.max_key_len {
            return Err(Error::invalid(format!(
                "key of {} bytes exceeds max_key_len {}",
                key.len(),
                self.max_key_len
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Reads
// =============================================================================

impl CuckooTrie {
    /// Returns a copy of the value stored for `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.lookup_with(key, <[u8]>::to_vec)
    }

    /// Runs `f` on the value stored for `key` without copying it.
    pub fn lookup_with<R>(&self, key: &[u8], f: impl FnOnce(&[u8]) -> R) -> Result<Option<R>> {
        self.check_key(key)?;
        self.table.stats.lookup();
        let guard = epoch::pin();
        match self.table.descend(key) {
            Descent::Leaf { leaf, .. } => {
                // SAFETY: the payload comes from a validated leaf snapshot taken
                // after `guard` was pinned.
                let record = unsafe { record::deref(leaf.payload, &guard) };
                Ok((record.key() == key).then(|| f(record.value())))
            }
            Descent::Vacant { .. } => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup_with(key, |_| ())?.is_some())
    }
}

// =============================================================================
// Writes
// =============================================================================

impl CuckooTrie {
    /// Adds `key`. Fails with [`Error::KeyExists`] if it is already present.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.store(key, value, false).map(|_| ())
    }

    /// Adds or replaces `key`. Returns `true` if the key was new.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.store(key, value, true)
    }

    fn store(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<bool> {
        self.check_key(key)?;
        let guard = epoch::pin();
        let mut pending: Option<PendingRecord> = None;
        let mut spins = 0;

        loop {
            match self.table.descend(key) {
                Descent::Vacant { parent, depth } => {
                    let payload = pending
                        .get_or_insert_with(|| PendingRecord::new(key, value))
                        .payload();
                    let symbol = symbol_at(key, depth);
                    if let Placement::Placed(_) =
                        self.table.place_child(parent, symbol, EntryType::Leaf, payload)?
                    {
                        self.publish(pending);
                        return Ok(true);
                    }
                }
                Descent::Leaf { leaf, depth } if leaf.header.entry_type() == EntryType::Leaf => {
                    // SAFETY: validated leaf snapshot, read after `guard` was pinned.
                    let existing = unsafe { record::deref(leaf.payload, &guard) };
                    if existing.key() == key {
                        if !overwrite {
                            return Err(Error::KeyExists);
                        }
                        if existing.value() == value {
                            return Ok(false);
                        }
                        let payload = pending
                            .get_or_insert_with(|| PendingRecord::new(key, value))
                            .payload();
                        if self.replace_record(&leaf, payload) {
                            if let Some(record) = pending.take() {
                                record.publish();
                            }
                            // SAFETY: the old record was unlinked under the bucket lock.
                            unsafe { record::retire(leaf.payload, &guard) };
                            self.table.stats.update();
                            return Ok(false);
                        }
                    } else {
                        let payload = pending
                            .get_or_insert_with(|| PendingRecord::new(key, value))
                            .payload();
                        if self.split(&leaf, depth, existing.key(), key, payload)? {
                            self.publish(pending);
                            return Ok(true);
                        }
                    }
                }
                // A split is in progress below this leaf.
                Descent::Leaf { .. } => {}
            }
            backoff(&mut spins);
        }
    }

    fn publish(&self, pending: Option<PendingRecord>) {
        if let Some(record) = pending {
            record.publish();
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        self.table.stats.insert();
    }

    /// Swaps the record of `leaf` if it is still the leaf the snapshot saw.
    fn replace_record(&self, leaf: &Found, payload: u64) -> bool {
        self.table
            .with_node(leaf.locator, |w, slot| {
                let current = w.header(slot);
                if current.entry_type() == EntryType::Leaf && w.payload(slot) == leaf.payload {
                    w.swap_payload(slot, payload);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }

    /// Turns `leaf` (holding `existing_key`) into an internal node with a
    /// branch leading to both keys. `Ok(false)` if the leaf changed first.
    fn split(&self, leaf: &Found, depth: usize, existing_key: &[u8], key: &[u8], payload: u64) -> Result<bool> {
        let frozen = self
            .table
            .with_node(leaf.locator, |w, slot| {
                let current = w.header(slot);
                let unchanged = current.entry_type() == EntryType::Leaf && w.payload(slot) == leaf.payload;
                if unchanged {
                    w.set_header(slot, current.with_type(EntryType::FrozenLeaf));
                }
                unchanged
            })
            .unwrap_or(false);
        if !frozen {
            return Ok(false);
        }

        let mismatch = first_difference(existing_key, key, depth + 1);
        trace!(depth, mismatch, "splitting leaf");
        let mut created = Vec::with_capacity(mismatch - depth + 1);
        if let Err(e) = self.grow_branch(leaf, depth, mismatch, existing_key, key, payload, &mut created) {
            for &node in created.iter().rev() {
                self.table.with_node(node, |w, slot| w.clear(slot));
            }
            self.table.with_node(leaf.locator, |w, slot| {
                w.set_header(slot, w.header(slot).with_type(EntryType::Leaf))
            });
            debug!(depth, mismatch, created = created.len(), error = %e, "rolled back leaf split");
            return Err(e);
        }

        let converted = self.table.with_node(leaf.locator, |w, slot| {
            w.write(slot, w.header(slot).with_type(EntryType::Internal), 0)
        });
        assert!(converted.is_some(), "frozen leaf vanished during split");
        Ok(true)
    }

    /// Places the internal chain for symbols `depth + 1 .. mismatch` of `key`
    /// under `leaf`, then one leaf per key at `mismatch`.
    #[allow(clippy::too_many_arguments)]
    fn grow_branch(
        &self,
        leaf: &Found,
        depth: usize,
        mismatch: usize,
        existing_key: &[u8],
        key: &[u8],
        payload: u64,
        created: &mut Vec<Locator>,
    ) -> Result<()> {
        let mut parent = leaf.locator;
        for i in depth + 1..mismatch {
            parent = self.place_new(parent, symbol_at(key, i), EntryType::Internal, 0, created)?;
        }
        self.place_new(
            parent,
            symbol_at(existing_key, mismatch),
            EntryType::Leaf,
            leaf.payload,
            created,
        )?;
        self.place_new(parent, symbol_at(key, mismatch), EntryType::Leaf, payload, created)?;
        Ok(())
    }

    fn place_new(
        &self,
        parent: Locator,
        symbol: u16,
        entry_type: EntryType,
        payload: u64,
        created: &mut Vec<Locator>,
    ) -> Result<Locator> {
        match self.table.place_child(parent, symbol, entry_type, payload)? {
            Placement::Placed(node) => {
                created.push(node);
                Ok(node)
            }
            Placement::Occupied(node) => {
                panic!("edge {symbol} below a frozen leaf is already taken by {node:?}")
            }
        }
    }
}

impl Drop for CuckooTrie {
    fn drop(&mut self) {
        for (header, payload) in self.table.live_slots_mut() {
            if header.entry_type().is_leaf() {
                // SAFETY: `&mut self` excludes readers, and at rest every
                // record is owned by exactly one leaf.
                unsafe { record::reclaim(payload) };
            }
        }
    }
}

impl std::fmt::Debug for CuckooTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuckooTrie")
            .field("len", &self.len())
            .field("num_buckets", &self.num_buckets())
            .field("bucket_width", &self.bucket_width())
            .field("search_engine", &self.search_engine())
            .finish()
    }
}


#[cfg(test)]
mod proptests;
