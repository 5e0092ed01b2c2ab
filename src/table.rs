//! The bucket array.
//!
//! Headers, payloads and seqlocks live in three flat arrays indexed by
//! bucket (and `bucket * width + slot` for the per-slot arrays). All slot
//! words are atomics accessed with `Relaxed` ordering; the bucket's
//! [`SeqLock`] provides the ordering. Writers mutate only through a
//! [`BucketWriter`], readers go through [`Snapshot`]s that must be validated
//! before anything read from them is trusted.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Geometry;
use crate::entry::{EntryType, Header, HeaderQuery, MAX_BUCKET_WIDTH};
use crate::locator::HashFamily;
use crate::search::SearchEngine;
use crate::seqlock::{SeqLock, SeqLockWriteGuard};
use crate::stats::Counters;

pub(crate) struct Table {
    geometry: Geometry,
    locks: Box<[SeqLock]>,
    headers: Box<[AtomicU64]>,
    payloads: Box<[AtomicU64]>,
    pub hashes: HashFamily,
    pub engine: SearchEngine,
    pub stats: Counters,
}

/// Headers of one bucket read under an optimistic version.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Snapshot {
    pub bucket: usize,
    version: u64,
    /// Padded with [`Header::EMPTY`] past the bucket width.
    pub headers: [u64; MAX_BUCKET_WIDTH],
}

impl Table {
    pub fn new(geometry: Geometry, hashes: HashFamily, engine: SearchEngine, stats: Counters) -> Self {
        let slots = geometry.slots();
        let locks = (0..geometry.num_buckets)
            .map(|_| SeqLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let headers = (0..slots)
            .map(|_| AtomicU64::new(Header::EMPTY.raw()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let payloads = (0..slots)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            geometry,
            locks,
            headers,
            payloads,
            hashes,
            engine,
            stats,
        }
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.geometry.width
    }

    #[inline]
    fn index(&self, bucket: usize, slot: usize) -> usize {
        debug_assert!(slot < self.geometry.width);
        bucket * self.geometry.width + slot
    }

    /// Relaxed, unsynchronized copy of a bucket's headers. May be torn; only
    /// for heuristics that are re-verified under the lock.
    pub fn peek(&self, bucket: usize) -> [u64; MAX_BUCKET_WIDTH] {
        let mut out = [Header::EMPTY.raw(); MAX_BUCKET_WIDTH];
        let base = bucket * self.geometry.width;
        for (slot, h) in out.iter_mut().zip(&self.headers[base..base + self.geometry.width]) {
            *slot = h.load(Ordering::Relaxed);
        }
        out
    }

    /// Starts an optimistic read of `bucket`. `None` while a writer holds it.
    #[inline]
    pub fn snapshot(&self, bucket: usize) -> Option<Snapshot> {
        let version = self.locks[bucket].read_begin()?;
        Some(Snapshot {
            bucket,
            version,
            headers: self.peek(bucket),
        })
    }

    /// Payload word of a slot, to be trusted only after [`Table::validate`].
    #[inline]
    pub fn payload_relaxed(&self, bucket: usize, slot: usize) -> u64 {
        self.payloads[self.index(bucket, slot)].load(Ordering::Relaxed)
    }

    /// `true` if no writer touched the snapshot's bucket since it was taken.
    #[inline]
    pub fn validate(&self, snapshot: &Snapshot) -> bool {
        self.locks[snapshot.bucket].read_validate(snapshot.version)
    }

    pub fn lock(&self, bucket: usize) -> BucketWriter<'_> {
        BucketWriter {
            table: self,
            bucket,
            _guard: self.locks[bucket].write(),
        }
    }

    /// Locks two distinct buckets in ascending index order. The writers are
    /// returned in argument order.
    pub fn lock_pair(&self, a: usize, b: usize) -> (BucketWriter<'_>, BucketWriter<'_>) {
        assert_ne!(a, b, "lock_pair on a single bucket");
        if a < b {
            let first = self.lock(a);
            (first, self.lock(b))
        } else {
            let first = self.lock(b);
            (self.lock(a), first)
        }
    }

    /// Relaxed slot read for quiescent inspection.
    #[cfg(test)]
    pub fn slot(&self, bucket: usize, slot: usize) -> (Header, u64) {
        let i = self.index(bucket, slot);
        (
            Header::from_raw(self.headers[i].load(Ordering::Relaxed)),
            self.payloads[i].load(Ordering::Relaxed),
        )
    }

    /// Every live slot's header and payload. Exclusive access, so no locking.
    pub fn live_slots_mut(&mut self) -> impl Iterator<Item = (Header, u64)> + '_ {
        self.headers
            .iter_mut()
            .zip(self.payloads.iter_mut())
            .map(|(h, p)| (Header::from_raw(*h.get_mut()), *p.get_mut()))
            .filter(|(h, _)| h.entry_type().is_live())
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.locks.len() * std::mem::size_of::<SeqLock>()
            + self.headers.len() * std::mem::size_of::<AtomicU64>()
            + self.payloads.len() * std::mem::size_of::<AtomicU64>()
    }
}

/// Exclusive access to one bucket. Dropping it publishes the writes.
pub(crate) struct BucketWriter<'a> {
    table: &'a Table,
    bucket: usize,
    _guard: SeqLockWriteGuard<'a>,
}

impl BucketWriter<'_> {
    #[cfg(test)]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    #[inline]
    pub fn header(&self, slot: usize) -> Header {
        Header::from_raw(self.table.headers[self.table.index(self.bucket, slot)].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn headers(&self) -> [u64; MAX_BUCKET_WIDTH] {
        self.table.peek(self.bucket)
    }

    #[inline]
    pub fn payload(&self, slot: usize) -> u64 {
        self.table.payload_relaxed(self.bucket, slot)
    }

    /// First slot matching `query` (and live, if `live_only`).
    #[inline]
    pub fn find(&self, query: HeaderQuery, live_only: bool) -> Option<usize> {
        self.table
            .engine
            .find(&self.headers(), self.table.width(), query, live_only)
    }

    pub fn free_slot(&self) -> Option<usize> {
        (0..self.table.width()).find(|&slot| self.header(slot).entry_type() == EntryType::Unused)
    }

    pub fn write(&self, slot: usize, header: Header, payload: u64) {
        let i = self.table.index(self.bucket, slot);
        self.table.payloads[i].store(payload, Ordering::Relaxed);
        self.table.headers[i].store(header.raw(), Ordering::Relaxed);
    }

    pub fn set_header(&self, slot: usize, header: Header) {
        let i = self.table.index(self.bucket, slot);
        self.table.headers[i].store(header.raw(), Ordering::Relaxed);
    }

    /// Replaces the payload and returns the previous one.
    pub fn swap_payload(&self, slot: usize, payload: u64) -> u64 {
        let i = self.table.index(self.bucket, slot);
        self.table.payloads[i].swap(payload, Ordering::Relaxed)
    }

    pub fn clear(&self, slot: usize) {
        self.write(slot, Header::EMPTY, 0);
    }
}
