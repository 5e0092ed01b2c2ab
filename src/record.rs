//! Key/value records owned by leaf nodes.
//!
//! A leaf's payload word is the address of a heap [`KvRecord`] packed with
//! crossbeam-epoch's [`Pointer`] encoding. Records replaced by an upsert are
//! retired with `defer_destroy`, so a reader that pinned the epoch before
//! reading a payload word can always dereference it.

use crossbeam_epoch::{Guard, Owned, Pointer, Shared};

/// One key and its value in a single allocation.
pub(crate) struct KvRecord {
    bytes: Box<[u8]>,
    key_len: usize,
}

impl KvRecord {
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(key.len() + value.len());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(value);
        Self {
            bytes: bytes.into_boxed_slice(),
            key_len: key.len(),
        }
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.bytes[..self.key_len]
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.bytes[self.key_len..]
    }
}

/// A record allocated for a leaf that is not yet visible to readers. Freed on
/// drop unless [`publish`](PendingRecord::publish)ed.
pub(crate) struct PendingRecord {
    raw: u64,
}

impl PendingRecord {
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        Self {
            raw: Owned::new(KvRecord::new(key, value)).into_usize() as u64,
        }
    }

    /// Payload word to store in the leaf slot.
    #[inline]
    pub fn payload(&self) -> u64 {
        self.raw
    }

    /// Hands ownership to the table.
    pub fn publish(self) -> u64 {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        // SAFETY: never published, so no slot or reader holds this address.
        unsafe { reclaim(self.raw) };
    }
}

/// Borrows the record at `payload` for the lifetime of `guard`.
///
/// # Safety
/// `payload` must have been read from a leaf slot in a snapshot that
/// validated, while `guard` was pinned.
#[inline]
pub(crate) unsafe fn deref<'g>(payload: u64, _guard: &'g Guard) -> &'g KvRecord {
    // SAFETY: the caller guarantees the record was live after the pin, and
    // retirement defers destruction past every pinned guard.
    unsafe { Shared::<KvRecord>::from_usize(payload as usize).deref() }
}

/// Schedules a record that was unlinked from its slot for destruction.
///
/// # Safety
/// `payload` must be a published record that no slot references any more.
pub(crate) unsafe fn retire(payload: u64, guard: &Guard) {
    // SAFETY: unlinked per the caller; concurrent readers are covered by the epoch.
    unsafe { guard.defer_destroy(Shared::<KvRecord>::from_usize(payload as usize)) };
}

/// Frees a record immediately.
///
/// # Safety
/// No other thread may hold or later read `payload`.
pub(crate) unsafe fn reclaim(payload: u64) {
    // SAFETY: exclusive per the caller.
    drop(unsafe { Owned::<KvRecord>::from_usize(payload as usize) });
}
