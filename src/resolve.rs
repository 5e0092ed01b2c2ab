//! Trie edge resolution.
//!
//! A child is found by evaluating its parent-edge predicate in both of its
//! candidate buckets. Both buckets are snapshotted before either is scanned
//! and both are validated after the payload is read, so an entry moved
//! between them by a displacement is never missed. Any failed validation
//! restarts the whole descent from the root.

use crate::entry::{symbol_at, Header, END_SYMBOL};
use crate::locator::Locator;
use crate::seqlock::backoff;
use crate::table::Table;

/// A child node seen in a consistent two-bucket snapshot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Found {
    pub locator: Locator,
    pub header: Header,
    pub payload: u64,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Probe {
    Found(Found),
    Missing,
    /// A bucket was write-locked or changed during the probe.
    Retry,
}

/// Where a key's descent stopped.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Descent {
    /// A leaf (possibly frozen) on the key's path, reached via symbol `depth`.
    Leaf { leaf: Found, depth: usize },
    /// `parent` has no child for symbol `depth` of the key.
    Vacant { parent: Locator, depth: usize },
}

impl Table {
    pub fn probe_child(&self, parent: Locator, symbol: u16) -> Probe {
        let (primary, tag) = self.hashes.child(parent, symbol);
        let [primary, alternate] = self.hashes.candidates(primary, tag);
        let (Some(first), Some(second)) = (self.snapshot(primary), self.snapshot(alternate)) else {
            return Probe::Retry;
        };

        let width = self.width();
        let hit = [(&first, false), (&second, true)]
            .into_iter()
            .find_map(|(snap, secondary)| {
                let slot = self
                    .engine
                    .search_by_parent(&snap.headers, width, tag, parent.color, symbol, secondary)?;
                Some((snap, slot, secondary))
            })
            .map(|(snap, slot, secondary)| {
                let header = Header::from_raw(snap.headers[slot]);
                (header, self.payload_relaxed(snap.bucket, slot), slot, secondary)
            });

        if !self.validate(&first) || !self.validate(&second) {
            return Probe::Retry;
        }
        match hit {
            None => Probe::Missing,
            Some((header, payload, slot, secondary)) => {
                self.stats.parent_hit(secondary, slot);
                Probe::Found(Found {
                    locator: Locator {
                        primary,
                        tag,
                        color: header.color(),
                    },
                    header,
                    payload,
                })
            }
        }
    }

    /// Follows `key` from the root until a leaf or a missing edge.
    ///
    /// # Panics
    /// Panics if an internal node sits on an end-of-key edge.
    pub fn descend(&self, key: &[u8]) -> Descent {
        let mut spins = 0;
        'restart: loop {
            let mut node = self.hashes.root();
            let mut depth = 0;
            loop {
                let symbol = symbol_at(key, depth);
                match self.probe_child(node, symbol) {
                    Probe::Retry => {
                        self.stats.read_retry();
                        backoff(&mut spins);
                        continue 'restart;
                    }
                    Probe::Missing => return Descent::Vacant { parent: node, depth },
                    Probe::Found(found) if found.header.entry_type().is_leaf() => {
                        return Descent::Leaf { leaf: found, depth };
                    }
                    Probe::Found(found) => {
                        assert_ne!(symbol, END_SYMBOL, "internal node on an end-of-key edge");
                        node = found.locator;
                        depth += 1;
                    }
                }
            }
        }
    }
}
