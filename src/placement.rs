//! Cuckoo placement and bounded displacement.
//!
//! A new child is written under the locks of both its candidate buckets,
//! after the parent edge is re-checked under those locks. When both are
//! full, [`Table::make_room`] plans a displacement path with unsynchronized
//! peeks and then executes it from the far end backwards, one locked
//! two-bucket move at a time, re-verifying every victim before moving it.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::entry::{EntryType, Header, HeaderQuery};
use crate::error::{Error, Result};
use crate::locator::{mix64, Locator};
use crate::table::{BucketWriter, Table};

/// Placement rounds (lock, check, displace) before giving up on a slot that
/// concurrent writers keep taking.
const PLACEMENT_ATTEMPTS: usize = 4;

/// Outcome of [`Table::place_child`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Placed(Locator),
    /// The edge already had a child; nothing was written.
    Occupied(Locator),
}

#[derive(Clone, Copy, Debug)]
struct PathStep {
    bucket: usize,
    slot: usize,
    header: Header,
}

type Path = SmallVec<[PathStep; 16]>;

/// Smallest color not held by a live node with this `(primary, tag)`.
///
/// Those nodes are exactly the live entries with `tag` that sit in the
/// primary bucket unflagged or in the alternate bucket flagged secondary.
pub(crate) fn free_color(primary: &[u64], alternate: &[u64], tag: u16, max_colors: u16) -> Option<u8> {
    let mut used = 0u128;
    for (headers, secondary) in [(primary, false), (alternate, true)] {
        for &raw in headers {
            let h = Header::from_raw(raw);
            if h.entry_type().is_live() && h.tag() == tag && h.is_secondary() == secondary {
                used |= 1u128 << h.color();
            }
        }
    }
    (0..max_colors)
        .find(|&c| used & (1u128 << c) == 0)
        .map(|c| c as u8)
}

impl Table {
    /// Creates the child of `parent` on edge `symbol`, unless one exists.
    pub fn place_child(
        &self,
        parent: Locator,
        symbol: u16,
        entry_type: EntryType,
        payload: u64,
    ) -> Result<Placement> {
        debug_assert!(entry_type.is_live());
        let (primary, tag) = self.hashes.child(parent, symbol);
        let [primary, alternate] = self.hashes.candidates(primary, tag);
        let width = self.width();

        for _ in 0..PLACEMENT_ATTEMPTS {
            {
                let (first, second) = self.lock_pair(primary, alternate);
                for (w, secondary) in [(&first, false), (&second, true)] {
                    let query = HeaderQuery::parent_edge(tag, parent.color, symbol, secondary);
                    if let Some(slot) = w.find(query, true) {
                        return Ok(Placement::Occupied(Locator {
                            primary,
                            tag,
                            color: w.header(slot).color(),
                        }));
                    }
                }

                let Some(color) = free_color(
                    &first.headers()[..width],
                    &second.headers()[..width],
                    tag,
                    self.geometry().max_colors,
                ) else {
                    self.stats.placement_failure();
                    debug!(primary, tag, "no free color for node");
                    return Err(Error::CapacityExceeded {
                        reason: "no free color for the node's bucket and tag",
                    });
                };

                let target = first
                    .free_slot()
                    .map(|slot| (&first, slot, false))
                    .or_else(|| second.free_slot().map(|slot| (&second, slot, true)));
                if let Some((w, slot, secondary)) = target {
                    w.write(
                        slot,
                        Header::new(entry_type, tag, color, parent.color, symbol, secondary),
                        payload,
                    );
                    return Ok(Placement::Placed(Locator {
                        primary,
                        tag,
                        color,
                    }));
                }
            }
            self.make_room([primary, alternate])?;
        }

        self.stats.placement_failure();
        debug!(primary, tag, "placement kept losing freed slots to concurrent writers");
        Err(Error::CapacityExceeded {
            reason: "freed slots were repeatedly taken by concurrent writers",
        })
    }

    /// Locks both candidate buckets of `node` and runs `f` on the slot that
    /// holds it. `None` if the node is not stored.
    pub fn with_node<R>(&self, node: Locator, f: impl FnOnce(&BucketWriter<'_>, usize) -> R) -> Option<R> {
        let [primary, alternate] = self.hashes.candidates(node.primary, node.tag);
        let (first, second) = self.lock_pair(primary, alternate);
        for (w, secondary) in [(&first, false), (&second, true)] {
            if let Some(slot) = w.find(HeaderQuery::identity(node.tag, node.color, secondary), false) {
                return Some(f(w, slot));
            }
        }
        None
    }

    /// Frees a slot in one of `candidates` by moving entries to their
    /// alternate buckets.
    ///
    /// `Ok` means the caller should look again: either a slot was freed or the
    /// planned path went stale under concurrent writers.
    fn make_room(&self, candidates: [usize; 2]) -> Result<()> {
        let Some(path) = candidates.iter().find_map(|&origin| self.find_path(origin)) else {
            self.stats.placement_failure();
            debug!(
                buckets = ?candidates,
                max_depth = self.geometry().max_displacement_depth,
                "no displacement path"
            );
            return Err(Error::CapacityExceeded {
                reason: "no displacement path within the depth bound",
            });
        };
        self.execute_path(&path);
        Ok(())
    }

    /// Plans a chain of moves ending in a bucket with a free slot. An empty
    /// path means `origin` already has room.
    fn find_path(&self, origin: usize) -> Option<Path> {
        let width = self.width();
        let max_depth = self.geometry().max_displacement_depth;
        let has_room = |headers: &[u64]| {
            headers[..width]
                .iter()
                .any(|&h| !Header::from_raw(h).entry_type().is_live())
        };

        let mut path = Path::new();
        let mut current = origin;
        while path.len() < max_depth {
            let headers = self.peek(current);
            if has_room(&headers) {
                return Some(path);
            }

            // One-bucket look-ahead: a victim whose alternate has room ends the path.
            for (slot, &raw) in headers[..width].iter().enumerate() {
                let header = Header::from_raw(raw);
                let dest = self.hashes.alternate(current, header.tag());
                if has_room(&self.peek(dest)) {
                    path.push(PathStep {
                        bucket: current,
                        slot,
                        header,
                    });
                    return Some(path);
                }
            }

            let start = mix64(current as u64 ^ (path.len() as u64).rotate_left(32)) as usize % width;
            let on_path = |bucket: usize| bucket == origin || path.iter().any(|s| s.bucket == bucket);
            let slot = (0..width)
                .map(|i| (start + i) % width)
                .find(|&slot| {
                    let tag = Header::from_raw(headers[slot]).tag();
                    !on_path(self.hashes.alternate(current, tag))
                })
                .unwrap_or(start);
            let header = Header::from_raw(headers[slot]);
            path.push(PathStep {
                bucket: current,
                slot,
                header,
            });
            current = self.hashes.alternate(current, header.tag());
        }
        None
    }

    /// Runs `path` from its end. Returns `false` if a step found the table
    /// changed; moves already made are valid on their own.
    fn execute_path(&self, path: &[PathStep]) -> bool {
        for step in path.iter().rev() {
            let dest = self.hashes.alternate(step.bucket, step.header.tag());
            let (src, dst) = self.lock_pair(step.bucket, dest);
            if src.header(step.slot) != step.header {
                return false;
            }
            let Some(free) = dst.free_slot() else {
                return false;
            };
            let moved = step.header.with_secondary(!step.header.is_secondary());
            dst.write(free, moved, src.payload(step.slot));
            src.clear(step.slot);
            self.stats.displacement();
            trace!(from = step.bucket, to = dest, tag = step.header.tag(), "displaced entry");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entry::END_SYMBOL;
    use crate::locator::HashFamily;
    use crate::resolve::Probe;
    use crate::search::SearchEngine;
    use crate::stats::Counters;

    fn table(cfg: Config) -> Table {
        let g = cfg.validate().unwrap();
        Table::new(
            g,
            HashFamily::new(&g, cfg.seed),
            SearchEngine::detect(cfg.search),
            Counters::new(true),
        )
    }

    fn live_count(t: &Table) -> usize {
        let g = t.geometry();
        (0..g.num_buckets)
            .flat_map(|b| (0..g.width).map(move |s| (b, s)))
            .filter(|&(b, s)| t.slot(b, s).0.entry_type().is_live())
            .count()
    }

    #[test]
    fn test_free_color() {
        let live = |tag, color, secondary| Header::new(EntryType::Leaf, tag, color, 0, 0, secondary).raw();
        let empty = Header::EMPTY.raw();
        assert_eq!(free_color(&[empty; 4], &[empty; 4], 3, 16), Some(0));
        // Same tag, right flag: taken. Other tag or wrong flag: ignored.
        let primary = [live(3, 0, false), live(3, 1, true), live(4, 1, false), empty];
        let alternate = [live(3, 2, true), live(3, 3, false), empty, empty];
        assert_eq!(free_color(&primary, &alternate, 3, 16), Some(1));
        let primary = [live(3, 0, false), live(3, 1, false)];
        assert_eq!(free_color(&primary, &[], 3, 2), None);
        // A vacated slot frees its color.
        let vacated = Header::from_raw(live(3, 0, false)).with_type(EntryType::Unused).raw();
        assert_eq!(free_color(&[vacated], &[], 3, 2), Some(0));
    }

    #[test]
    fn test_place_then_probe() {
        let t = table(Config::default());
        let root = t.hashes.root();
        let placed = t.place_child(root, u16::from(b'a'), EntryType::Leaf, 42).unwrap();
        let Placement::Placed(loc) = placed else {
            panic!("expected a new node, got {placed:?}");
        };
        assert_eq!(
            t.place_child(root, u16::from(b'a'), EntryType::Internal, 0).unwrap(),
            Placement::Occupied(loc)
        );
        match t.probe_child(root, u16::from(b'a')) {
            Probe::Found(found) => {
                assert_eq!(found.locator, loc);
                assert_eq!(found.payload, 42);
                assert_eq!(found.header.entry_type(), EntryType::Leaf);
            }
            other => panic!("unexpected probe result {other:?}"),
        }
        assert!(matches!(t.probe_child(root, u16::from(b'b')), Probe::Missing));
        assert!(matches!(t.probe_child(loc, u16::from(b'a')), Probe::Missing));
    }

    #[test]
    fn test_two_bucket_table_fills_exactly() {
        let t = table(Config::with_capacity(8));
        let root = t.hashes.root();
        for symbol in 0..8 {
            assert!(matches!(
                t.place_child(root, symbol, EntryType::Leaf, 1),
                Ok(Placement::Placed(_))
            ));
        }
        for _ in 0..3 {
            assert!(matches!(
                t.place_child(root, 8, EntryType::Leaf, 1),
                Err(Error::CapacityExceeded { .. })
            ));
        }
        assert_eq!(live_count(&t), 8);
        for symbol in 0..8 {
            assert!(matches!(t.probe_child(root, symbol), Probe::Found(_)));
        }
        assert!(matches!(t.probe_child(root, 8), Probe::Missing));
    }

    #[test]
    fn test_displacement_keeps_nodes_reachable() {
        let mut displacements = 0;
        for seed in 0..4u64 {
            let t = table(Config {
                capacity: 64,
                seed,
                ..Config::default()
            });
            let root = t.hashes.root();
            let mut placed = Vec::new();
            for symbol in 0..=END_SYMBOL {
                match t.place_child(root, symbol, EntryType::Leaf, u64::from(symbol) + 1) {
                    Ok(Placement::Placed(loc)) => placed.push((symbol, loc)),
                    Ok(Placement::Occupied(loc)) => panic!("fresh edge {symbol} occupied by {loc:?}"),
                    Err(Error::CapacityExceeded { .. }) => break,
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
            assert!(placed.len() >= 8, "seed {seed} placed only {}", placed.len());
            assert_eq!(live_count(&t), placed.len());
            for &(symbol, loc) in &placed {
                let Probe::Found(found) = t.probe_child(root, symbol) else {
                    panic!("seed {seed}: symbol {symbol} lost");
                };
                assert_eq!(found.locator, loc);
                assert_eq!(found.payload, u64::from(symbol) + 1);
            }
            displacements += t.stats.snapshot().displacements;
        }
        assert!(displacements > 0);
    }

    #[test]
    fn test_capacity_failure_is_deterministic() {
        let fill = || {
            let t = table(Config {
                capacity: 32,
                max_displacement_depth: 4,
                ..Config::default()
            });
            let root = t.hashes.root();
            (0..=END_SYMBOL)
                .map(|symbol| t.place_child(root, symbol, EntryType::Leaf, 1).is_ok())
                .collect::<Vec<_>>()
        };
        let a = fill();
        assert!(a.iter().any(|ok| !ok));
        assert_eq!(a, fill());
    }

    #[test]
    fn test_with_node_follows_moves() {
        let t = table(Config::with_capacity(8));
        let root = t.hashes.root();
        let mut nodes = Vec::new();
        for symbol in 0..8 {
            if let Ok(Placement::Placed(loc)) = t.place_child(root, symbol, EntryType::Internal, 0) {
                nodes.push(loc);
            }
        }
        for loc in nodes {
            let found = t.with_node(loc, |w, slot| w.header(slot));
            let header = found.expect("node stored");
            assert_eq!((header.tag(), header.color()), (loc.tag, loc.color));
        }
    }
}
