use super::*;

use crossbeam_epoch as epoch;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, HashSet};

use crate::resolve::Probe;

/// Checks the structural invariants of a quiescent trie.
fn validate_trie(t: &CuckooTrie) {
    let table = &t.table;
    let g = *table.geometry();

    let mut live = 0usize;
    for bucket in 0..g.num_buckets {
        let mut identities = HashSet::new();
        for slot in 0..g.width {
            let (header, payload) = table.slot(bucket, slot);
            match header.entry_type() {
                EntryType::Unused => {
                    assert_eq!(header, Header::EMPTY, "vacated slots must be fully cleared");
                    assert_eq!(payload, 0);
                    continue;
                }
                EntryType::FrozenLeaf => panic!("frozen leaf left behind in bucket {bucket}"),
                EntryType::Internal => assert_eq!(payload, 0, "internal nodes own no record"),
                EntryType::Leaf => assert_ne!(payload, 0, "leaf without a record"),
            }
            assert!(u16::from(header.color()) < g.max_colors);
            assert!(
                identities.insert((header.tag(), header.color(), header.is_secondary())),
                "duplicate identity in bucket {bucket}: {header:?}"
            );
            live += 1;
        }
    }

    let guard = epoch::pin();
    let mut stack = vec![(table.hashes.root(), Vec::<u16>::new())];
    let mut reachable = 0usize;
    let mut leaves = 0usize;
    while let Some((node, path)) = stack.pop() {
        for symbol in 0..=END_SYMBOL {
            let found = match table.probe_child(node, symbol) {
                Probe::Found(found) => found,
                Probe::Missing => continue,
                Probe::Retry => panic!("retry on a quiescent table"),
            };
            reachable += 1;
            assert_eq!(found.header.last_symbol(), symbol);
            assert_eq!(found.header.parent_color(), node.color);

            let mut child_path = path.clone();
            child_path.push(symbol);
            if found.header.entry_type().is_leaf() {
                leaves += 1;
                // SAFETY: quiescent table, validated probe, pinned guard.
                let record = unsafe { record::deref(found.payload, &guard) };
                for (i, &s) in child_path.iter().enumerate() {
                    assert_eq!(symbol_at(record.key(), i), s, "leaf off its key's path");
                }
            } else {
                assert_ne!(symbol, END_SYMBOL, "internal node on an end-of-key edge");
                stack.push((found.locator, child_path));
            }
        }
    }

    assert_eq!(reachable, live, "every live entry must be reachable from the root");
    assert_eq!(leaves, t.len(), "reachable leaf count must match CuckooTrie::len");
}

#[derive(Clone, Debug)]
enum Op {
    Upsert(Vec<u8>, Vec<u8>),
    Insert(Vec<u8>, Vec<u8>),
    Lookup(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A narrow alphabet keeps keys sharing long prefixes.
    prop::collection::vec(0u8..6, 0..=10)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let value = prop::collection::vec(any::<u8>(), 0..=8);
    let op = prop_oneof![
        50 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Upsert(k, v)),
        20 => (key.clone(), value).prop_map(|(k, v)| Op::Insert(k, v)),
        30 => key.prop_map(Op::Lookup),
    ];
    prop::collection::vec(op, 0..=400)
}

/// Applies `ops` to `t` and a model, treating `CapacityExceeded` as a no-op.
fn run_against_model(t: &CuckooTrie, ops: Vec<Op>) -> std::result::Result<(), TestCaseError> {
    let mut m: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for op in ops {
        match op {
            Op::Upsert(key, value) => match t.upsert(&key, &value) {
                Ok(created) => {
                    prop_assert_eq!(created, m.insert(key, value).is_none());
                }
                Err(Error::CapacityExceeded { .. }) => {
                    prop_assert!(!m.contains_key(&key), "updating a present key needs no new node");
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error {e}"))),
            },
            Op::Insert(key, value) => match t.insert(&key, &value) {
                Ok(()) => {
                    prop_assert!(m.insert(key, value).is_none());
                }
                Err(Error::KeyExists) => prop_assert!(m.contains_key(&key)),
                Err(Error::CapacityExceeded { .. }) => prop_assert!(!m.contains_key(&key)),
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error {e}"))),
            },
            Op::Lookup(key) => {
                prop_assert_eq!(t.lookup(&key).unwrap(), m.get(&key).cloned());
            }
        }
        prop_assert_eq!(t.len(), m.len());
    }

    validate_trie(t);
    for (k, v) in &m {
        prop_assert_eq!(t.lookup(k).unwrap(), Some(v.clone()));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Arbitrary)]
enum LaneKind {
    Unused,
    Leaf,
    Internal,
    Frozen,
}

#[derive(Clone, Copy, Debug, Arbitrary)]
struct Lane {
    kind: LaneKind,
    #[proptest(strategy = "0u16..4")]
    tag: u16,
    #[proptest(strategy = "0u8..4")]
    color: u8,
    #[proptest(strategy = "0u8..4")]
    parent_color: u8,
    #[proptest(strategy = "0u16..4")]
    symbol: u16,
    secondary: bool,
}

impl Lane {
    fn header(self) -> Header {
        let kind = match self.kind {
            LaneKind::Unused => EntryType::Unused,
            LaneKind::Leaf => EntryType::Leaf,
            LaneKind::Internal => EntryType::Internal,
            LaneKind::Frozen => EntryType::FrozenLeaf,
        };
        Header::new(kind, self.tag, self.color, self.parent_color, self.symbol, self.secondary)
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_roomy(ops in ops_strategy()) {
        let t = CuckooTrie::new(1 << 14).unwrap();
        run_against_model(&t, ops)?;
    }

    #[test]
    fn prop_equivalence_tight(ops in ops_strategy(), seed in any::<u64>()) {
        // Small enough that placements fail and splits roll back.
        let t = CuckooTrie::with_config(Config {
            capacity: 96,
            max_displacement_depth: 6,
            seed,
            ..Config::default()
        })
        .unwrap();
        run_against_model(&t, ops)?;
    }

    #[test]
    fn prop_engines_agree(
        lanes in prop::array::uniform8(any::<Lane>()),
        width in 1usize..=MAX_BUCKET_WIDTH,
        probe in any::<Lane>(),
    ) {
        let headers = lanes.map(|lane| lane.header().raw());
        let scalar = SearchEngine::scalar();
        let id = scalar.search_by_identity(&headers, width, probe.tag, probe.color, probe.secondary);
        let edge = scalar.search_by_parent(
            &headers, width, probe.tag, probe.parent_color, probe.symbol, probe.secondary,
        );
        for engine in SearchEngine::available() {
            prop_assert_eq!(
                engine.search_by_identity(&headers, width, probe.tag, probe.color, probe.secondary),
                id
            );
            prop_assert_eq!(
                engine.search_by_parent(
                    &headers, width, probe.tag, probe.parent_color, probe.symbol, probe.secondary,
                ),
                edge
            );
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"ab".to_vec(),
        b"abc".to_vec(),
        b"abd".to_vec(),
    ];

    for_each_permutation(&keys, |perm| {
        let t = CuckooTrie::new(256).unwrap();
        for (i, k) in perm.iter().enumerate() {
            t.insert(k, &[i as u8]).unwrap();
        }
        validate_trie(&t);
        for (i, k) in perm.iter().enumerate() {
            assert_eq!(t.lookup(k).unwrap(), Some(vec![i as u8]), "order {perm:?}");
        }
    });
}

#[test]
fn tight_table_rolls_back_failed_splits() {
    let t = CuckooTrie::new(16).unwrap();
    let mut stored = Vec::new();
    for i in 0..=255u8 {
        // Long shared prefixes force chains that the table cannot hold.
        let key = [b'p', b'r', b'e', i % 4, i];
        match t.insert(&key, &[i]) {
            Ok(()) => stored.push(key),
            Err(Error::CapacityExceeded { .. }) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
        validate_trie(&t);
    }
    assert!(!stored.is_empty());
    for key in &stored {
        assert_eq!(t.lookup(key).unwrap(), Some(vec![key[4]]));
    }
}
