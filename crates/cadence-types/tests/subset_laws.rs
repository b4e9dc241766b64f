//! Property tests for the partition subset algebra.
//!
//! The co-finite "all partitions" form must agree with the explicit key-set
//! form for every operation.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeSet;

use cadence_types::{AssetKey, AssetSubset, PartitionsDefinition};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

const UNIVERSE: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn def() -> PartitionsDefinition {
    PartitionsDefinition::fixed(UNIVERSE)
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn key() -> AssetKey {
    AssetKey::new(["warehouse", "orders"])
}

/// A subset given by membership flags, in either representation.
fn build(flags: &[bool], cofinite: bool) -> AssetSubset {
    let included: BTreeSet<&str> = UNIVERSE
        .iter()
        .zip(flags)
        .filter(|(_, keep)| **keep)
        .map(|(name, _)| *name)
        .collect();
    if cofinite {
        let excluded: Vec<&str> = UNIVERSE
            .iter()
            .copied()
            .filter(|name| !included.contains(name))
            .collect();
        AssetSubset::all(key(), Some(def()), now())
            .subtract(&AssetSubset::from_keys(key(), def(), excluded))
    } else {
        AssetSubset::from_keys(key(), def(), included)
    }
}

fn arb_flags() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), UNIVERSE.len())
}

proptest! {
    #[test]
    fn representations_agree(a in arb_flags(), b in arb_flags(), ca: bool, cb: bool) {
        let explicit_a = build(&a, false);
        let explicit_b = build(&b, false);
        let mixed_a = build(&a, ca);
        let mixed_b = build(&b, cb);

        prop_assert_eq!(mixed_a.union(&mixed_b), explicit_a.union(&explicit_b));
        prop_assert_eq!(mixed_a.intersect(&mixed_b), explicit_a.intersect(&explicit_b));
        prop_assert_eq!(mixed_a.subtract(&mixed_b), explicit_a.subtract(&explicit_b));
        prop_assert_eq!(mixed_a.size(), explicit_a.size());
    }

    #[test]
    fn union_and_intersection_commute(a in arb_flags(), b in arb_flags(), ca: bool, cb: bool) {
        let x = build(&a, ca);
        let y = build(&b, cb);
        prop_assert_eq!(x.union(&y), y.union(&x));
        prop_assert_eq!(x.intersect(&y), y.intersect(&x));
    }

    #[test]
    fn subtraction_partitions_the_left_operand(a in arb_flags(), b in arb_flags(), ca: bool, cb: bool) {
        let x = build(&a, ca);
        let y = build(&b, cb);
        let kept = x.subtract(&y);
        let removed = x.intersect(&y);
        prop_assert_eq!(kept.union(&removed), x.clone());
        prop_assert!(kept.intersect(&removed).is_empty());
        prop_assert_eq!(kept.size() + removed.size(), x.size());
    }
}
