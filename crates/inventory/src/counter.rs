//! PN-Counter over per-region accumulators.
//!
//! Storage keeps one flat integer attribute per region and direction
//! (`inc_us_east_1`, `dec_eu_west_1`, ...). Each region only ever adds to its
//! own pair, so concurrent numeric adds from different regions touch disjoint
//! attributes and merge by plain addition.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use globalcat_core::{CatalogError, CatalogResult, RegionCode};
use globalcat_store::{Attributes, Row};

pub const INC_PREFIX: &str = "inc_";
pub const DEC_PREFIX: &str = "dec_";

/// One region's increment/decrement pair.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Accumulators {
    pub inc: u64,
    pub dec: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PnCounter {
    slots: BTreeMap<RegionCode, Accumulators>,
}

#[derive(Copy, Clone)]
enum Direction {
    Inc,
    Dec,
}

fn classify(name: &str) -> Option<(Direction, &str)> {
    if let Some(suffix) = name.strip_prefix(INC_PREFIX) {
        return Some((Direction::Inc, suffix));
    }
    name.strip_prefix(DEC_PREFIX).map(|suffix| (Direction::Dec, suffix))
}

impl PnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode accumulators from a stored row's attributes.
    ///
    /// Absent or `null` accumulators are 0. Anything else that is not a
    /// non-negative integer is `DataCorruption`. Non-accumulator attributes
    /// (`PK`, `SK`, timestamps) are ignored.
    pub fn from_attrs(attrs: &Attributes) -> CatalogResult<Self> {
        let mut counter = Self::new();
        for (name, value) in attrs {
            let Some((direction, suffix)) = classify(name) else {
                continue;
            };
            let region = RegionCode::from_attr_suffix(suffix).map_err(|_| {
                CatalogError::corruption(format!("accumulator {name} names no valid region"))
            })?;
            let amount = match value {
                Value::Null => 0,
                v => v.as_u64().ok_or_else(|| {
                    CatalogError::corruption(format!(
                        "accumulator {name} is not a non-negative integer: {v}"
                    ))
                })?,
            };
            let slot = counter.slots.entry(region).or_default();
            match direction {
                Direction::Inc => slot.inc = slot.inc.saturating_add(amount),
                Direction::Dec => slot.dec = slot.dec.saturating_add(amount),
            }
        }
        Ok(counter)
    }

    pub fn from_row(row: &Row) -> CatalogResult<Self> {
        Self::from_attrs(&row.attrs)
    }

    /// Encode back into the flat attribute namespace.
    pub fn to_attrs(&self) -> Attributes {
        let mut attrs = Attributes::new();
        for (region, acc) in &self.slots {
            let suffix = region.attr_suffix();
            attrs.insert(format!("{INC_PREFIX}{suffix}"), Value::from(acc.inc));
            attrs.insert(format!("{DEC_PREFIX}{suffix}"), Value::from(acc.dec));
        }
        attrs
    }

    /// Add a region's local contribution (what a numeric add does to storage).
    pub fn apply(&mut self, region: &RegionCode, inc: u64, dec: u64) {
        let slot = self.slots.entry(region.clone()).or_default();
        slot.inc = slot.inc.saturating_add(inc);
        slot.dec = slot.dec.saturating_add(dec);
    }

    /// State-based join: per region, keep the larger of each accumulator.
    ///
    /// Valid because a region's accumulators only grow.
    pub fn join(&mut self, other: &PnCounter) {
        for (region, theirs) in &other.slots {
            let ours = self.slots.entry(region.clone()).or_default();
            ours.inc = ours.inc.max(theirs.inc);
            ours.dec = ours.dec.max(theirs.dec);
        }
    }

    pub fn get(&self, region: &RegionCode) -> Accumulators {
        self.slots.get(region).copied().unwrap_or_default()
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionCode> {
        self.slots.keys()
    }

    pub fn total_inc(&self) -> u128 {
        self.slots.values().map(|a| a.inc as u128).sum()
    }

    pub fn total_dec(&self) -> u128 {
        self.slots.values().map(|a| a.dec as u128).sum()
    }

    /// `Σ inc − Σ dec`. May be negative; never clamped to zero.
    pub fn merged_qty(&self) -> i64 {
        let qty = self.total_inc() as i128 - self.total_dec() as i128;
        qty.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

/// Merged quantity of a stored inventory row.
pub fn merge_inventory(row: &Row) -> CatalogResult<i64> {
    Ok(PnCounter::from_row(row)?.merged_qty())
}

/// The two-entry numeric-add map for one region's contribution.
pub fn delta_attrs(region: &RegionCode, inc: i64, dec: i64) -> BTreeMap<String, i64> {
    let suffix = region.attr_suffix();
    BTreeMap::from([
        (format!("{INC_PREFIX}{suffix}"), inc),
        (format!("{DEC_PREFIX}{suffix}"), dec),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalcat_core::ItemKey;
    use serde_json::json;

    fn region(code: &str) -> RegionCode {
        RegionCode::new(code).unwrap()
    }

    fn row(attrs: Value) -> Row {
        let Value::Object(map) = attrs else {
            panic!("attrs must be an object");
        };
        Row::new(ItemKey::new("PRODUCT#p-1", "INV#wh-1#us-east-1"), map)
    }

    #[test]
    fn empty_row_merges_to_zero() {
        assert_eq!(merge_inventory(&row(json!({}))).unwrap(), 0);
    }

    #[test]
    fn merge_sums_every_region() {
        let r = row(json!({
            "inc_us_east_1": 10,
            "dec_us_east_1": 0,
            "inc_eu_west_1": 0,
            "dec_eu_west_1": 3,
            "title": "ignored",
        }));
        assert_eq!(merge_inventory(&r).unwrap(), 7);
    }

    #[test]
    fn merged_quantity_may_go_negative() {
        let r = row(json!({"inc_us_east_1": 2, "dec_eu_west_1": 5}));
        assert_eq!(merge_inventory(&r).unwrap(), -3);
    }

    #[test]
    fn null_accumulator_counts_as_zero() {
        let r = row(json!({"inc_us_east_1": null, "dec_us_east_1": 1}));
        assert_eq!(merge_inventory(&r).unwrap(), -1);
    }

    #[test]
    fn malformed_accumulators_are_corruption() {
        for bad in [json!("12"), json!(-1), json!(1.5), json!({"n": 1})] {
            let err = merge_inventory(&row(json!({ "inc_us_east_1": bad }))).unwrap_err();
            assert!(matches!(err, CatalogError::DataCorruption(_)));
        }
        let err = merge_inventory(&row(json!({"inc_": 1}))).unwrap_err();
        assert!(matches!(err, CatalogError::DataCorruption(_)));
    }

    #[test]
    fn attribute_encoding_is_lossless() {
        let mut counter = PnCounter::new();
        counter.apply(&region("us-east-1"), 10, 1);
        counter.apply(&region("eu-west-1"), 0, 3);

        let decoded = PnCounter::from_attrs(&counter.to_attrs()).unwrap();
        assert_eq!(decoded, counter);
        assert_eq!(decoded.get(&region("eu-west-1")), Accumulators { inc: 0, dec: 3 });
    }

    #[test]
    fn delta_map_targets_the_writing_region_only() {
        let deltas = delta_attrs(&region("us-east-1"), 4, 0);
        assert_eq!(
            deltas.keys().collect::<Vec<_>>(),
            vec!["dec_us_east_1", "inc_us_east_1"]
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn region_strategy() -> impl Strategy<Value = RegionCode> {
            prop::sample::select(vec!["us-east-1", "eu-west-1", "ap-south-1"])
                .prop_map(|code| RegionCode::new(code).unwrap())
        }

        fn deltas_strategy() -> impl Strategy<Value = Vec<(RegionCode, u64, u64)>> {
            prop::collection::vec((region_strategy(), 0u64..1_000, 0u64..1_000), 0..40)
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any interleaving of the same deltas yields the same quantity.
            #[test]
            fn merge_is_order_independent(
                (deltas, shuffled) in deltas_strategy()
                    .prop_flat_map(|d| (Just(d.clone()), Just(d).prop_shuffle()))
            ) {
                let mut in_order = PnCounter::new();
                for (r, inc, dec) in &deltas {
                    in_order.apply(r, *inc, *dec);
                }
                let mut interleaved = PnCounter::new();
                for (r, inc, dec) in &shuffled {
                    interleaved.apply(r, *inc, *dec);
                }

                let expected: i64 = deltas.iter().map(|(_, i, d)| *i as i64 - *d as i64).sum();
                prop_assert_eq!(in_order.merged_qty(), expected);
                prop_assert_eq!(interleaved.merged_qty(), expected);
                prop_assert_eq!(in_order, interleaved);
            }

            /// Property: state join is commutative, associative and idempotent.
            #[test]
            fn join_is_a_semilattice(a in deltas_strategy(), b in deltas_strategy(), c in deltas_strategy()) {
                let build = |ds: &Vec<(RegionCode, u64, u64)>| {
                    let mut counter = PnCounter::new();
                    for (r, inc, dec) in ds {
                        counter.apply(r, *inc, *dec);
                    }
                    counter
                };
                let (a, b, c) = (build(&a), build(&b), build(&c));

                let mut ab = a.clone();
                ab.join(&b);
                let mut ba = b.clone();
                ba.join(&a);
                prop_assert_eq!(&ab, &ba);

                let mut ab_c = ab.clone();
                ab_c.join(&c);
                let mut bc = b.clone();
                bc.join(&c);
                let mut a_bc = a.clone();
                a_bc.join(&bc);
                prop_assert_eq!(&ab_c, &a_bc);

                let mut aa = a.clone();
                aa.join(&a);
                prop_assert_eq!(aa, a);
            }

            /// Property: a zero contribution never changes the quantity.
            #[test]
            fn zero_delta_is_a_no_op(deltas in deltas_strategy(), r in region_strategy()) {
                let mut counter = PnCounter::new();
                for (region, inc, dec) in &deltas {
                    counter.apply(region, *inc, *dec);
                }
                let before = counter.merged_qty();
                counter.apply(&r, 0, 0);
                prop_assert_eq!(counter.merged_qty(), before);
            }
        }
    }
}
