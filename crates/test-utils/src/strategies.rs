//! Proptest strategies for docshard domain types.
//!
//! # Usage
//!
//! ```no_run
//! use docshard_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(value in strategies::arb_scalar_value()) {
//!         // test invariant with a randomly generated field value
//!     }
//! }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use docshard_types::{CommitId, FieldKind, FieldValue};
use proptest::prelude::*;

/// Generates an arbitrary document identifier matching `bae-[a-f0-9]{8}`.
pub fn arb_doc_id() -> impl Strategy<Value = String> {
    "bae-[a-f0-9]{8}"
}

/// Generates a short person name of 1-12 lowercase letters.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[a-z]{1,12}"
}

/// Generates an arbitrary [`DateTime<Utc>`] between 2020-01-01 and 2030-01-01.
pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
    })
}

/// Generates an arbitrary 32-byte commit identifier.
pub fn arb_commit_id() -> impl Strategy<Value = CommitId> {
    proptest::array::uniform32(any::<u8>()).prop_map(CommitId::from_hash)
}

/// Generates a non-null scalar of any kind. Floats are finite.
pub fn arb_scalar_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        (-1.0e12f64..1.0e12).prop_map(FieldValue::Float),
        ".{0,24}".prop_map(FieldValue::String),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(FieldValue::Bytes),
        arb_timestamp().prop_map(FieldValue::DateTime),
    ]
}

/// Generates a value of `kind`, null one time in eight when the kind is
/// nillable.
pub fn arb_value_of(kind: FieldKind) -> BoxedStrategy<FieldValue> {
    let scalar = match kind {
        FieldKind::BOOL => any::<bool>().prop_map(FieldValue::Bool).boxed(),
        FieldKind::INT => any::<i64>().prop_map(FieldValue::Int).boxed(),
        FieldKind::FLOAT => (-1.0e12f64..1.0e12).prop_map(FieldValue::Float).boxed(),
        FieldKind::DATETIME => arb_timestamp().prop_map(FieldValue::DateTime).boxed(),
        FieldKind::BYTES => {
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(FieldValue::Bytes).boxed()
        },
        _ => ".{0,24}".prop_map(FieldValue::String).boxed(),
    };
    if kind.is_nillable() {
        prop_oneof![1 => Just(FieldValue::Null), 7 => scalar].boxed()
    } else {
        scalar
    }
}

/// Generates 1-`max` users as `(name, age)` pairs with distinct names.
pub fn arb_users(max: usize) -> impl Strategy<Value = Vec<(String, i64)>> {
    proptest::collection::btree_map(arb_name(), 0i64..100, 1..=max.max(1))
        .prop_map(|users| users.into_iter().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_scalar_values_roundtrip_cbor(value in arb_scalar_value()) {
            let kind = match &value {
                FieldValue::Bool(_) => FieldKind::BOOL,
                FieldValue::Int(_) => FieldKind::INT,
                FieldValue::Float(_) => FieldKind::FLOAT,
                FieldValue::Bytes(_) => FieldKind::BYTES,
                FieldValue::DateTime(_) => FieldKind::DATETIME,
                _ => FieldKind::STRING,
            };
            let raw = value.to_cbor().unwrap();
            prop_assert_eq!(FieldValue::from_cbor(&raw, kind).unwrap(), value);
        }

        #[test]
        fn prop_users_have_distinct_names(users in arb_users(8)) {
            let mut names: Vec<_> = users.iter().map(|(n, _)| n.clone()).collect();
            names.dedup();
            prop_assert_eq!(names.len(), users.len());
        }
    }
}
