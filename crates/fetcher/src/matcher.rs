//! Typed value matchers evaluating filter conditions in-process.
//!
//! A matcher is compiled once per condition and then evaluated against every
//! candidate value, whether it comes from an index key or from decoded
//! primary data. A stored null never satisfies a comparison, range or
//! pattern matcher.

use chrono::{DateTime, Utc};
use docshard_types::{FieldKind, FieldValue, ScalarKind};

use crate::{
    error::{FetchError, Result},
    filter::{Condition, FilterOp},
};

/// Converts an operand to the representation stored for `kind`, so that
/// its key encoding matches stored entries.
pub(crate) fn coerce_operand(value: FieldValue, kind: FieldKind) -> FieldValue {
    match (value, kind) {
        (FieldValue::Array(values), _) => {
            FieldValue::Array(values.into_iter().map(|v| coerce_operand(v, kind)).collect())
        },
        (FieldValue::Float(f), FieldKind::Scalar(ScalarKind::Int))
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
        {
            FieldValue::Int(f as i64)
        },
        (FieldValue::Int(i), FieldKind::Scalar(ScalarKind::Float)) => FieldValue::Float(i as f64),
        (value, _) => value,
    }
}

/// Matcher for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueMatcher {
    /// No constraint.
    Any,
    /// Null operand: accepts nulls when `match_nil`, non-nulls otherwise.
    Nil {
        /// Whether stored nulls are accepted.
        match_nil: bool,
    },
    /// Integer operand.
    Int {
        /// Comparison operator.
        op: FilterOp,
        /// Operand.
        value: i64,
    },
    /// Float operand.
    Float {
        /// Comparison operator.
        op: FilterOp,
        /// Operand.
        value: f64,
    },
    /// String operand.
    String {
        /// Comparison operator.
        op: FilterOp,
        /// Operand.
        value: String,
    },
    /// Date/time operand.
    DateTime {
        /// Comparison operator.
        op: FilterOp,
        /// Operand.
        value: DateTime<Utc>,
    },
    /// Boolean operand; only equality and inequality.
    Bool {
        /// Operand.
        value: bool,
        /// `_eq` when true, `_ne` when false.
        is_eq: bool,
    },
    /// Set membership.
    InArray {
        /// Candidate values.
        values: Vec<FieldValue>,
        /// `_in` when true, `_nin` when false.
        is_in: bool,
    },
    /// Pattern match.
    Like(LikeMatcher),
}

impl ValueMatcher {
    /// Compiles a matcher for an optional condition. `None` yields [`ValueMatcher::Any`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidFilterValue`] if the operand does not fit
    /// the operator.
    pub fn compile(condition: Option<&Condition>) -> Result<Self> {
        let Some(Condition { op, value }) = condition else {
            return Ok(Self::Any);
        };
        let op = *op;
        if value.is_null() {
            return Ok(Self::Nil { match_nil: op == FilterOp::Eq });
        }
        match op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
                match value {
                    FieldValue::Int(v) => Ok(Self::Int { op, value: *v }),
                    FieldValue::Float(v) => Ok(Self::Float { op, value: *v }),
                    FieldValue::String(v) => Ok(Self::String { op, value: v.clone() }),
                    FieldValue::DateTime(v) => Ok(Self::DateTime { op, value: *v }),
                    FieldValue::Bool(v) if matches!(op, FilterOp::Eq | FilterOp::Ne) => {
                        Ok(Self::Bool { value: *v, is_eq: op == FilterOp::Eq })
                    },
                    other => Err(FetchError::InvalidFilterValue {
                        op: op.as_str(),
                        reason: format!("{} operand is not comparable", other.type_name()),
                    }),
                }
            },
            FilterOp::In | FilterOp::Nin => match value {
                FieldValue::Array(values) => {
                    Ok(Self::InArray { values: values.clone(), is_in: op == FilterOp::In })
                },
                other => Err(FetchError::InvalidFilterValue {
                    op: op.as_str(),
                    reason: format!("expected an array operand, got {}", other.type_name()),
                }),
            },
            FilterOp::Like | FilterOp::NLike | FilterOp::ILike | FilterOp::NILike => match value {
                FieldValue::String(pattern) => Ok(Self::Like(LikeMatcher::new(
                    pattern,
                    matches!(op, FilterOp::Like | FilterOp::ILike),
                    matches!(op, FilterOp::ILike | FilterOp::NILike),
                ))),
                other => Err(FetchError::InvalidFilterValue {
                    op: op.as_str(),
                    reason: format!("expected a string pattern, got {}", other.type_name()),
                }),
            },
        }
    }

    /// Compiles a matcher for a condition on a field of `kind`, first
    /// converting the operand to the representation stored for that kind.
    ///
    /// # Errors
    ///
    /// Same as [`ValueMatcher::compile`].
    pub fn compile_for(condition: Option<&Condition>, kind: FieldKind) -> Result<Self> {
        let coerced =
            condition.map(|c| Condition { op: c.op, value: coerce_operand(c.value.clone(), kind) });
        Self::compile(coerced.as_ref())
    }

    /// Returns true for the permissive matcher.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Evaluates the matcher against a stored value.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidFilterValue`] if the stored value cannot
    /// be compared with the operand.
    pub fn matches(&self, stored: &FieldValue) -> Result<bool> {
        match self {
            Self::Any => Ok(true),
            Self::Nil { match_nil } => Ok(stored.is_null() == *match_nil),
            Self::InArray { values, is_in } => {
                let found = values.iter().any(|v| v.normalized_eq(stored));
                Ok(found == *is_in)
            },
            _ if stored.is_null() => Ok(false),
            Self::Int { op, value } => match stored {
                FieldValue::Int(v) => Ok(compare(*op, v, value)),
                FieldValue::Float(v) => Ok(compare(*op, v, &(*value as f64))),
                other => mismatch(*op, "int", other),
            },
            Self::Float { op, value } => match stored.as_f64() {
                Some(v) => Ok(compare(*op, &v, value)),
                None => mismatch(*op, "float", stored),
            },
            Self::String { op, value } => match stored {
                FieldValue::String(v) => Ok(compare(*op, v, value)),
                other => mismatch(*op, "string", other),
            },
            Self::DateTime { op, value } => match stored {
                FieldValue::DateTime(v) => Ok(compare(*op, v, value)),
                other => mismatch(*op, "datetime", other),
            },
            Self::Bool { value, is_eq } => {
                let stored_bool = match stored {
                    FieldValue::Bool(b) => *b,
                    FieldValue::Int(i) => *i != 0,
                    other => return mismatch(FilterOp::Eq, "bool", other),
                };
                Ok((stored_bool == *value) == *is_eq)
            },
            Self::Like(like) => match stored {
                FieldValue::String(v) => Ok(like.matches(v)),
                other => mismatch(FilterOp::Like, "string", other),
            },
        }
    }
}

fn compare<T: PartialOrd + ?Sized>(op: FilterOp, stored: &T, operand: &T) -> bool {
    match op {
        FilterOp::Eq => stored == operand,
        FilterOp::Ne => stored != operand,
        FilterOp::Gt => stored > operand,
        FilterOp::Ge => stored >= operand,
        FilterOp::Lt => stored < operand,
        FilterOp::Le => stored <= operand,
        _ => false,
    }
}

fn mismatch(op: FilterOp, operand: &str, stored: &FieldValue) -> Result<bool> {
    Err(FetchError::InvalidFilterValue {
        op: op.as_str(),
        reason: format!("cannot compare stored {} with {operand} operand", stored.type_name()),
    })
}

/// Pattern matcher for `_like` and its variants.
///
/// `%` is recognized as a single leading wildcard (suffix match), a single
/// trailing wildcard (prefix match), both (substring match), or exactly one
/// interior wildcard (prefix and suffix match). Any other pattern is compared
/// literally, including patterns with several interior wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeMatcher {
    leading_wildcard: bool,
    trailing_wildcard: bool,
    start_and_end: Option<(String, String)>,
    value: String,
    is_like: bool,
    case_insensitive: bool,
}

impl LikeMatcher {
    /// Compiles `pattern`. `is_like` is false for the negated operators.
    pub fn new(pattern: &str, is_like: bool, case_insensitive: bool) -> Self {
        let folded;
        let mut value = if case_insensitive {
            folded = pattern.to_lowercase();
            folded.as_str()
        } else {
            pattern
        };
        let mut leading_wildcard = false;
        let mut trailing_wildcard = false;
        let mut start_and_end = None;
        if value.len() >= 2 {
            if let Some(rest) = value.strip_prefix('%') {
                leading_wildcard = true;
                value = rest;
            }
            if let Some(rest) = value.strip_suffix('%') {
                trailing_wildcard = true;
                value = rest;
            }
            if !leading_wildcard && !trailing_wildcard {
                let parts: Vec<&str> = value.split('%').collect();
                if let [start, end] = parts.as_slice() {
                    start_and_end = Some((start.to_string(), end.to_string()));
                }
            }
        }
        Self {
            leading_wildcard,
            trailing_wildcard,
            start_and_end,
            value: value.to_string(),
            is_like,
            case_insensitive,
        }
    }

    /// Evaluates the pattern against `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        let folded;
        let candidate = if self.case_insensitive {
            folded = candidate.to_lowercase();
            folded.as_str()
        } else {
            candidate
        };
        let hit = match (&self.start_and_end, self.leading_wildcard, self.trailing_wildcard) {
            (_, true, true) => candidate.contains(self.value.as_str()),
            (_, true, false) => candidate.ends_with(self.value.as_str()),
            (_, false, true) => candidate.starts_with(self.value.as_str()),
            (Some((start, end)), false, false) => {
                candidate.len() >= start.len() + end.len()
                    && candidate.starts_with(start.as_str())
                    && candidate.ends_with(end.as_str())
            },
            (None, false, false) => candidate == self.value,
        };
        hit == self.is_like
    }
}

/// Evaluates `matchers[i]` against `values[i]` for every pair.
///
/// # Errors
///
/// Propagates the first matcher error.
pub fn match_all(matchers: &[ValueMatcher], values: &[FieldValue]) -> Result<bool> {
    for (matcher, value) in matchers.iter().zip(values) {
        if !matcher.matches(value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn matcher(op: FilterOp, value: impl Into<FieldValue>) -> ValueMatcher {
        ValueMatcher::compile(Some(&Condition::new(op, value))).unwrap()
    }

    fn like(pattern: &str, candidate: &str) -> bool {
        matcher(FilterOp::Like, pattern).matches(&FieldValue::from(candidate)).unwrap()
    }

    #[test]
    fn test_no_condition_is_any() {
        let m = ValueMatcher::compile(None).unwrap();
        assert!(m.is_any());
        assert!(m.matches(&FieldValue::Null).unwrap());
    }

    #[test]
    fn test_int_comparisons() {
        let stored = FieldValue::Int(27);
        assert!(matcher(FilterOp::Gt, 21i64).matches(&stored).unwrap());
        assert!(matcher(FilterOp::Ge, 27i64).matches(&stored).unwrap());
        assert!(!matcher(FilterOp::Lt, 27i64).matches(&stored).unwrap());
        assert!(matcher(FilterOp::Le, 27i64).matches(&stored).unwrap());
        assert!(matcher(FilterOp::Ne, 21i64).matches(&stored).unwrap());
        assert!(!matcher(FilterOp::Eq, 21i64).matches(&stored).unwrap());
    }

    #[test]
    fn test_coerce_operand() {
        assert_eq!(coerce_operand(FieldValue::Float(21.0), FieldKind::INT), FieldValue::Int(21));
        assert_eq!(coerce_operand(FieldValue::Float(21.5), FieldKind::INT), FieldValue::Float(21.5));
        assert_eq!(coerce_operand(FieldValue::Int(2), FieldKind::FLOAT), FieldValue::Float(2.0));
        assert_eq!(
            coerce_operand(FieldValue::Array(vec![FieldValue::Float(1.0)]), FieldKind::INT),
            FieldValue::Array(vec![FieldValue::Int(1)])
        );
    }

    #[test]
    fn test_compile_for_coerces_to_field_kind() {
        let eq = Condition::new(FilterOp::Eq, 27.0);
        assert_eq!(
            ValueMatcher::compile_for(Some(&eq), FieldKind::INT).unwrap(),
            ValueMatcher::Int { op: FilterOp::Eq, value: 27 }
        );
        let set = Condition::new(FilterOp::In, FieldValue::Array(vec![FieldValue::Float(21.0)]));
        assert_eq!(
            ValueMatcher::compile_for(Some(&set), FieldKind::INT).unwrap(),
            ValueMatcher::InArray { values: vec![FieldValue::Int(21)], is_in: true }
        );
        assert!(ValueMatcher::compile_for(None, FieldKind::INT).unwrap().is_any());
    }

    #[test]
    fn test_numeric_representations_compare_by_value() {
        assert!(matcher(FilterOp::Eq, 27.0).matches(&FieldValue::Int(27)).unwrap());
        assert!(matcher(FilterOp::Lt, 28i64).matches(&FieldValue::Float(27.5)).unwrap());
    }

    #[test]
    fn test_stored_null_fails_comparisons() {
        for op in [FilterOp::Eq, FilterOp::Ne, FilterOp::Gt, FilterOp::Lt] {
            assert!(!matcher(op, 1i64).matches(&FieldValue::Null).unwrap(), "{op}");
        }
        assert!(!matcher(FilterOp::Like, "%a%").matches(&FieldValue::Null).unwrap());
    }

    #[test]
    fn test_nil_operand() {
        let eq_nil = matcher(FilterOp::Eq, FieldValue::Null);
        assert!(eq_nil.matches(&FieldValue::Null).unwrap());
        assert!(!eq_nil.matches(&FieldValue::Int(0)).unwrap());
        let ne_nil = matcher(FilterOp::Ne, FieldValue::Null);
        assert!(ne_nil.matches(&FieldValue::Int(0)).unwrap());
        assert!(!ne_nil.matches(&FieldValue::Null).unwrap());
    }

    #[test]
    fn test_string_and_datetime() {
        assert!(matcher(FilterOp::Lt, "Bob").matches(&FieldValue::from("Alice")).unwrap());
        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert!(matcher(FilterOp::Gt, early).matches(&FieldValue::DateTime(late)).unwrap());
        assert!(!matcher(FilterOp::Eq, early).matches(&FieldValue::DateTime(late)).unwrap());
    }

    #[test]
    fn test_bool_equality_only() {
        assert!(matcher(FilterOp::Eq, true).matches(&FieldValue::Bool(true)).unwrap());
        assert!(matcher(FilterOp::Ne, true).matches(&FieldValue::Bool(false)).unwrap());
        assert!(matcher(FilterOp::Eq, true).matches(&FieldValue::Int(1)).unwrap());
        assert!(ValueMatcher::compile(Some(&Condition::new(FilterOp::Gt, true))).is_err());
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let err = matcher(FilterOp::Eq, "x").matches(&FieldValue::Int(1)).unwrap_err();
        assert!(matches!(err, FetchError::InvalidFilterValue { op: "_eq", .. }));
    }

    #[test]
    fn test_in_requires_array() {
        assert!(ValueMatcher::compile(Some(&Condition::new(FilterOp::In, 1i64))).is_err());
        assert!(ValueMatcher::compile(Some(&Condition::new(FilterOp::Like, 1i64))).is_err());
    }

    #[test]
    fn test_in_normalizes_numbers() {
        let m = matcher(FilterOp::In, FieldValue::Array(vec![FieldValue::Float(21.0)]));
        assert!(m.matches(&FieldValue::Int(21)).unwrap());
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like("%ice", "Alice"));
        assert!(!like("%ice", "Icecream"));
        assert!(like("Al%", "Alice"));
        assert!(!like("Al%", "Sal"));
        assert!(like("%lic%", "Alice"));
        assert!(!like("%lix%", "Alice"));
        assert!(like("A%e", "Alice"));
        assert!(!like("A%e", "Alicia"));
        assert!(like("Alice", "Alice"));
        assert!(!like("Alice", "alice"));
    }

    #[test]
    fn test_like_interior_wildcard_does_not_overlap() {
        assert!(!like("ab%ba", "aba"));
        assert!(like("ab%ba", "abba"));
    }

    #[test]
    fn test_like_single_char_pattern_is_literal() {
        assert!(like("%", "%"));
        assert!(!like("%", "anything"));
        assert!(like("%%", "anything"));
    }

    // Known limitation: patterns with more than one interior wildcard are
    // compared literally rather than as globs.
    #[test]
    fn test_like_multiple_interior_wildcards_are_literal() {
        assert!(!like("a%b%c", "abc"));
        assert!(!like("a%b%c", "axxbxxc"));
        assert!(like("a%b%c", "a%b%c"));
    }

    #[test]
    fn test_negated_and_case_insensitive_like() {
        let s = FieldValue::from("Alice");
        assert!(!matcher(FilterOp::NLike, "%ice").matches(&s).unwrap());
        assert!(matcher(FilterOp::NLike, "%bob").matches(&s).unwrap());
        assert!(matcher(FilterOp::ILike, "AL%").matches(&s).unwrap());
        assert!(matcher(FilterOp::ILike, "a%E").matches(&s).unwrap());
        assert!(!matcher(FilterOp::NILike, "%ICE").matches(&s).unwrap());
    }

    #[test]
    fn test_match_all() {
        let matchers = vec![ValueMatcher::Any, matcher(FilterOp::Gt, 21i64)];
        assert!(match_all(&matchers, &[FieldValue::from("x"), FieldValue::Int(27)]).unwrap());
        assert!(!match_all(&matchers, &[FieldValue::from("x"), FieldValue::Int(21)]).unwrap());
    }

    proptest! {
        #[test]
        fn prop_in_and_nin_are_complements(
            set in proptest::collection::vec(-5i64..5, 0..4),
            candidate in -6i64..6,
        ) {
            let values = FieldValue::Array(set.into_iter().map(FieldValue::Int).collect());
            let stored = FieldValue::Int(candidate);
            let is_in = matcher(FilterOp::In, values.clone()).matches(&stored).unwrap();
            let not_in = matcher(FilterOp::Nin, values).matches(&stored).unwrap();
            prop_assert_ne!(is_in, not_in);
        }

        #[test]
        fn prop_like_and_nlike_are_complements(pattern in "%?[a-c]{0,3}%?", candidate in "[a-c]{0,5}") {
            let s = FieldValue::from(candidate.as_str());
            let hit = matcher(FilterOp::Like, pattern.as_str()).matches(&s).unwrap();
            let miss = matcher(FilterOp::NLike, pattern.as_str()).matches(&s).unwrap();
            prop_assert_ne!(hit, miss);
        }
    }
}
