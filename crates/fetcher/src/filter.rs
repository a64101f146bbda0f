//! Compiled per-field filter conditions.
//!
//! A [`Filter`] maps a field position in the collection's field list to one
//! operator/operand pair. Conditions on different fields are conjunctive.

use std::{collections::BTreeMap, fmt, str::FromStr};

use docshard_types::{CollectionDescription, FieldValue};

use crate::error::{FetchError, Result};

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `_eq`
    Eq,
    /// `_ne`
    Ne,
    /// `_gt`
    Gt,
    /// `_ge`
    Ge,
    /// `_lt`
    Lt,
    /// `_le`
    Le,
    /// `_in`: operand is an array.
    In,
    /// `_nin`: operand is an array.
    Nin,
    /// `_like`
    Like,
    /// `_nlike`
    NLike,
    /// `_ilike`: case-insensitive `_like`.
    ILike,
    /// `_nilike`: case-insensitive `_nlike`.
    NILike,
}

impl FilterOp {
    /// Every operator, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Ge,
        Self::Lt,
        Self::Le,
        Self::In,
        Self::Nin,
        Self::Like,
        Self::NLike,
        Self::ILike,
        Self::NILike,
    ];

    /// The operator's wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "_eq",
            Self::Ne => "_ne",
            Self::Gt => "_gt",
            Self::Ge => "_ge",
            Self::Lt => "_lt",
            Self::Le => "_le",
            Self::In => "_in",
            Self::Nin => "_nin",
            Self::Like => "_like",
            Self::NLike => "_nlike",
            Self::ILike => "_ilike",
            Self::NILike => "_nilike",
        }
    }

    /// Returns true for the pattern operators.
    pub const fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::NLike | Self::ILike | Self::NILike)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| FetchError::UnsupportedOperator { op: s.to_string() })
    }
}

/// One operator/operand pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Operator.
    pub op: FilterOp,
    /// Operand. An array for `_in` / `_nin`.
    pub value: FieldValue,
}

impl Condition {
    /// Creates a condition.
    pub fn new(op: FilterOp, value: impl Into<FieldValue>) -> Self {
        Self { op, value: value.into() }
    }
}

/// Conjunction of per-field conditions keyed by field position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: BTreeMap<usize, Condition>,
}

impl Filter {
    /// An empty filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition on the field at `position`, replacing any existing one.
    pub fn with(mut self, position: usize, condition: Condition) -> Self {
        self.conditions.insert(position, condition);
        self
    }

    /// Adds a condition on the named field of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UnsupportedOperator`] for an unknown operator
    /// name, or [`FetchError::InvalidFilterValue`] for an unknown field.
    pub fn on(
        self,
        collection: &CollectionDescription,
        field: &str,
        op: &str,
        value: impl Into<FieldValue>,
    ) -> Result<Self> {
        let op: FilterOp = op.parse()?;
        let position = collection.position_of(field).ok_or_else(|| {
            FetchError::InvalidFilterValue {
                op: op.as_str(),
                reason: format!("collection {:?} has no field {field:?}", collection.name),
            }
        })?;
        Ok(self.with(position, Condition::new(op, value)))
    }

    /// The condition on the field at `position`.
    pub fn get(&self, position: usize) -> Option<&Condition> {
        self.conditions.get(&position)
    }

    /// Conditions in field-position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Condition)> {
        self.conditions.iter().map(|(p, c)| (*p, c))
    }

    /// Returns true if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Number of constrained fields.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Splits into the conditions on `positions` and the rest.
    pub fn split(&self, positions: &[usize]) -> (Filter, Filter) {
        let (selected, rest) =
            self.conditions.iter().partition::<BTreeMap<_, _>, _>(|(p, _)| positions.contains(*p));
        let into = |m: BTreeMap<&usize, &Condition>| Filter {
            conditions: m.into_iter().map(|(p, c)| (*p, c.clone())).collect(),
        };
        (into(selected), into(rest))
    }

    /// Checks every position against `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UnknownFieldPosition`] for a position outside the
    /// field list.
    pub fn validate(&self, collection: &CollectionDescription) -> Result<()> {
        match self.conditions.keys().find(|p| collection.field_at(**p).is_none()) {
            Some(position) => Err(FetchError::UnknownFieldPosition { position: *position }),
            None => Ok(()),
        }
    }
}
