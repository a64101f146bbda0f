//! Typed field values and their CBOR representation.
//!
//! Primary data stores every field value as a CBOR item. Decoding is
//! kind-aware: the CBOR item is normalized to the declared [`FieldKind`], so a
//! float stored under an integer field decodes as an integer (truncating) and
//! an integer stored under a float field decodes as a float.

use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::Value as Cbor;
use snafu::{ResultExt, Snafu};

use crate::schema::{FieldKind, ScalarKind};

/// IANA CBOR tag for RFC 3339 date/time strings.
const CBOR_TAG_DATETIME: u64 = 0;

/// Errors from encoding or decoding field values.
#[derive(Debug, Snafu)]
pub enum ValueError {
    /// CBOR serialization failed.
    #[snafu(display("CBOR encoding failed: {source}"))]
    CborEncode {
        /// The underlying ciborium error.
        source: ciborium::ser::Error<std::io::Error>,
    },

    /// The raw bytes are not a well-formed CBOR item.
    #[snafu(display("CBOR decoding failed: {source}"))]
    CborDecode {
        /// The underlying ciborium error.
        source: ciborium::de::Error<std::io::Error>,
    },

    /// The CBOR item cannot represent a value of the declared kind.
    #[snafu(display("Expected {expected}, found {found}"))]
    UnexpectedType {
        /// Kind the field declares.
        expected: String,
        /// Shape of the stored item.
        found: &'static str,
    },

    /// An integer does not fit into 64 bits.
    #[snafu(display("Integer {value} out of range"))]
    IntegerOverflow {
        /// The offending value.
        value: i128,
    },

    /// A date/time string is not valid RFC 3339.
    #[snafu(display("Invalid date/time {input:?}: {source}"))]
    InvalidDateTime {
        /// The text that failed to parse.
        input: String,
        /// The underlying parse error.
        source: chrono::ParseError,
    },
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent or explicitly null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// UTF-8 text; also used for document IDs and object references.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Array of scalars.
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns true for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the numeric value widened to `f64`, if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::DateTime(_) => "datetime",
            Self::Array(_) => "array",
        }
    }

    /// Equality that treats integers and floats with the same numeric value
    /// as equal, recursing into arrays.
    pub fn normalized_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.normalized_eq(y))
            },
            _ => self == other,
        }
    }

    /// Converts this value to a CBOR item.
    pub fn to_cbor_value(&self) -> Cbor {
        match self {
            Self::Null => Cbor::Null,
            Self::Bool(b) => Cbor::Bool(*b),
            Self::Int(i) => Cbor::Integer((*i).into()),
            Self::Float(f) => Cbor::Float(*f),
            Self::String(s) => Cbor::Text(s.clone()),
            Self::Bytes(b) => Cbor::Bytes(b.clone()),
            Self::DateTime(dt) => Cbor::Tag(
                CBOR_TAG_DATETIME,
                Box::new(Cbor::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            ),
            Self::Array(items) => Cbor::Array(items.iter().map(Self::to_cbor_value).collect()),
        }
    }

    /// Encodes this value as CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::CborEncode`] if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, ValueError> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.to_cbor_value(), &mut buf).context(CborEncodeSnafu)?;
        Ok(buf)
    }

    /// Decodes CBOR bytes as a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::CborDecode`] for malformed bytes and
    /// [`ValueError::UnexpectedType`] when the item does not fit `kind`.
    pub fn from_cbor(raw: &[u8], kind: FieldKind) -> Result<Self, ValueError> {
        let item: Cbor = ciborium::from_reader(raw).context(CborDecodeSnafu)?;
        Self::from_cbor_value(item, kind)
    }

    /// Normalizes an already parsed CBOR item to `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UnexpectedType`] when the item does not fit `kind`.
    pub fn from_cbor_value(item: Cbor, kind: FieldKind) -> Result<Self, ValueError> {
        if item.is_null() {
            if kind.is_nillable() {
                return Ok(Self::Null);
            }
            return UnexpectedTypeSnafu { expected: format!("{kind:?}"), found: "null" }.fail();
        }
        match kind {
            FieldKind::Scalar(scalar) => decode_scalar(item, scalar),
            FieldKind::Array { element, nillable_elements } => {
                let Cbor::Array(items) = item else {
                    return UnexpectedTypeSnafu {
                        expected: format!("{kind:?}"),
                        found: cbor_shape(&item),
                    }
                    .fail();
                };
                items
                    .into_iter()
                    .map(|element_item| {
                        if element_item.is_null() {
                            if nillable_elements {
                                Ok(Self::Null)
                            } else {
                                UnexpectedTypeSnafu {
                                    expected: format!("{element:?}"),
                                    found: "null",
                                }
                                .fail()
                            }
                        } else {
                            decode_scalar(element_item, element)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Array)
            },
            FieldKind::DocId | FieldKind::Object => match item {
                Cbor::Text(s) => Ok(Self::String(s)),
                other => UnexpectedTypeSnafu {
                    expected: format!("{kind:?}"),
                    found: cbor_shape(&other),
                }
                .fail(),
            },
            FieldKind::ObjectArray => {
                UnexpectedTypeSnafu { expected: "stored field", found: cbor_shape(&item) }.fail()
            },
        }
    }
}

fn decode_scalar(item: Cbor, kind: ScalarKind) -> Result<FieldValue, ValueError> {
    match (kind, item) {
        (ScalarKind::Bool, Cbor::Bool(b)) => Ok(FieldValue::Bool(b)),
        (ScalarKind::Int, Cbor::Integer(i)) => {
            let wide = i128::from(i);
            i64::try_from(wide)
                .map(FieldValue::Int)
                .map_err(|_| ValueError::IntegerOverflow { value: wide })
        },
        // Integers written through a float-typed path are truncated back.
        (ScalarKind::Int, Cbor::Float(f)) => Ok(FieldValue::Int(f as i64)),
        (ScalarKind::Float, Cbor::Float(f)) => Ok(FieldValue::Float(f)),
        (ScalarKind::Float, Cbor::Integer(i)) => Ok(FieldValue::Float(i128::from(i) as f64)),
        (ScalarKind::String, Cbor::Text(s)) => Ok(FieldValue::String(s)),
        (ScalarKind::Bytes, Cbor::Bytes(b)) => Ok(FieldValue::Bytes(b)),
        (ScalarKind::DateTime, Cbor::Tag(CBOR_TAG_DATETIME, inner)) => match *inner {
            Cbor::Text(s) => parse_datetime(s),
            other => {
                UnexpectedTypeSnafu { expected: "DateTime", found: cbor_shape(&other) }.fail()
            },
        },
        (ScalarKind::DateTime, Cbor::Text(s)) => parse_datetime(s),
        (kind, other) => {
            UnexpectedTypeSnafu { expected: format!("{kind:?}"), found: cbor_shape(&other) }.fail()
        },
    }
}

fn parse_datetime(input: String) -> Result<FieldValue, ValueError> {
    match DateTime::parse_from_rfc3339(&input) {
        Ok(dt) => Ok(FieldValue::DateTime(dt.with_timezone(&Utc))),
        Err(source) => Err(ValueError::InvalidDateTime { input, source }),
    }
}

fn cbor_shape(item: &Cbor) -> &'static str {
    match item {
        Cbor::Integer(_) => "integer",
        Cbor::Bytes(_) => "bytes",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bool(_) => "bool",
        Cbor::Null => "null",
        Cbor::Tag(..) => "tag",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        _ => "unknown",
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn roundtrip(value: FieldValue, kind: FieldKind) -> FieldValue {
        let raw = value.to_cbor().expect("encode");
        FieldValue::from_cbor(&raw, kind).expect("decode")
    }

    #[test]
    fn test_scalar_roundtrip_per_kind() {
        let dt = Utc.with_ymd_and_hms(2024, 2, 29, 13, 45, 1).unwrap();
        let cases = [
            (FieldValue::Bool(true), FieldKind::BOOL),
            (FieldValue::Int(-42), FieldKind::INT),
            (FieldValue::Float(2.5), FieldKind::FLOAT),
            (FieldValue::from("Alice"), FieldKind::STRING),
            (FieldValue::Bytes(vec![0, 1, 0xFF]), FieldKind::BYTES),
            (FieldValue::DateTime(dt), FieldKind::DATETIME),
            (FieldValue::Null, FieldKind::STRING),
        ];
        for (value, kind) in cases {
            assert_eq!(roundtrip(value.clone(), kind), value, "kind {kind:?}");
        }
    }

    #[test]
    fn test_float_under_int_kind_truncates() {
        let raw = FieldValue::Float(27.9).to_cbor().unwrap();
        assert_eq!(FieldValue::from_cbor(&raw, FieldKind::INT).unwrap(), FieldValue::Int(27));
    }

    #[test]
    fn test_int_under_float_kind_widens() {
        let raw = FieldValue::Int(3).to_cbor().unwrap();
        assert_eq!(FieldValue::from_cbor(&raw, FieldKind::FLOAT).unwrap(), FieldValue::Float(3.0));
    }

    #[test]
    fn test_untagged_datetime_text_is_accepted() {
        let mut raw = Vec::new();
        ciborium::into_writer(&Cbor::Text("2021-07-01T10:00:00Z".into()), &mut raw).unwrap();
        let decoded = FieldValue::from_cbor(&raw, FieldKind::DATETIME).unwrap();
        assert_eq!(
            decoded,
            FieldValue::DateTime(Utc.with_ymd_and_hms(2021, 7, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_datetime_text() {
        let mut raw = Vec::new();
        ciborium::into_writer(&Cbor::Text("yesterday".into()), &mut raw).unwrap();
        let err = FieldValue::from_cbor(&raw, FieldKind::DATETIME).unwrap_err();
        assert!(matches!(err, ValueError::InvalidDateTime { .. }));
    }

    #[test]
    fn test_nillable_array_elements() {
        let kind = FieldKind::Array { element: ScalarKind::Int, nillable_elements: true };
        let value = FieldValue::Array(vec![FieldValue::Int(1), FieldValue::Null]);
        assert_eq!(roundtrip(value.clone(), kind), value);

        let strict = FieldKind::Array { element: ScalarKind::Int, nillable_elements: false };
        let raw = value.to_cbor().unwrap();
        assert!(matches!(
            FieldValue::from_cbor(&raw, strict),
            Err(ValueError::UnexpectedType { found: "null", .. })
        ));
    }

    #[test]
    fn test_array_elements_are_normalized() {
        let kind = FieldKind::Array { element: ScalarKind::Float, nillable_elements: false };
        let raw = FieldValue::Array(vec![FieldValue::Int(1), FieldValue::Float(1.5)])
            .to_cbor()
            .unwrap();
        assert_eq!(
            FieldValue::from_cbor(&raw, kind).unwrap(),
            FieldValue::Array(vec![FieldValue::Float(1.0), FieldValue::Float(1.5)])
        );
    }

    #[test]
    fn test_unexpected_type_reports_shape() {
        let raw = FieldValue::from("x").to_cbor().unwrap();
        let err = FieldValue::from_cbor(&raw, FieldKind::INT).unwrap_err();
        assert_eq!(err.to_string(), "Expected Int, found text");
    }

    #[test]
    fn test_malformed_cbor() {
        let err = FieldValue::from_cbor(&[0xFF, 0x00], FieldKind::INT).unwrap_err();
        assert!(matches!(err, ValueError::CborDecode { .. }));
    }

    #[test]
    fn test_normalized_eq_across_numeric_representations() {
        assert!(FieldValue::Int(5).normalized_eq(&FieldValue::Float(5.0)));
        assert!(!FieldValue::Int(5).normalized_eq(&FieldValue::Float(5.5)));
        assert!(!FieldValue::Int(5).normalized_eq(&FieldValue::from("5")));
    }

    proptest! {
        #[test]
        fn prop_int_roundtrip(v in any::<i64>()) {
            prop_assert_eq!(roundtrip(FieldValue::Int(v), FieldKind::INT), FieldValue::Int(v));
        }

        #[test]
        fn prop_string_roundtrip(s in ".{0,64}") {
            let v = FieldValue::String(s);
            prop_assert_eq!(roundtrip(v.clone(), FieldKind::STRING), v);
        }

        #[test]
        fn prop_finite_float_roundtrip(f in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            prop_assert_eq!(roundtrip(FieldValue::Float(f), FieldKind::FLOAT), FieldValue::Float(f));
        }
    }
}
