//! Order-preserving binary encoding of field values for key components.
//!
//! Each encoded value starts with a one-byte type tag followed by a payload
//! whose lexicographic byte order matches the natural order of the value:
//!
//! | Tag    | Value            | Payload                                       |
//! |--------|------------------|-----------------------------------------------|
//! | `0x01` | null             | none                                          |
//! | `0x02` | false            | none                                          |
//! | `0x03` | true             | none                                          |
//! | `0x10` | int              | i64 with sign bit flipped, big-endian          |
//! | `0x20` | float NaN        | none                                          |
//! | `0x21` | float < 0        | bit pattern inverted, big-endian              |
//! | `0x22` | float zero       | none                                          |
//! | `0x23` | float > 0        | bit pattern, big-endian                       |
//! | `0x30` | string           | escaped bytes, `0x00 0x01` terminator         |
//! | `0x31` | bytes            | escaped bytes, `0x00 0x01` terminator         |
//! | `0x40` | date/time        | sign-flipped seconds, then nanoseconds (u32)  |
//! | `0x50` | array            | encoded elements, `0x00` terminator           |
//!
//! Inside escaped payloads `0x00` is written as `0x00 0xFF`, so no encoding is
//! a prefix of another. Descending components invert every byte, which
//! reverses the order of prefix-free encodings.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use docshard_types::FieldValue;

use crate::error::{Error, Result};

const TAG_NULL: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_TRUE: u8 = 0x03;
const TAG_INT: u8 = 0x10;
const TAG_FLOAT_NAN: u8 = 0x20;
const TAG_FLOAT_NEG: u8 = 0x21;
const TAG_FLOAT_ZERO: u8 = 0x22;
const TAG_FLOAT_POS: u8 = 0x23;
const TAG_STRING: u8 = 0x30;
const TAG_BYTES: u8 = 0x31;
const TAG_DATETIME: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;
const ARRAY_END: u8 = 0x00;

const SIGN_BIT: u64 = 1 << 63;

/// Appends the order-preserving encoding of `value` to `buf`.
pub fn encode_value(buf: &mut Vec<u8>, value: &FieldValue, descending: bool) {
    let start = buf.len();
    encode_ascending(buf, value);
    if descending {
        for byte in &mut buf[start..] {
            *byte = !*byte;
        }
    }
}

fn encode_ascending(buf: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Null => buf.push(TAG_NULL),
        FieldValue::Bool(false) => buf.push(TAG_FALSE),
        FieldValue::Bool(true) => buf.push(TAG_TRUE),
        FieldValue::Int(i) => {
            buf.push(TAG_INT);
            put_u64(buf, (*i as u64) ^ SIGN_BIT);
        },
        FieldValue::Float(f) => {
            if f.is_nan() {
                buf.push(TAG_FLOAT_NAN);
            } else if *f == 0.0 {
                buf.push(TAG_FLOAT_ZERO);
            } else if *f < 0.0 {
                buf.push(TAG_FLOAT_NEG);
                put_u64(buf, !f.to_bits());
            } else {
                buf.push(TAG_FLOAT_POS);
                put_u64(buf, f.to_bits());
            }
        },
        FieldValue::String(s) => {
            buf.push(TAG_STRING);
            encode_escaped(buf, s.as_bytes());
        },
        FieldValue::Bytes(b) => {
            buf.push(TAG_BYTES);
            encode_escaped(buf, b);
        },
        FieldValue::DateTime(dt) => {
            buf.push(TAG_DATETIME);
            put_u64(buf, (dt.timestamp() as u64) ^ SIGN_BIT);
            let mut nanos = [0u8; 4];
            BigEndian::write_u32(&mut nanos, dt.timestamp_subsec_nanos());
            buf.extend_from_slice(&nanos);
        },
        FieldValue::Array(items) => {
            buf.push(TAG_ARRAY);
            for item in items {
                encode_ascending(buf, item);
            }
            buf.push(ARRAY_END);
        },
    }
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    let mut bytes = [0u8; 8];
    BigEndian::write_u64(&mut bytes, v);
    buf.extend_from_slice(&bytes);
}

/// Appends `bytes` in escaped, terminated form.
///
/// Used directly for document identifiers inside keys.
pub fn encode_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == ESCAPE {
            buf.push(ESCAPE);
            buf.push(ESCAPED_NUL);
        } else {
            buf.push(b);
        }
    }
    buf.push(ESCAPE);
    buf.push(TERMINATOR);
}

/// Decodes one escaped, terminated byte string from the front of `input`.
///
/// Returns the bytes and the number of input bytes consumed.
///
/// # Errors
///
/// Returns [`Error::KeyDecoding`] if the input is truncated or contains an
/// invalid escape sequence.
pub fn decode_escaped(input: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut reader = Reader::new(input, false);
    let bytes = reader.escaped()?;
    Ok((bytes, reader.pos))
}

/// Decodes one value from the front of `input`.
///
/// Returns the value and the number of input bytes consumed.
///
/// # Errors
///
/// Returns [`Error::KeyDecoding`] for unknown tags or truncated payloads.
pub fn decode_value(input: &[u8], descending: bool) -> Result<(FieldValue, usize)> {
    let mut reader = Reader::new(input, descending);
    let value = reader.value()?;
    Ok((value, reader.pos))
}

/// Byte cursor that transparently undoes descending inversion.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    mask: u8,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8], descending: bool) -> Self {
        Self { input, pos: 0, mask: if descending { 0xFF } else { 0x00 } }
    }

    fn byte(&mut self) -> Result<u8> {
        let b = self.peek().ok_or_else(|| Error::KeyDecoding {
            reason: format!("unexpected end of key at offset {}", self.pos),
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).map(|b| b ^ self.mask)
    }

    fn u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        for slot in &mut bytes {
            *slot = self.byte()?;
        }
        Ok(BigEndian::read_u64(&bytes))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for slot in &mut bytes {
            *slot = self.byte()?;
        }
        Ok(BigEndian::read_u32(&bytes))
    }

    fn escaped(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.byte()? {
                ESCAPE => match self.byte()? {
                    ESCAPED_NUL => out.push(ESCAPE),
                    TERMINATOR => return Ok(out),
                    other => {
                        return Err(Error::KeyDecoding {
                            reason: format!("invalid escape sequence 0x00 0x{other:02x}"),
                        });
                    },
                },
                b => out.push(b),
            }
        }
    }

    fn value(&mut self) -> Result<FieldValue> {
        let tag = self.byte()?;
        let value = match tag {
            TAG_NULL => FieldValue::Null,
            TAG_FALSE => FieldValue::Bool(false),
            TAG_TRUE => FieldValue::Bool(true),
            TAG_INT => FieldValue::Int((self.u64()? ^ SIGN_BIT) as i64),
            TAG_FLOAT_NAN => FieldValue::Float(f64::NAN),
            TAG_FLOAT_NEG => FieldValue::Float(f64::from_bits(!self.u64()?)),
            TAG_FLOAT_ZERO => FieldValue::Float(0.0),
            TAG_FLOAT_POS => FieldValue::Float(f64::from_bits(self.u64()?)),
            TAG_STRING => {
                let raw = self.escaped()?;
                let s = String::from_utf8(raw).map_err(|e| Error::KeyDecoding {
                    reason: format!("string component is not UTF-8: {e}"),
                })?;
                FieldValue::String(s)
            },
            TAG_BYTES => FieldValue::Bytes(self.escaped()?),
            TAG_DATETIME => {
                let secs = (self.u64()? ^ SIGN_BIT) as i64;
                let nanos = self.u32()?;
                let dt = DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| {
                    Error::KeyDecoding { reason: format!("timestamp {secs}.{nanos} out of range") }
                })?;
                FieldValue::DateTime(dt)
            },
            TAG_ARRAY => {
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(ARRAY_END) {
                        self.pos += 1;
                        break;
                    }
                    items.push(self.value()?);
                }
                FieldValue::Array(items)
            },
            other => {
                return Err(Error::KeyDecoding { reason: format!("unknown value tag 0x{other:02x}") });
            },
        };
        Ok(value)
    }
}
