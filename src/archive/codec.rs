//! Self-describing byte codec for the `valueObject` row column.
//!
//! URI values are framed as `'R' <len:u8> <utf8>`, record entries as
//! `'O' <len:u8> <property utf8> <encoded child>` appended in order.
//! Every other leading byte is a type tag of the scalar scheme below.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use super::errors::Error;
use crate::model::{Record, Uri, Value};

const TAG_URI: u8 = b'R';
const TAG_RECORD: u8 = b'O';
const TAG_INT: u8 = b'I';
const TAG_LONG: u8 = b'L';
const TAG_FLOAT: u8 = b'F';
const TAG_DOUBLE: u8 = b'D';
const TAG_STRING: u8 = b'S';
const TAG_BOOL: u8 = b'B';
const TAG_SHORT: u8 = b'H';
const TAG_BIG_INT: u8 = b'G';
const TAG_BIG_DECIMAL: u8 = b'E';

pub fn encode_value(value: &Value) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        Value::Record(record) => {
            for (property, child) in record.entries() {
                out.push(TAG_RECORD);
                push_short_str(property.as_str(), out)?;
                encode_into(child, out)?;
            }
        }
        Value::Uri(uri) => {
            out.push(TAG_URI);
            push_short_str(uri.as_str(), out)?;
        }
        Value::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Long(v) => {
            out.push(TAG_LONG);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::String(v) => {
            out.push(TAG_STRING);
            push_long_bytes(v.as_bytes(), out)?;
        }
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Value::Short(v) => {
            out.push(TAG_SHORT);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::BigInt(v) => {
            out.push(TAG_BIG_INT);
            push_long_bytes(&v.to_signed_bytes_be(), out)?;
        }
        Value::BigDecimal(v) => {
            let (unscaled, scale) = v.as_bigint_and_exponent();
            let scale = i32::try_from(scale)
                .map_err(|_| Error::ValueEncoding(format!("decimal scale {} out of range", scale)))?;
            out.push(TAG_BIG_DECIMAL);
            out.extend_from_slice(&scale.to_be_bytes());
            push_long_bytes(&unscaled.to_signed_bytes_be(), out)?;
        }
    }
    Ok(())
}

fn push_short_str(s: &str, out: &mut Vec<u8>) -> Result<(), Error> {
    let bytes = s.as_bytes();
    if bytes.len() > u8::MAX as usize {
        return Err(Error::ValueEncoding(format!(
            "URI exceeds {} bytes: {}",
            u8::MAX,
            s
        )));
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

fn push_long_bytes(bytes: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::ValueEncoding("payload exceeds u32 length".to_string()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

pub fn decode_value(bytes: &[u8]) -> Result<Value, Error> {
    let mut cursor = Cursor { buf: bytes, pos: 0 };
    decode_one(&mut cursor)
}

fn decode_one(cursor: &mut Cursor<'_>) -> Result<Value, Error> {
    match cursor.peek() {
        Some(TAG_URI) => {
            cursor.advance(1);
            Ok(Value::Uri(Uri::new(cursor.take_short_str()?)))
        }
        Some(TAG_RECORD) => {
            let mut record = Record::new();
            while cursor.peek() == Some(TAG_RECORD) {
                cursor.advance(1);
                let property = Uri::new(cursor.take_short_str()?);
                let child = decode_one(cursor)?;
                record.append(property, child);
            }
            Ok(Value::Record(record))
        }
        Some(TAG_INT) => {
            cursor.advance(1);
            Ok(Value::Int(i32::from_be_bytes(cursor.take_array()?)))
        }
        Some(TAG_LONG) => {
            cursor.advance(1);
            Ok(Value::Long(i64::from_be_bytes(cursor.take_array()?)))
        }
        Some(TAG_FLOAT) => {
            cursor.advance(1);
            Ok(Value::Float(f32::from_be_bytes(cursor.take_array()?)))
        }
        Some(TAG_DOUBLE) => {
            cursor.advance(1);
            Ok(Value::Double(f64::from_be_bytes(cursor.take_array()?)))
        }
        Some(TAG_STRING) => {
            cursor.advance(1);
            let bytes = cursor.take_long_bytes()?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| Error::ValueDecoding(format!("invalid UTF-8 string: {}", e)))?;
            Ok(Value::String(s.to_string()))
        }
        Some(TAG_BOOL) => {
            cursor.advance(1);
            match cursor.take(1)?[0] {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(Error::ValueDecoding(format!("invalid bool byte {}", other))),
            }
        }
        Some(TAG_SHORT) => {
            cursor.advance(1);
            Ok(Value::Short(i16::from_be_bytes(cursor.take_array()?)))
        }
        Some(TAG_BIG_INT) => {
            cursor.advance(1);
            let bytes = cursor.take_long_bytes()?;
            Ok(Value::BigInt(BigInt::from_signed_bytes_be(bytes)))
        }
        Some(TAG_BIG_DECIMAL) => {
            cursor.advance(1);
            let scale = i32::from_be_bytes(cursor.take_array()?);
            let bytes = cursor.take_long_bytes()?;
            let unscaled = BigInt::from_signed_bytes_be(bytes);
            Ok(Value::BigDecimal(BigDecimal::new(unscaled, scale as i64)))
        }
        Some(tag) => Err(Error::ValueDecoding(format!("unknown value tag 0x{:02x}", tag))),
        None => Err(Error::ValueDecoding("empty value payload".to_string())),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.buf.len() {
            return Err(Error::ValueDecoding("truncated value payload".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_short_str(&mut self) -> Result<&'a str, Error> {
        let len = self.take(1)?[0] as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::ValueDecoding(format!("invalid UTF-8 URI: {}", e)))
    }

    fn take_long_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn round_trip(value: Value) {
        let encoded = encode_value(&value).unwrap();
        assert_eq!(decode_value(&encoded).unwrap(), value);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Int(-42));
        round_trip(Value::Long(1_529_592_952_925));
        round_trip(Value::Float(2.5));
        round_trip(Value::Double(-0.125));
        round_trip(Value::String("hello, world".to_string()));
        round_trip(Value::String(String::new()));
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Short(-300));
        round_trip(Value::BigInt(
            BigInt::from_str("123456789012345678901234567890").unwrap(),
        ));
        round_trip(Value::BigDecimal(
            BigDecimal::from_str("-1234.56789").unwrap(),
        ));
    }

    #[test]
    fn uri_round_trip() {
        round_trip(Value::Uri(Uri::new("http://example.org/sensor/1")));
    }

    #[test]
    fn record_round_trip_preserves_order_and_duplicates() {
        let mut record = Record::new();
        record.append(Uri::new("http://example.org/b"), Value::Int(2));
        record.append(Uri::new("http://example.org/a"), Value::Int(1));
        record.append(Uri::new("http://example.org/b"), Value::Int(3));
        round_trip(Value::Record(record));
    }

    #[test]
    fn nested_record_round_trip() {
        let mut inner = Record::new();
        inner.append(
            Uri::new("http://example.org/unit"),
            Value::Uri(Uri::new("http://example.org/celsius")),
        );
        inner.append(Uri::new("http://example.org/reading"), Value::Double(21.5));
        let mut outer = Record::new();
        outer.append(Uri::new("http://example.org/value"), Value::Record(inner));
        round_trip(Value::Record(outer));
    }

    #[test]
    fn overlong_uri_fails_encoding() {
        let uri = Uri::new(format!("http://example.org/{}", "x".repeat(300)));
        let err = encode_value(&Value::Uri(uri)).unwrap_err();
        assert!(matches!(err, Error::ValueEncoding(_)));
    }

    #[test]
    fn overlong_record_property_fails_encoding() {
        let mut record = Record::new();
        record.append(
            Uri::new(format!("http://example.org/{}", "p".repeat(300))),
            Value::Int(1),
        );
        let err = encode_value(&Value::Record(record)).unwrap_err();
        assert!(matches!(err, Error::ValueEncoding(_)));
    }

    #[test]
    fn unknown_tag_fails_decoding() {
        let err = decode_value(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::ValueDecoding(_)));
    }

    #[test]
    fn truncated_payload_fails_decoding() {
        let encoded = encode_value(&Value::Long(7)).unwrap();
        let err = decode_value(&encoded[..4]).unwrap_err();
        assert!(matches!(err, Error::ValueDecoding(_)));
    }
}
