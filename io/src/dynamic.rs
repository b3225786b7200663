//! The recursive dynamic value exchanged between platform components.
//!
//! `Dynamic` is a closed tagged union: null, boolean, signed and unsigned
//! integers, double, UTF-8 string, array, and string-keyed object. Its
//! wire form is self-describing MessagePack, produced and consumed by the
//! manual [`Encode`]/[`Decode`] impls below, the one place the codec
//! registry's serde default is fully replaced.

use std::collections::BTreeMap;
use std::io;

use rmp::encode::ValueWriteError;

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};

/// A dynamically typed value with exactly one active variant.
///
/// Containers hold `Dynamic` recursively; construction is strictly
/// bottom-up, so no cycles are possible. The object container keeps its
/// keys ordered, and that order is preserved on encode.
#[derive(Debug, Clone)]
pub enum Dynamic {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Array(Vec<Dynamic>),
    Object(BTreeMap<String, Dynamic>),
}

impl Default for Dynamic {
    fn default() -> Self {
        Dynamic::Null
    }
}

/// Structural equality. `Int` and `Uint` compare by numeric value, since
/// the wire format chooses the integer tag by sign: a non-negative `Int`
/// comes back as `Uint`, and round-tripping must still compare equal.
impl PartialEq for Dynamic {
    fn eq(&self, other: &Dynamic) -> bool {
        use Dynamic::*;

        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Int(a), Uint(b)) | (Uint(b), Int(a)) => *a >= 0 && *a as u64 == *b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Dynamic {
    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Dynamic::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The signed integer value, widening a `Uint` that fits.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Dynamic::Int(value) => Some(*value),
            Dynamic::Uint(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// The unsigned integer value, accepting a non-negative `Int`.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Dynamic::Uint(value) => Some(*value),
            Dynamic::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// The numeric value as a double, widening either integer variant.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Dynamic::Double(value) => Some(*value),
            Dynamic::Int(value) => Some(*value as f64),
            Dynamic::Uint(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Dynamic]> {
        match self {
            Dynamic::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Dynamic>> {
        match self {
            Dynamic::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Dynamic>> {
        match self {
            Dynamic::Object(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Dynamic>> {
        match self {
            Dynamic::Object(pairs) => Some(pairs),
            _ => None,
        }
    }
}

impl From<()> for Dynamic {
    fn from(_: ()) -> Self {
        Dynamic::Null
    }
}

impl From<bool> for Dynamic {
    fn from(value: bool) -> Self {
        Dynamic::Bool(value)
    }
}

impl From<i32> for Dynamic {
    fn from(value: i32) -> Self {
        Dynamic::Int(i64::from(value))
    }
}

impl From<i64> for Dynamic {
    fn from(value: i64) -> Self {
        Dynamic::Int(value)
    }
}

impl From<u32> for Dynamic {
    fn from(value: u32) -> Self {
        Dynamic::Uint(u64::from(value))
    }
}

impl From<u64> for Dynamic {
    fn from(value: u64) -> Self {
        Dynamic::Uint(value)
    }
}

impl From<f64> for Dynamic {
    fn from(value: f64) -> Self {
        Dynamic::Double(value)
    }
}

impl From<&str> for Dynamic {
    fn from(value: &str) -> Self {
        Dynamic::String(value.to_owned())
    }
}

impl From<String> for Dynamic {
    fn from(value: String) -> Self {
        Dynamic::String(value)
    }
}

impl From<Vec<Dynamic>> for Dynamic {
    fn from(items: Vec<Dynamic>) -> Self {
        Dynamic::Array(items)
    }
}

impl From<BTreeMap<String, Dynamic>> for Dynamic {
    fn from(pairs: BTreeMap<String, Dynamic>) -> Self {
        Dynamic::Object(pairs)
    }
}

const ENCODE_OP: &str = "encode a dynamic value";

fn write_error(err: ValueWriteError<io::Error>) -> Error {
    let source = match err {
        ValueWriteError::InvalidMarkerWrite(e) | ValueWriteError::InvalidDataWrite(e) => e,
    };
    Error::io(ENCODE_OP, source)
}

fn container_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::io(
            ENCODE_OP,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "container length exceeds the wire format limit",
            ),
        )
    })
}

impl Encode for Dynamic {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()> {
        use rmp::encode;

        match self {
            Dynamic::Null => encode::write_nil(buffer).map_err(|e| Error::io(ENCODE_OP, e)),
            Dynamic::Bool(value) => {
                encode::write_bool(buffer, *value).map_err(|e| Error::io(ENCODE_OP, e))
            }
            Dynamic::Int(value) => encode::write_sint(buffer, *value)
                .map(drop)
                .map_err(write_error),
            Dynamic::Uint(value) => encode::write_uint(buffer, *value)
                .map(drop)
                .map_err(write_error),
            Dynamic::Double(value) => encode::write_f64(buffer, *value).map_err(write_error),
            Dynamic::String(value) => encode::write_str(buffer, value).map_err(write_error),
            Dynamic::Array(items) => {
                encode::write_array_len(buffer, container_len(items.len())?)
                    .map_err(write_error)?;
                for item in items {
                    item.pack(buffer)?;
                }
                Ok(())
            }
            Dynamic::Object(pairs) => {
                encode::write_map_len(buffer, container_len(pairs.len())?).map_err(write_error)?;
                for (key, value) in pairs {
                    encode::write_str(buffer, key).map_err(write_error)?;
                    value.pack(buffer)?;
                }
                Ok(())
            }
        }
    }
}

impl Decode for Dynamic {
    fn unpack(mut buffer: &[u8]) -> Result<Self> {
        let value =
            rmpv::decode::read_value(&mut buffer).map_err(|e| Error::corrupt(e.to_string()))?;

        from_wire(value)
    }
}

/// Converts one decoded MessagePack value into a `Dynamic` tree.
///
/// The integer tag is sign-directed: non-negative integers become `Uint`,
/// negative ones `Int`. Both raw tags (str and bin) decode into the string
/// variant and must hold valid UTF-8.
fn from_wire(value: rmpv::Value) -> Result<Dynamic> {
    use rmpv::Value;

    Ok(match value {
        Value::Nil => Dynamic::Null,
        Value::Boolean(value) => Dynamic::Bool(value),
        Value::Integer(value) => match value.as_u64() {
            Some(unsigned) => Dynamic::Uint(unsigned),
            None => Dynamic::Int(
                value
                    .as_i64()
                    .ok_or_else(|| Error::corrupt("integer value out of range"))?,
            ),
        },
        Value::F32(value) => Dynamic::Double(f64::from(value)),
        Value::F64(value) => Dynamic::Double(value),
        Value::String(value) => Dynamic::String(
            value
                .into_str()
                .ok_or_else(|| Error::corrupt("string payload is not valid utf-8"))?,
        ),
        Value::Binary(bytes) => Dynamic::String(
            String::from_utf8(bytes).map_err(|_| Error::corrupt("raw payload is not valid utf-8"))?,
        ),
        Value::Array(items) => {
            let mut array = Vec::with_capacity(items.len());
            for item in items {
                array.push(from_wire(item)?);
            }
            Dynamic::Array(array)
        }
        Value::Map(pairs) => {
            let mut object = BTreeMap::new();
            for (key, value) in pairs {
                let Value::String(key) = key else {
                    return Err(Error::corrupt("map keys must be strings"));
                };
                let key = key
                    .into_str()
                    .ok_or_else(|| Error::corrupt("map key is not valid utf-8"))?;
                // Duplicate keys: the last occurrence wins.
                object.insert(key, from_wire(value)?);
            }
            Dynamic::Object(object)
        }
        Value::Ext(..) => return Err(Error::corrupt("unsupported type tag")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &Dynamic) -> Dynamic {
        let mut buffer = Vec::new();
        value.pack(&mut buffer).unwrap();
        Dynamic::unpack(&buffer).unwrap()
    }

    #[test]
    fn scalars_round_trip() {
        for value in [
            Dynamic::Null,
            Dynamic::Bool(true),
            Dynamic::Int(-42),
            Dynamic::Uint(42),
            Dynamic::Double(2.5),
            Dynamic::from("worker"),
        ] {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn nested_tree_round_trips() {
        let tree = Dynamic::Object(BTreeMap::from([
            (
                "a".to_owned(),
                Dynamic::Array(vec![
                    Dynamic::from(1u64),
                    Dynamic::from(2u64),
                    Dynamic::from(true),
                ]),
            ),
            ("b".to_owned(), Dynamic::Null),
        ]));

        let decoded = round_trip(&tree);
        assert_eq!(decoded, tree);

        let object = decoded.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["a"].as_array().unwrap().len(), 3);
        assert!(object["b"].is_null());
    }

    #[test]
    fn non_negative_int_comes_back_unsigned() {
        let decoded = round_trip(&Dynamic::Int(7));
        assert!(matches!(decoded, Dynamic::Uint(7)));
        // Numeric equality across the sign boundary still holds.
        assert_eq!(decoded, Dynamic::Int(7));

        assert!(matches!(round_trip(&Dynamic::Int(-7)), Dynamic::Int(-7)));
    }

    #[test]
    fn duplicate_keys_last_occurrence_wins() {
        let mut buffer = Vec::new();
        rmp::encode::write_map_len(&mut buffer, 2).unwrap();
        rmp::encode::write_str(&mut buffer, "k").unwrap();
        rmp::encode::write_uint(&mut buffer, 1).unwrap();
        rmp::encode::write_str(&mut buffer, "k").unwrap();
        rmp::encode::write_uint(&mut buffer, 2).unwrap();

        let decoded = Dynamic::unpack(&buffer).unwrap();
        let object = decoded.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object["k"], Dynamic::Uint(2));
    }

    #[test]
    fn non_string_map_key_is_corrupt() {
        let mut buffer = Vec::new();
        rmp::encode::write_map_len(&mut buffer, 1).unwrap();
        rmp::encode::write_uint(&mut buffer, 1).unwrap();
        rmp::encode::write_nil(&mut buffer).unwrap();

        match Dynamic::unpack(&buffer) {
            Err(Error::CorruptPayload { reason }) => {
                assert!(reason.contains("keys must be strings"));
            }
            other => panic!("expected a corrupt payload, got {other:?}"),
        }
    }

    #[test]
    fn raw_bytes_decode_as_string() {
        let mut buffer = Vec::new();
        rmp::encode::write_bin(&mut buffer, b"ping").unwrap();
        assert_eq!(Dynamic::unpack(&buffer).unwrap(), Dynamic::from("ping"));

        buffer.clear();
        rmp::encode::write_bin(&mut buffer, &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            Dynamic::unpack(&buffer),
            Err(Error::CorruptPayload { .. })
        ));
    }

    #[test]
    fn unsupported_tag_is_corrupt() {
        // fixext1 with type 1
        let buffer = [0xd4, 0x01, 0x00];
        assert!(matches!(
            Dynamic::unpack(&buffer),
            Err(Error::CorruptPayload { .. })
        ));
    }

    #[test]
    fn truncated_buffer_is_corrupt() {
        let mut buffer = Vec::new();
        Dynamic::Array(vec![Dynamic::Uint(1), Dynamic::Uint(2)])
            .pack(&mut buffer)
            .unwrap();
        buffer.truncate(buffer.len() - 1);

        assert!(matches!(
            Dynamic::unpack(&buffer),
            Err(Error::CorruptPayload { .. })
        ));
    }

    #[test]
    fn accessors_follow_the_active_variant() {
        assert_eq!(Dynamic::from(3u64).as_int(), Some(3));
        assert_eq!(Dynamic::from(-3).as_uint(), None);
        assert_eq!(Dynamic::from(3).as_double(), Some(3.0));
        assert_eq!(Dynamic::from("s").as_str(), Some("s"));
        assert_eq!(Dynamic::Null.as_bool(), None);
        assert!(Dynamic::default().is_null());
    }
}
