//! Static dispatch from a payload type to its wire encoding.
//!
//! Every value crossing a [`Socket`](crate::socket::Socket) boundary goes
//! through the [`Encode`]/[`Decode`] pair. The default mapping defers to
//! the payload's serde representation in MessagePack; types that need a
//! custom wire form (notably [`Dynamic`](crate::dynamic::Dynamic))
//! implement the traits directly and fully replace the default behavior.

use std::any::type_name;
use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Packs a value into its wire representation, appending to `buffer`.
pub trait Encode {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()>;
}

/// Reconstructs a value from its wire representation.
pub trait Decode: Sized {
    fn unpack(buffer: &[u8]) -> Result<Self>;
}

/// Packs `value` using its serde representation in MessagePack.
///
/// This is the default mapping of the registry; custom codecs bypass it.
pub fn pack_with_serde<T>(buffer: &mut Vec<u8>, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    value
        .serialize(&mut rmp_serde::Serializer::new(buffer))
        .map_err(|e| Error::io("encode a payload", io::Error::new(io::ErrorKind::Other, e)))
}

/// Unpacks a `T` from its serde representation in MessagePack.
///
/// Classifies failures into [`Error::CorruptPayload`] (the buffer is not
/// valid MessagePack) and [`Error::SchemaMismatch`] (the buffer is valid
/// but encodes a shape `T` cannot absorb).
pub fn unpack_with_serde<T>(buffer: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    rmp_serde::from_slice(buffer).map_err(classify::<T>)
}

fn classify<T>(err: rmp_serde::decode::Error) -> Error {
    use rmp_serde::decode::Error as De;

    match err {
        De::InvalidMarkerRead(e) | De::InvalidDataRead(e) => Error::corrupt(e.to_string()),
        De::Utf8Error(e) => Error::corrupt(e.to_string()),
        De::DepthLimitExceeded => Error::corrupt("nesting depth limit exceeded"),
        De::TypeMismatch(marker) => Error::mismatch(type_name::<T>(), format!("{marker:?}")),
        other => Error::mismatch(type_name::<T>(), other.to_string()),
    }
}

/// Wires a serde type into the registry with the default mapping.
///
/// Message types defined by the orchestration layer opt in with
/// `serde_payload!(JobRequest, JobReply);`.
#[macro_export]
macro_rules! serde_payload {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::codec::Encode for $ty {
            fn pack(&self, buffer: &mut Vec<u8>) -> $crate::error::Result<()> {
                $crate::codec::pack_with_serde(buffer, self)
            }
        }

        impl $crate::codec::Decode for $ty {
            fn unpack(buffer: &[u8]) -> $crate::error::Result<Self> {
                $crate::codec::unpack_with_serde(buffer)
            }
        }
    )+};
}

serde_payload!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, ());

impl Encode for str {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()> {
        pack_with_serde(buffer, self)
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()> {
        (**self).pack(buffer)
    }
}

impl<T: Serialize> Encode for Vec<T> {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()> {
        pack_with_serde(buffer, self)
    }
}

impl<T: DeserializeOwned> Decode for Vec<T> {
    fn unpack(buffer: &[u8]) -> Result<Self> {
        unpack_with_serde(buffer)
    }
}

impl<T: Serialize> Encode for Option<T> {
    fn pack(&self, buffer: &mut Vec<u8>) -> Result<()> {
        pack_with_serde(buffer, self)
    }
}

impl<T: DeserializeOwned> Decode for Option<T> {
    fn unpack(buffer: &[u8]) -> Result<Self> {
        unpack_with_serde(buffer)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::error::Error;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Heartbeat {
        worker: String,
        load:   u32,
    }

    serde_payload!(Heartbeat);

    #[test]
    fn scalars_round_trip() {
        let mut buffer = Vec::new();
        42u64.pack(&mut buffer).unwrap();
        assert_eq!(u64::unpack(&buffer).unwrap(), 42);

        buffer.clear();
        "job-7".pack(&mut buffer).unwrap();
        assert_eq!(String::unpack(&buffer).unwrap(), "job-7");

        buffer.clear();
        vec![1u32, 2, 3].pack(&mut buffer).unwrap();
        assert_eq!(Vec::<u32>::unpack(&buffer).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn registered_struct_round_trips() {
        let sent = Heartbeat {
            worker: "w-01".into(),
            load:   3,
        };

        let mut buffer = Vec::new();
        sent.pack(&mut buffer).unwrap();
        assert_eq!(Heartbeat::unpack(&buffer).unwrap(), sent);
    }

    #[test]
    fn shape_conflict_is_a_schema_mismatch() {
        let mut buffer = Vec::new();
        "not a number".pack(&mut buffer).unwrap();

        match u64::unpack(&buffer) {
            Err(Error::SchemaMismatch { .. }) => {}
            other => panic!("expected a schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn truncated_buffer_is_corrupt() {
        let mut buffer = Vec::new();
        vec![1u64, 2, 3].pack(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 1);

        match Vec::<u64>::unpack(&buffer) {
            Err(Error::CorruptPayload { .. }) => {}
            other => panic!("expected a corrupt payload, got {other:?}"),
        }
    }
}
