//! Consensus-critical serialization.
//!
//! `WireSerialize` and `WireDeserialize` are analogs of the Serde traits
//! but for Umbra's consensus byte layouts: little-endian integers, var-int
//! prefixed collections, and raw byte arrays. Everything that crosses the
//! wire or touches the persistent store goes through these traits, so that
//! hashing serialized bytes is always well-defined.
//!
//! The primitive codings live in [`primitives`], with each type's encode
//! and decode implementations side by side so a layout change cannot drift
//! between the two directions.

mod error;
mod primitives;

pub mod sha256d;

pub use error::SerializationError;

use std::io;

pub trait WireSerialize {
    fn wire_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error>;

    fn wire_serialize_to_vec(&self) -> Result<Vec<u8>, io::Error> {
        let mut data = Vec::new();
        self.wire_serialize(&mut data)?;
        Ok(data)
    }
}

pub trait WireDeserialize {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait WireDeserializeInto {
    /// Deserialize based on type inference
    fn wire_deserialize_into<T>(self) -> Result<T, SerializationError>
    where
        T: WireDeserialize;
}

impl<R: io::Read> WireDeserializeInto for R {
    fn wire_deserialize_into<T>(self) -> Result<T, SerializationError>
    where
        T: WireDeserialize,
    {
        T::wire_deserialize(self)
    }
}
