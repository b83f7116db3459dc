//! Wire codings for primitive and standard-library types.
//!
//! Layout rules: integers are little-endian and fixed-width; byte arrays
//! are raw; collections and strings carry a var-int length prefix;
//! socket addresses are a 16-byte IPv6(-mapped) address and a big-endian
//! port; timestamps are 32-bit epoch seconds.

use std::convert::TryFrom;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use super::{SerializationError, WireDeserialize, WireSerialize};
use crate::varint::VarInt;

macro_rules! wire_le_int {
    ($($ty:ty),*) => {$(
        impl WireSerialize for $ty {
            fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
                target.write_all(&self.to_le_bytes())
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                reader.read_exact(&mut bytes)?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        }
    )*};
}

wire_le_int!(u16, u32, u64, i32, i64);

// No owned-`u8` serialize impl: it would make the dedicated `Vec<u8>` impl
// below overlap with the generic `Vec<T>` one. Single bytes are written
// through `&u8` or a one-element array at the call site.
impl WireSerialize for &u8 {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&[**self])
    }
}

impl WireDeserialize for u8 {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<u8, SerializationError> {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl WireSerialize for bool {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&[*self as u8])
    }
}

impl WireDeserialize for bool {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<bool, SerializationError> {
        match u8::wire_deserialize(&mut reader)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("invalid bool")),
        }
    }
}

// Fixed-length byte arrays travel raw, with no length prefix. One impl
// pair per length used by the wire model.
macro_rules! wire_byte_array {
    ($($len:expr),*) => {$(
        impl WireSerialize for [u8; $len] {
            fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
                target.write_all(self)
            }
        }

        impl WireDeserialize for [u8; $len] {
            fn wire_deserialize<R: Read>(mut reader: R) -> Result<[u8; $len], SerializationError> {
                let mut bytes = [0u8; $len];
                reader.read_exact(&mut bytes)?;
                Ok(bytes)
            }
        }
    )*};
}

wire_byte_array!(4, 12, 20, 32, 64, 80, 192, 512, 580);

/// Timestamps are 32-bit epoch seconds; out-of-range values saturate on
/// write and are rejected on read.
impl WireSerialize for DateTime<Utc> {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        let secs = u32::try_from(self.timestamp()).unwrap_or(u32::MAX);
        target.write_all(&secs.to_le_bytes())
    }
}

impl WireDeserialize for DateTime<Utc> {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<DateTime<Utc>, SerializationError> {
        let secs = u32::wire_deserialize(&mut reader)?;
        Utc.timestamp_opt(i64::from(secs), 0)
            .single()
            .ok_or(SerializationError::Parse("timestamp out of range"))
    }
}

/// `Vec<u8>` is a length-prefixed byte string on the wire. Decoding goes
/// through the generic `Vec<T>` impl below, which also bounds blind
/// preallocation against hostile length prefixes.
impl WireSerialize for Vec<u8> {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        VarInt::from(self.len()).wire_serialize(&mut target)?;
        target.write_all(self)
    }
}

impl<T: WireSerialize> WireSerialize for Vec<T> {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        VarInt::from(self.len()).wire_serialize(&mut target)?;
        for item in self.iter() {
            item.wire_serialize(&mut target)?;
        }
        Ok(())
    }
}

impl<T: WireDeserialize> WireDeserialize for Vec<T> {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<Vec<T>, SerializationError> {
        let len = VarInt::wire_deserialize(&mut reader)?.value() as usize;
        let mut result = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            result.push(T::wire_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl WireSerialize for String {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        VarInt::from(self.len()).wire_serialize(&mut target)?;
        target.write_all(self.as_bytes())
    }
}

impl WireDeserialize for String {
    fn wire_deserialize<R: Read>(reader: R) -> Result<String, SerializationError> {
        let buf = Vec::<u8>::wire_deserialize(reader)?;
        String::from_utf8(buf).map_err(|_| SerializationError::Parse("invalid utf-8"))
    }
}

/// Addresses travel as a 16-byte IPv6 (v4 addresses mapped) and a
/// big-endian port.
impl WireSerialize for SocketAddr {
    fn wire_serialize<W: Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        let octets = match self.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        target.write_all(&octets)?;
        target.write_all(&self.port().to_be_bytes())
    }
}

impl WireDeserialize for SocketAddr {
    fn wire_deserialize<R: Read>(mut reader: R) -> Result<SocketAddr, SerializationError> {
        let mut octets = [0u8; 16];
        reader.read_exact(&mut octets)?;
        let v6 = std::net::Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        let mut port = [0u8; 2];
        reader.read_exact(&mut port)?;
        Ok(SocketAddr::new(ip, u16::from_be_bytes(port)))
    }
}

impl<T: WireSerialize> WireSerialize for Arc<T> {
    fn wire_serialize<W: Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.as_ref().wire_serialize(target)
    }
}

impl<T: WireDeserialize> WireDeserialize for Arc<T> {
    fn wire_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Arc::new(T::wire_deserialize(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addr_roundtrip_maps_v4() {
        let v4: SocketAddr = "203.0.113.6:8655".parse().unwrap();
        let bytes = v4.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(SocketAddr::wire_deserialize(&bytes[..]).unwrap(), v4);

        let v6: SocketAddr = "[2001:db8::1]:8655".parse().unwrap();
        let bytes = v6.wire_serialize_to_vec().unwrap();
        assert_eq!(SocketAddr::wire_deserialize(&bytes[..]).unwrap(), v6);
    }

    #[test]
    fn strings_reject_invalid_utf8() {
        let mut bytes = Vec::new();
        VarInt::from(2).wire_serialize(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        assert!(String::wire_deserialize(&bytes[..]).is_err());
    }

    #[test]
    fn bools_are_strict() {
        assert!(!bool::wire_deserialize(&[0u8][..]).unwrap());
        assert!(bool::wire_deserialize(&[1u8][..]).unwrap());
        assert!(bool::wire_deserialize(&[2u8][..]).is_err());
    }

    #[test]
    fn out_of_range_timestamps_saturate_on_write() {
        let before_epoch = Utc.timestamp_opt(-5, 0).single().unwrap();
        let bytes = before_epoch.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes, u32::MAX.to_le_bytes().to_vec());
    }
}
