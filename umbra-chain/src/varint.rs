//! Variable-length integers for collection lengths on the wire.
//!
//! The format is protocol-fixed: values below 0xFD are a single byte;
//! larger values carry a tag byte (0xFD, 0xFE, or 0xFF) followed by 2, 4,
//! or 8 little-endian payload bytes. Decoding insists on the minimal form,
//! so every value has exactly one accepted byte representation and
//! length-prefixed objects cannot be mutated into hash-distinct twins.

use crate::{SerializationError, WireDeserialize, WireSerialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt(pub u64);

/// Encoding tiers above the single-byte range: inclusive lower bound, tag
/// byte, payload width. Ordered widest first so a lookup finds the tier a
/// value actually needs.
const TIERS: [(u64, u8, usize); 3] = [
    (1 << 32, 0xff, 8),
    (1 << 16, 0xfe, 4),
    (0xfd, 0xfd, 2),
];

fn tier_for(value: u64) -> Option<(u8, usize)> {
    TIERS
        .iter()
        .find(|(floor, _, _)| value >= *floor)
        .map(|&(_, tag, width)| (tag, width))
}

impl VarInt {
    pub fn from(value: usize) -> VarInt {
        VarInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The encoded length of a var-int holding `value`.
    pub fn size(value: usize) -> usize {
        match tier_for(value as u64) {
            Some((_, width)) => 1 + width,
            None => 1,
        }
    }
}

impl WireSerialize for VarInt {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        match tier_for(self.0) {
            None => target.write_all(&[self.0 as u8]),
            Some((tag, width)) => {
                target.write_all(&[tag])?;
                target.write_all(&self.0.to_le_bytes()[..width])
            }
        }
    }
}

impl WireDeserialize for VarInt {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<VarInt, SerializationError> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        let width = match tag[0] {
            0xfd => 2,
            0xfe => 4,
            0xff => 8,
            small => return Ok(VarInt(u64::from(small))),
        };
        let mut payload = [0u8; 8];
        reader.read_exact(&mut payload[..width])?;
        let value = u64::from_le_bytes(payload);

        // The tag must be the one this value would be encoded with.
        match tier_for(value) {
            Some((minimal_tag, _)) if minimal_tag == tag[0] => Ok(VarInt(value)),
            _ => Err(SerializationError::Parse("non-minimal var-int encoding")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn varint_roundtrip(value in any::<u64>()) {
            let int = VarInt(value);
            let bytes = int.wire_serialize_to_vec().unwrap();
            prop_assert_eq!(bytes.len(), VarInt::size(value as usize));
            let parsed = VarInt::wire_deserialize(&bytes[..]).unwrap();
            prop_assert_eq!(int, parsed);
        }
    }

    #[test]
    fn tier_boundaries() {
        for &(value, expected) in &[
            (0usize, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            assert_eq!(VarInt::size(value), expected);
            assert_eq!(
                VarInt::from(value).wire_serialize_to_vec().unwrap().len(),
                expected
            );
        }
    }

    #[test]
    fn non_minimal_encodings_are_rejected() {
        // 1 encoded with the two-byte tier.
        assert!(VarInt::wire_deserialize(&[0xfd, 0x01, 0x00][..]).is_err());
        // 0xfd encoded with the four-byte tier.
        assert!(VarInt::wire_deserialize(&[0xfe, 0xfd, 0x00, 0x00, 0x00][..]).is_err());
        // The same values in their minimal forms decode.
        assert_eq!(VarInt::wire_deserialize(&[0x01][..]).unwrap(), VarInt(1));
        assert_eq!(
            VarInt::wire_deserialize(&[0xfd, 0xfd, 0x00][..]).unwrap(),
            VarInt(0xfd)
        );
    }

    #[test]
    fn truncated_payload_is_an_io_error() {
        assert!(VarInt::wire_deserialize(&[0xfe, 0x01][..]).is_err());
    }
}
