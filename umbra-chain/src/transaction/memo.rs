use crate::varint::VarInt;
use crate::{SerializationError, WireDeserialize, WireSerialize};

/// The maximum memo length, enforced at construction and deserialization.
pub const MAX_MEMO_BYTES: usize = 512;

/// A transaction memo.
///
/// Free-form for ordinary transfers; token operations encode their binary
/// payload here (see `crate::tokens`).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Memo(Vec<u8>);

impl Memo {
    pub fn empty() -> Memo {
        Memo(Vec::new())
    }

    /// Wrap raw bytes, rejecting memos longer than [`MAX_MEMO_BYTES`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Memo, SerializationError> {
        if bytes.len() > MAX_MEMO_BYTES {
            return Err(SerializationError::Parse("memo exceeds 512 bytes"));
        }
        Ok(Memo(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn serialized_size(&self) -> usize {
        VarInt::size(self.0.len()) + self.0.len()
    }
}

impl WireSerialize for Memo {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.wire_serialize(target)
    }
}

impl WireDeserialize for Memo {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Memo::from_bytes(Vec::<u8>::wire_deserialize(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_lengths() {
        assert!(Memo::from_bytes(vec![0; MAX_MEMO_BYTES]).is_ok());
        assert!(Memo::from_bytes(vec![0; MAX_MEMO_BYTES + 1]).is_err());
    }

    #[test]
    fn oversized_memo_rejected_on_the_wire() {
        let mut bytes = Vec::new();
        VarInt::from(MAX_MEMO_BYTES + 1)
            .wire_serialize(&mut bytes)
            .unwrap();
        bytes.extend(std::iter::repeat(0u8).take(MAX_MEMO_BYTES + 1));
        assert!(Memo::wire_deserialize(&bytes[..]).is_err());
    }
}
