use crate::{SerializationError, WireDeserialize, WireSerialize};

/// The height of a block is the length of the chain back to the genesis
/// block (whose height is zero).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Height(pub u32);

impl Height {
    /// The genesis block height.
    pub const MIN: Height = Height(0);

    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }

    pub fn previous(self) -> Option<Height> {
        self.0.checked_sub(1).map(Height)
    }
}

impl std::ops::Add<u32> for Height {
    type Output = Height;
    fn add(self, rhs: u32) -> Height {
        Height(self.0 + rhs)
    }
}

impl WireSerialize for Height {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.wire_serialize(target)
    }
}

impl WireDeserialize for Height {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Height(u32::wire_deserialize(reader)?))
    }
}
