use byteorder::{ReadBytesExt, WriteBytesExt};
use umbra_chain::{SerializationError, WireDeserialize, WireSerialize};

/// Reject reason codes: a fixed enumeration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RejectReason {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    Nonstandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
}

/// A `reject` message: why the sender's message was not accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reject {
    /// The command of the message being rejected.
    pub message: String,
    /// The machine-readable reason code.
    pub code: RejectReason,
    /// A human-readable reason.
    pub reason: String,
    /// Optionally, the hash of the rejected object.
    pub data: Option<[u8; 32]>,
}

impl Reject {
    pub fn new(message: &str, code: RejectReason, reason: &str) -> Reject {
        Reject {
            message: message.to_string(),
            code,
            reason: reason.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: [u8; 32]) -> Reject {
        self.data = Some(data);
        self
    }
}

impl WireSerialize for Reject {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.message.wire_serialize(&mut target)?;
        target.write_u8(self.code as u8)?;
        self.reason.wire_serialize(&mut target)?;
        if let Some(data) = self.data {
            data.wire_serialize(&mut target)?;
        }
        Ok(())
    }
}

impl WireDeserialize for Reject {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Reject {
            message: String::wire_deserialize(&mut reader)?,
            code: match reader.read_u8()? {
                0x01 => RejectReason::Malformed,
                0x10 => RejectReason::Invalid,
                0x11 => RejectReason::Obsolete,
                0x12 => RejectReason::Duplicate,
                0x40 => RejectReason::Nonstandard,
                0x41 => RejectReason::Dust,
                0x42 => RejectReason::InsufficientFee,
                0x43 => RejectReason::Checkpoint,
                _ => return Err(SerializationError::Parse("invalid reject code")),
            },
            reason: String::wire_deserialize(&mut reader)?,
            // There is no length field; presence is implied by the body
            // length, and all senders supply either nothing or a 32-byte
            // object hash.
            data: <[u8; 32]>::wire_deserialize(&mut reader).ok(),
        })
    }
}

#[test]
fn reject_roundtrip_with_and_without_data() {
    let bare = Reject::new("tx", RejectReason::InsufficientFee, "fee below filter");
    let bytes = bare.wire_serialize_to_vec().unwrap();
    assert_eq!(Reject::wire_deserialize(&bytes[..]).unwrap(), bare);

    let full = Reject::new("block", RejectReason::Checkpoint, "checkpoint mismatch")
        .with_data([9; 32]);
    let bytes = full.wire_serialize_to_vec().unwrap();
    assert_eq!(Reject::wire_deserialize(&bytes[..]).unwrap(), full);
}
