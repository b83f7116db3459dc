use umbra_chain::{SerializationError, WireDeserialize, WireSerialize};

use crate::constants::MAX_USER_AGENT_BYTES;

/// A `version` message.
///
/// Carries everything the remote side needs to validate the handshake: the
/// protocol version, the sender's best height, a wall-clock timestamp, and
/// a bounded user agent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Version {
    /// The protocol version spoken by the sender.
    pub version: i32,
    /// The sender's best block height.
    pub height: i32,
    /// When the message was built, seconds since the epoch.
    pub timestamp: i64,
    /// Free-form client identification, at most 256 bytes.
    pub user_agent: String,
}

impl Version {
    pub fn new(version: i32, height: i32, timestamp: i64, user_agent: String) -> Version {
        Version {
            version,
            height,
            timestamp,
            user_agent,
        }
    }
}

impl WireSerialize for Version {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.wire_serialize(&mut target)?;
        self.height.wire_serialize(&mut target)?;
        self.timestamp.wire_serialize(&mut target)?;
        self.user_agent.wire_serialize(&mut target)
    }
}

impl WireDeserialize for Version {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = i32::wire_deserialize(&mut reader)?;
        let height = i32::wire_deserialize(&mut reader)?;
        let timestamp = i64::wire_deserialize(&mut reader)?;
        let user_agent = String::wire_deserialize(&mut reader)?;
        if user_agent.len() > MAX_USER_AGENT_BYTES {
            return Err(SerializationError::Parse("oversized user agent"));
        }
        Ok(Version {
            version,
            height,
            timestamp,
            user_agent,
        })
    }
}

#[test]
fn version_roundtrip() {
    let version = Version::new(1, 42, 1_713_000_000, "/umbra-test/".to_string());
    let bytes = version.wire_serialize_to_vec().unwrap();
    assert_eq!(Version::wire_deserialize(&bytes[..]).unwrap(), version);
}

#[test]
fn oversized_user_agent_is_rejected_on_the_wire() {
    let version = Version::new(1, 42, 0, "x".repeat(MAX_USER_AGENT_BYTES + 1));
    let bytes = version.wire_serialize_to_vec().unwrap();
    assert!(Version::wire_deserialize(&bytes[..]).is_err());
}
