use umbra_chain::{block, SerializationError, WireDeserialize, WireSerialize};

/// The shared shape of `getheaders` and `getblocks`.
///
/// `start` names a block the sender already has; the responder serves what
/// follows it. A zero `stop` hash means open-ended: the responder sends up
/// to its per-message ceiling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockLocator {
    /// The sender's best known block hash on the chain of interest.
    pub start: block::Hash,
    /// The last item to send, `None` for as-many-as-allowed.
    pub stop: Option<block::Hash>,
}

impl BlockLocator {
    pub fn open_ended(start: block::Hash) -> BlockLocator {
        BlockLocator { start, stop: None }
    }
}

impl WireSerialize for BlockLocator {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.start.wire_serialize(&mut target)?;
        match self.stop {
            Some(hash) => hash.wire_serialize(&mut target),
            None => block::Hash::zero().wire_serialize(&mut target),
        }
    }
}

impl WireDeserialize for BlockLocator {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let start = block::Hash::wire_deserialize(&mut reader)?;
        let raw_stop = block::Hash::wire_deserialize(&mut reader)?;
        let stop = if raw_stop.is_zero() {
            None
        } else {
            Some(raw_stop)
        };
        Ok(BlockLocator { start, stop })
    }
}

#[test]
fn zero_stop_decodes_to_open_ended() {
    let locator = BlockLocator::open_ended(block::Hash([5; 32]));
    let bytes = locator.wire_serialize_to_vec().unwrap();
    assert_eq!(bytes.len(), 64);
    assert_eq!(BlockLocator::wire_deserialize(&bytes[..]).unwrap(), locator);

    let bounded = BlockLocator {
        start: block::Hash([5; 32]),
        stop: Some(block::Hash([6; 32])),
    };
    let bytes = bounded.wire_serialize_to_vec().unwrap();
    assert_eq!(BlockLocator::wire_deserialize(&bytes[..]).unwrap(), bounded);
}
