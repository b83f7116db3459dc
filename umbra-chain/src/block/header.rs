use std::io::Write;

use chrono::{DateTime, Duration, Utc};

use crate::serialization::sha256d;
use crate::varint::VarInt;
use crate::work::difficulty::CompactDifficulty;
use crate::{SerializationError, WireDeserialize, WireSerialize};

use super::{merkle, Hash};

/// The maximum length of a header's proof-of-work solution string.
pub const MAX_SOLUTION_BYTES: usize = 1024;

/// A block header, containing metadata about a block.
///
/// Blocks are chained together via the backwards reference (previous header
/// hash) present in the block header. Each block points backwards to its
/// parent, all the way back to the genesis block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    /// The block's version field.
    pub version: i32,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    pub previous_block_hash: Hash,

    /// The root of the transaction Merkle tree, binding the block header to
    /// the transactions in the block.
    pub merkle_root: merkle::Root,

    /// The block timestamp is a Unix epoch time (UTC) when the miner started
    /// hashing the header (according to the miner).
    pub time: DateTime<Utc>,

    /// An encoded version of the target threshold this block's header hash
    /// must be less than or equal to, in the standard compact format.
    pub difficulty_threshold: CompactDifficulty,

    /// An arbitrary field that miners change to modify the header hash in
    /// order to produce a hash under the target threshold.
    pub nonce: u32,

    /// The proof-of-work solution bytes. Variable length, at most
    /// [`MAX_SOLUTION_BYTES`]; interpreted only by the PoW engine.
    pub solution: Vec<u8>,

    /// The header's own hash, filled in while deserializing (when the raw
    /// bytes are in hand anyway). Not part of the consensus serialization;
    /// equality ignores it.
    #[serde(skip)]
    hash: Option<Hash>,
}

/// Equality is over the consensus fields only; the hash slot is a cache of
/// a value derived from them.
impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.previous_block_hash == other.previous_block_hash
            && self.merkle_root == other.merkle_root
            && self.time == other.time
            && self.difficulty_threshold == other.difficulty_threshold
            && self.nonce == other.nonce
            && self.solution == other.solution
    }
}

impl Eq for Header {}

impl Header {
    pub fn new(
        version: i32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
        solution: Vec<u8>,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            solution,
            hash: None,
        }
    }

    /// The hash of this header, precomputed when available.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    pub(super) fn precomputed_hash(&self) -> Option<Hash> {
        self.hash
    }

    /// Returns the serialized length (in bytes) of this header.
    pub fn serialized_size(&self) -> usize {
        4 + 32 + 32 + 4 + 4 + 4 + VarInt::size(self.solution.len()) + self.solution.len()
    }

    /// Checks that `time` is within `tolerance` of `now`.
    ///
    /// This is a non-deterministic rule: clocks vary between nodes, and a
    /// header rejected now may be accepted later.
    pub fn time_is_valid_at(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        self.time <= now + tolerance && self.time >= now - tolerance
    }

    pub fn wire_serialize_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.wire_serialize(&mut out)
            .expect("serializing to a vec never fails");
        out
    }
}

impl WireSerialize for Header {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.wire_serialize(&mut target)?;
        self.previous_block_hash.wire_serialize(&mut target)?;
        self.merkle_root.wire_serialize(&mut target)?;
        self.time.wire_serialize(&mut target)?;
        self.difficulty_threshold.wire_serialize(&mut target)?;
        self.nonce.wire_serialize(&mut target)?;
        self.solution.wire_serialize(&mut target)
    }
}

impl WireDeserialize for Header {
    /// Deserializes a header, hashing the consumed bytes as they stream in
    /// so the hash slot is populated without a reserialization.
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut raw = Vec::with_capacity(128);

        let version = i32::wire_deserialize(&mut reader)?;
        version
            .wire_serialize(&mut raw)
            .expect("vec write is infallible");
        let previous_block_hash = Hash::wire_deserialize(&mut reader)?;
        raw.write_all(&previous_block_hash.0)?;
        let merkle_root = merkle::Root::wire_deserialize(&mut reader)?;
        raw.write_all(&merkle_root.0)?;
        let time = <DateTime<Utc>>::wire_deserialize(&mut reader)?;
        time.wire_serialize(&mut raw).expect("vec write");
        let difficulty_threshold = CompactDifficulty::wire_deserialize(&mut reader)?;
        difficulty_threshold
            .wire_serialize(&mut raw)
            .expect("vec write");
        let nonce = u32::wire_deserialize(&mut reader)?;
        nonce.wire_serialize(&mut raw).expect("vec write");
        let solution = Vec::<u8>::wire_deserialize(&mut reader)?;
        if solution.len() > MAX_SOLUTION_BYTES {
            return Err(SerializationError::Parse("oversized pow solution"));
        }
        solution.wire_serialize(&mut raw).expect("vec write");

        let own_hash = Hash(sha256d::digest(&raw));

        Ok(Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            solution,
            hash: Some(own_hash),
        })
    }
}

/// A header with a count of the number of transactions in its block.
///
/// This structure is used in the `headers` network message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedHeader {
    pub header: Header,
    pub transaction_count: usize,
}

impl WireSerialize for CountedHeader {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.wire_serialize(&mut target)?;
        VarInt::from(self.transaction_count).wire_serialize(&mut target)
    }
}

impl WireDeserialize for CountedHeader {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CountedHeader {
            header: Header::wire_deserialize(&mut reader)?,
            transaction_count: VarInt::wire_deserialize(&mut reader)?.value() as usize,
        })
    }
}
