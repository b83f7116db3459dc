//! Block difficulty data structures and calculations.
//!
//! The chain difficulty directly relates to the amount of work that miners
//! put into finding blocks. A block header commits to a *compact* 4-byte
//! target; validation expands it to a 256-bit threshold that the block hash
//! must not exceed. Chain selection compares branches by accumulated work,
//! `2^256 / (target + 1)` summed over each branch.

use crate::block;
use crate::{SerializationError, WireDeserialize, WireSerialize};
use primitive_types::U256;
use std::cmp::Ordering;

/// A difficulty target in the 3-byte-mantissa / 1-byte-exponent compact
/// encoding, as carried in block headers.
///
/// The low 23 bits are the mantissa, bit 0x0080_0000 is the sign bit (always
/// unset in valid targets), and the high byte is a base-256 exponent.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(pub u32);

/// A 256-bit expanded difficulty target.
///
/// Note: larger expanded targets represent *less* work.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

/// The accumulated work on a chain of blocks: `Σ 2^256 / (target + 1)`.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Work(U256);

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

impl CompactDifficulty {
    /// Expand this compact target.
    ///
    /// Returns `None` for zero targets, negative targets (sign bit set), and
    /// encodings that overflow 256 bits, all of which are invalid in block
    /// headers.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        let mantissa = self.0 & MANTISSA_MASK;
        let exponent = (self.0 >> 24) as usize;

        if self.0 & SIGN_BIT != 0 || mantissa == 0 {
            return None;
        }

        let result = if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent)))
        } else {
            let shift = 8 * (exponent - 3);
            if shift >= 256 {
                return None;
            }
            let value = U256::from(mantissa) << shift;
            // The shift must be reversible, or the encoding overflowed 256 bits.
            if (value >> shift).low_u32() != mantissa {
                return None;
            }
            value
        };

        if result.is_zero() {
            None
        } else {
            Some(ExpandedDifficulty(result))
        }
    }
}

impl ExpandedDifficulty {
    pub fn from_u256(value: U256) -> Self {
        ExpandedDifficulty(value)
    }

    pub fn to_u256(self) -> U256 {
        self.0
    }

    /// Compress this target into the canonical compact encoding.
    ///
    /// The encoding is lossy, so `expand(compress(t))` truncates `t` to a
    /// 3-byte mantissa; `compress(expand(c)) == c` for every canonical `c`.
    pub fn to_compact(self) -> CompactDifficulty {
        let mut size = (self.0.bits() + 7) / 8;
        let mut mantissa = if size <= 3 {
            self.0.low_u64() << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size - 3))).low_u64()
        };

        // A mantissa with the sign bit set gets an extra exponent byte.
        if mantissa & SIGN_BIT as u64 != 0 {
            mantissa >>= 8;
            size += 1;
        }

        CompactDifficulty(mantissa as u32 | ((size as u32) << 24))
    }

    /// The work represented by finding a hash at or below this target.
    pub fn to_work(self) -> Work {
        // 2^256 / (target + 1) == ~target / (target + 1) + 1, which avoids
        // the 257-bit numerator.
        Work((!self.0 / (self.0 + U256::one())) + U256::one())
    }
}

impl Work {
    pub fn zero() -> Self {
        Work(U256::zero())
    }

    pub fn checked_add(self, other: Work) -> Option<Work> {
        self.0.checked_add(other.0).map(Work)
    }
}

impl std::ops::Add for Work {
    type Output = Work;
    fn add(self, other: Work) -> Work {
        Work(self.0.saturating_add(other.0))
    }
}

impl std::fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

impl std::fmt::Debug for ExpandedDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        f.debug_tuple("ExpandedDifficulty")
            .field(&hex::encode(buf))
            .finish()
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Work").field(&self.0).finish()
    }
}

impl WireSerialize for CompactDifficulty {
    fn wire_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.wire_serialize(target)
    }
}

impl WireDeserialize for CompactDifficulty {
    fn wire_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::wire_deserialize(reader)?))
    }
}

impl From<&block::Hash> for ExpandedDifficulty {
    /// Interpret a block hash as a 256-bit integer for target comparison.
    ///
    /// Block hashes compare as little-endian integers, following the u256
    /// convention set by Bitcoin.
    fn from(hash: &block::Hash) -> Self {
        ExpandedDifficulty(U256::from_little_endian(&hash.0))
    }
}

impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        *self == ExpandedDifficulty::from(other)
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<Ordering> {
        self.partial_cmp(&ExpandedDifficulty::from(other))
    }
}

impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        ExpandedDifficulty::from(self) == *other
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<Ordering> {
        ExpandedDifficulty::from(self).partial_cmp(other)
    }
}
