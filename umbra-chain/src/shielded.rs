//! Shielded spend and output descriptors.
//!
//! These carry the note-commitment, nullifier, and proof material for the
//! shielded value pool. Proof objects are opaque fixed-size byte strings
//! here; verification beyond structural checks is the job of the pluggable
//! verifier collaborator in `umbra-state`.

use crate::{SerializationError, WireDeserialize, WireSerialize};
use serde_big_array::BigArray;
use wire_serde_derive::{WireDeser, WireSer};

/// The serialized size of a shielded proof object.
pub const PROOF_BYTES: usize = 192;
/// The note ciphertext delivered to the recipient.
pub const ENC_CIPHERTEXT_BYTES: usize = 580;
/// The note ciphertext recoverable by the sender.
pub const OUT_CIPHERTEXT_BYTES: usize = 80;
/// The in-descriptor memo field length.
pub const MEMO_BYTES: usize = 512;

/// A nullifier: the deterministic one-way tag published when a note is
/// spent. The live nullifier set is the shielded double-spend guard.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, WireSer, WireDeser)]
pub struct Nullifier(pub [u8; 32]);

impl std::fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Nullifier")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// A note commitment, as inserted into the commitment tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, WireSer, WireDeser)]
pub struct Commitment(pub [u8; 32]);

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Commitment")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// A spend of an existing shielded note.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, WireSer, WireDeser)]
pub struct SpendDescription {
    /// A commitment to the value being spent.
    pub cv: [u8; 32],
    /// A historical root of the note commitment tree the proof refers to.
    pub anchor: [u8; 32],
    /// The nullifier of the spent note.
    pub nullifier: Nullifier,
    /// The randomized validating key for `spend_auth_sig`.
    pub rk: [u8; 32],
    /// The opaque membership/balance proof.
    #[serde(with = "BigArray")]
    pub proof: [u8; PROOF_BYTES],
    /// A signature authorizing this spend.
    #[serde(with = "BigArray")]
    pub spend_auth_sig: [u8; 64],
    /// The token this spend moves; the all-zero id is the native coin.
    pub token_id: [u8; 32],
    /// The token amount carried, when `token_id` is non-zero.
    pub token_amount: i64,
}

/// The creation of a new shielded note.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, WireSer, WireDeser)]
pub struct OutputDescription {
    /// A commitment to the value of the new note.
    pub cv: [u8; 32],
    /// The u-coordinate of the note commitment.
    pub cmu: Commitment,
    /// An ephemeral key for the note encryption.
    pub ephemeral_key: [u8; 32],
    /// The encrypted note plaintext, for the recipient.
    #[serde(with = "BigArray")]
    pub enc_ciphertext: [u8; ENC_CIPHERTEXT_BYTES],
    /// The encrypted note plaintext, recoverable by the sender.
    #[serde(with = "BigArray")]
    pub out_ciphertext: [u8; OUT_CIPHERTEXT_BYTES],
    /// The opaque output proof.
    #[serde(with = "BigArray")]
    pub proof: [u8; PROOF_BYTES],
    /// The in-descriptor memo field.
    #[serde(with = "BigArray")]
    pub memo: [u8; MEMO_BYTES],
    /// The token this output carries; the all-zero id is the native coin.
    pub token_id: [u8; 32],
    /// The token amount carried, when `token_id` is non-zero.
    pub token_amount: i64,
}

impl std::fmt::Debug for OutputDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("OutputDescription")
            .field("cmu", &self.cmu)
            .field("ephemeral_key", &hex::encode(self.ephemeral_key))
            .finish()
    }
}

impl SpendDescription {
    /// Returns the serialized length (in bytes) of this spend.
    pub const fn serialized_size() -> usize {
        32 + 32 + 32 + 32 + PROOF_BYTES + 64 + 32 + 8
    }
}

impl OutputDescription {
    /// Returns the serialized length (in bytes) of this output.
    pub const fn serialized_size() -> usize {
        32 + 32 + 32 + ENC_CIPHERTEXT_BYTES + OUT_CIPHERTEXT_BYTES + PROOF_BYTES + MEMO_BYTES + 32 + 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_spend() -> SpendDescription {
        SpendDescription {
            cv: [1; 32],
            anchor: [2; 32],
            nullifier: Nullifier([3; 32]),
            rk: [4; 32],
            proof: [5; PROOF_BYTES],
            spend_auth_sig: [6; 64],
            token_id: [0; 32],
            token_amount: 0,
        }
    }

    #[test]
    fn spend_roundtrip_and_size() {
        let spend = dummy_spend();
        let bytes = spend.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), SpendDescription::serialized_size());
        let parsed = SpendDescription::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(spend, parsed);
    }

    #[test]
    fn output_roundtrip_and_size() {
        let output = OutputDescription {
            cv: [1; 32],
            cmu: Commitment([2; 32]),
            ephemeral_key: [3; 32],
            enc_ciphertext: [4; ENC_CIPHERTEXT_BYTES],
            out_ciphertext: [5; OUT_CIPHERTEXT_BYTES],
            proof: [6; PROOF_BYTES],
            memo: [7; MEMO_BYTES],
            token_id: [0; 32],
            token_amount: 0,
        };
        let bytes = output.wire_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), OutputDescription::serialized_size());
        let parsed = OutputDescription::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(output, parsed);
    }
}
