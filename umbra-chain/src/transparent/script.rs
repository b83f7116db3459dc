use crate::varint::VarInt;
use crate::serialization::{SerializationError, WireDeserialize, WireSerialize};
use std::{
    fmt,
    io::{self, Read},
};

/// An encoding of a lock or unlock script.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Script(pub Vec<u8>);

/// The length of the standard pay-to-public-key-hash lock script.
pub const P2PKH_SCRIPT_LEN: usize = 25;

impl Script {
    pub fn serialized_size(&self) -> usize {
        VarInt::size(self.0.len()) + self.0.len()
    }

    /// Build the standard 25-byte pay-to-public-key-hash lock script:
    /// `OP_DUP OP_HASH160 PUSH20 <hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn pay_to_pubkey_hash(pubkey_hash: &[u8; 20]) -> Script {
        let mut bytes = Vec::with_capacity(P2PKH_SCRIPT_LEN);
        bytes.extend_from_slice(&[0x76, 0xa9, 0x14]);
        bytes.extend_from_slice(pubkey_hash);
        bytes.extend_from_slice(&[0x88, 0xac]);
        Script(bytes)
    }

    /// Extract the 20-byte public key hash from a standard P2PKH script.
    pub fn pubkey_hash(&self) -> Option<[u8; 20]> {
        if self.0.len() != P2PKH_SCRIPT_LEN
            || self.0[..3] != [0x76, 0xa9, 0x14]
            || self.0[23..] != [0x88, 0xac]
        {
            return None;
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&self.0[3..23]);
        Some(hash)
    }

    /// Build the unlock script `len(sig‖type) ‖ DER sig ‖ 0x01 ‖ len(pk) ‖ pk`.
    pub fn unlock_p2pkh(der_signature: &[u8], pubkey: &[u8]) -> Script {
        let mut bytes = Vec::with_capacity(2 + der_signature.len() + 1 + pubkey.len());
        bytes.push((der_signature.len() + 1) as u8);
        bytes.extend_from_slice(der_signature);
        bytes.push(0x01);
        bytes.push(pubkey.len() as u8);
        bytes.extend_from_slice(pubkey);
        Script(bytes)
    }

    /// Split a P2PKH unlock script into its DER signature (with the trailing
    /// sighash-type byte stripped) and public key.
    pub fn parse_unlock_p2pkh(&self) -> Option<(&[u8], &[u8])> {
        let bytes = &self.0;
        let sig_len = *bytes.first()? as usize;
        if sig_len < 2 || bytes.len() < 1 + sig_len + 1 {
            return None;
        }
        let sig_with_type = &bytes[1..1 + sig_len];
        let (sig, type_byte) = sig_with_type.split_at(sig_len - 1);
        if type_byte != [0x01] {
            return None;
        }
        let pk_len = bytes[1 + sig_len] as usize;
        if bytes.len() != 2 + sig_len + pk_len {
            return None;
        }
        let pubkey = &bytes[2 + sig_len..];
        Some((sig, pubkey))
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl WireSerialize for Script {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        VarInt::from(self.0.len()).wire_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl WireDeserialize for Script {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = VarInt::wire_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("script shorter than its prefix"));
        }
        Ok(Script(bytes))
    }
}

#[cfg(test)]
mod proptests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn script_roundtrip(script in any::<Script>()) {
            let mut bytes = Cursor::new(Vec::new());
            script.wire_serialize(&mut bytes)?;

            bytes.set_position(0);
            let other_script = Script::wire_deserialize(&mut bytes)?;

            prop_assert_eq![script, other_script];
        }
    }

    #[test]
    fn p2pkh_template_roundtrip() {
        let script = Script::pay_to_pubkey_hash(&[0x11; 20]);
        assert_eq!(script.0.len(), P2PKH_SCRIPT_LEN);
        assert_eq!(script.pubkey_hash(), Some([0x11; 20]));
        assert_eq!(Script(vec![0x51]).pubkey_hash(), None);
    }

    #[test]
    fn unlock_script_roundtrip() {
        let sig = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];
        let pubkey = vec![0x02; 33];
        let script = Script::unlock_p2pkh(&sig, &pubkey);
        let (parsed_sig, parsed_pk) = script.parse_unlock_p2pkh().unwrap();
        assert_eq!(parsed_sig, &sig[..]);
        assert_eq!(parsed_pk, &pubkey[..]);
    }
}
