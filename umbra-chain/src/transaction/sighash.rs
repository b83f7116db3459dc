//! The canonical signature-hash preimage for transparent inputs.

use crate::varint::VarInt;
use crate::serialization::{sha256d, WireSerialize};
use crate::transparent::Script;

use super::Transaction;

/// The only supported signature-hash type: sign everything.
pub const SIGHASH_ALL: u32 = 1;

/// Compute the signature hash for `input_index`, substituting `script` (the
/// lock script of the referenced output) into that input's script slot.
///
/// Layout: version (4 LE) ‖ input count (VarInt) ‖ per input
/// {prev hash (32), prev index (4 LE), script (only at `input_index`, empty
/// elsewhere), sequence (4 LE)} ‖ output count ‖ per output {value (8 LE),
/// pk_script} ‖ lock_time (4 LE) ‖ sighash type (4 LE). Counts use
/// VarInt, which is a single byte for every realistic transaction.
pub fn sighash(tx: &Transaction, input_index: usize, script: &Script) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(tx.serialized_size() + 8);

    tx.version
        .wire_serialize(&mut preimage)
        .expect("vec write is infallible");
    VarInt::from(tx.inputs.len())
        .wire_serialize(&mut preimage)
        .expect("vec write");
    for (i, input) in tx.inputs.iter().enumerate() {
        input
            .previous_outpoint
            .wire_serialize(&mut preimage)
            .expect("vec write");
        if i == input_index {
            script.wire_serialize(&mut preimage).expect("vec write");
        } else {
            Script(Vec::new())
                .wire_serialize(&mut preimage)
                .expect("vec write");
        }
        input
            .sequence
            .wire_serialize(&mut preimage)
            .expect("vec write");
    }
    VarInt::from(tx.outputs.len())
        .wire_serialize(&mut preimage)
        .expect("vec write");
    for output in tx.outputs.iter() {
        output.wire_serialize(&mut preimage).expect("vec write");
    }
    tx.lock_time
        .wire_serialize(&mut preimage)
        .expect("vec write");
    SIGHASH_ALL
        .wire_serialize(&mut preimage)
        .expect("vec write");

    sha256d::digest(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Memo, TxType};
    use crate::transparent::{Input, OutPoint, Output};

    fn two_input_tx() -> Transaction {
        Transaction::new(
            1,
            TxType::Transparent,
            vec![
                Input {
                    previous_outpoint: OutPoint {
                        hash: crate::transaction::Hash([1; 32]),
                        index: 0,
                    },
                    signature_script: Script(vec![0xaa]),
                    sequence: 0,
                },
                Input {
                    previous_outpoint: OutPoint {
                        hash: crate::transaction::Hash([2; 32]),
                        index: 1,
                    },
                    signature_script: Script(vec![0xbb]),
                    sequence: 0,
                },
            ],
            vec![Output {
                value: 10,
                pk_script: Script::pay_to_pubkey_hash(&[3; 20]),
            }],
            0,
            Memo::empty(),
        )
    }

    #[test]
    fn sighash_ignores_existing_signature_scripts() {
        let tx = two_input_tx();
        let mut stripped = tx.clone();
        for input in stripped.inputs.iter_mut() {
            input.signature_script = Script(vec![0xff, 0xff]);
        }
        let script = Script::pay_to_pubkey_hash(&[9; 20]);
        assert_eq!(sighash(&tx, 0, &script), sighash(&stripped, 0, &script));
    }

    #[test]
    fn sighash_differs_per_input_slot() {
        let tx = two_input_tx();
        let script = Script::pay_to_pubkey_hash(&[9; 20]);
        assert_ne!(sighash(&tx, 0, &script), sighash(&tx, 1, &script));
    }
}
