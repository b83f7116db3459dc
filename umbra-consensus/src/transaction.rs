//! Transaction validation, as applied while connecting a block.

use ripemd::Ripemd160;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

use umbra_chain::block::Height;
use umbra_chain::parameters::NetworkParameters;
use umbra_chain::tokens::TokenOperation;
use umbra_chain::transaction::{sighash, Transaction};
use umbra_chain::transparent::Script;
use umbra_state::UtxoEngine;

use crate::error::{TokenError, TransactionError};
use crate::tokens::TokenLedger;

lazy_static::lazy_static! {
    static ref SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

/// RIPEMD160(SHA256(data)): the address digest of a public key.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd);
    out
}

/// The transaction's operator address: the hash of the public key supplied
/// by its first transparent input. Token owner checks bind to it.
pub fn operator_address(tx: &Transaction) -> Option<[u8; 20]> {
    let input = tx.inputs.first()?;
    let (_, pubkey) = input.signature_script.parse_unlock_p2pkh()?;
    Some(hash160(pubkey))
}

/// Validate the transparent side of a non-coinbase transaction against the
/// UTXO set and return its fee.
///
/// Checks, in order: structural shape, input resolution, output sign, the
/// fee window (`0 ≤ fee ≤ sum_out/10` when there are outputs), expiry, gas
/// bounds, and one ECDSA signature per input over the canonical sighash.
pub fn validate_transparent(
    tx: &Transaction,
    utxo: &UtxoEngine,
    height: Height,
    params: &NetworkParameters,
) -> Result<i64, TransactionError> {
    if tx.is_coinbase() {
        return Err(TransactionError::CoinbasePosition);
    }
    // Pure shielded transactions carry empty transparent sides; everything
    // else needs at least one input and one output.
    if !tx.has_shielded_components() {
        if tx.inputs.is_empty() {
            return Err(TransactionError::NoInputs);
        }
        if tx.outputs.is_empty() {
            return Err(TransactionError::NoOutputs);
        }
    }

    if tx.expiry_height != 0 && height.0 > tx.expiry_height {
        return Err(TransactionError::Expired {
            expiry: tx.expiry_height,
            current: height.0,
        });
    }

    if tx.tx_type.is_contract_operation() {
        if tx.gas_limit > params.max_tx_gas {
            return Err(TransactionError::GasLimitExceeded {
                limit: tx.gas_limit,
                cap: params.max_tx_gas,
            });
        }
        if tx.gas_price < params.min_gas_price {
            return Err(TransactionError::GasPriceTooLow {
                price: tx.gas_price,
                min: params.min_gas_price,
            });
        }
    }

    let mut referenced_scripts = Vec::with_capacity(tx.inputs.len());
    let mut sum_in: i64 = 0;
    for input in tx.inputs.iter() {
        let entry = utxo
            .get(&input.previous_outpoint)?
            .ok_or(TransactionError::MissingUtxo(input.previous_outpoint))?;
        sum_in = sum_in
            .checked_add(entry.value)
            .ok_or(TransactionError::ValueOverflow)?;
        referenced_scripts.push(entry.pk_script);
    }

    let mut sum_out: i64 = 0;
    for output in tx.outputs.iter() {
        if output.value < 0 {
            return Err(TransactionError::NegativeOutput(output.value));
        }
        sum_out = sum_out
            .checked_add(output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    // The shielded pool's net contribution counts as transparent funds.
    let available = sum_in
        .checked_add(tx.value_balance)
        .ok_or(TransactionError::ValueOverflow)?;
    let fee = available - sum_out;
    if fee < 0 {
        return Err(TransactionError::NegativeFee);
    }
    // Fat-finger cap: a fee above a tenth of the spend is almost certainly
    // a mistake.
    if sum_out > 0 && fee > sum_out / 10 {
        return Err(TransactionError::FeeTooHigh {
            fee,
            cap: sum_out / 10,
        });
    }

    for (index, (input, pk_script)) in
        tx.inputs.iter().zip(referenced_scripts.iter()).enumerate()
    {
        verify_input_signature(tx, index, input, pk_script)?;
    }

    Ok(fee)
}

fn verify_input_signature(
    tx: &Transaction,
    index: usize,
    input: &umbra_chain::transparent::Input,
    pk_script: &Script,
) -> Result<(), TransactionError> {
    let expected_hash = pk_script
        .pubkey_hash()
        .ok_or(TransactionError::ScriptTemplateMismatch)?;
    let (der_sig, pubkey_bytes) = input
        .signature_script
        .parse_unlock_p2pkh()
        .ok_or(TransactionError::MalformedSignatureScript)?;
    if hash160(pubkey_bytes) != expected_hash {
        return Err(TransactionError::PubkeyMismatch);
    }

    let pubkey = PublicKey::from_slice(pubkey_bytes)
        .map_err(|_| TransactionError::MalformedSignatureScript)?;
    let signature = ecdsa::Signature::from_der(der_sig)
        .map_err(|_| TransactionError::MalformedSignatureScript)?;
    let digest = sighash(tx, index, pk_script);
    let message = Message::from_digest(digest);
    SECP.verify_ecdsa(&message, &signature, &pubkey)
        .map_err(|_| TransactionError::InvalidSignature)
}

/// Validate a token-operation transaction: decode the memo sub-format,
/// match the operation kind against the transaction type, and consult the
/// ledger collaborator for symbol/owner/balance invariants.
pub fn validate_token_operation(
    tx: &Transaction,
    ledger: &dyn TokenLedger,
) -> Result<TokenOperation, TransactionError> {
    let op = TokenOperation::from_memo(&tx.memo)
        .map_err(|_| TokenError::MalformedOperation)?;
    if op.expected_tx_type() != tx.tx_type {
        return Err(TokenError::KindMismatch.into());
    }
    let operator = operator_address(tx).ok_or(TokenError::MalformedOperation)?;
    ledger.validate(&op, &operator)?;
    Ok(op)
}

/// Test-and-library helper: produce a signed P2PKH spend of `entries`.
#[cfg(any(test, feature = "test-helpers"))]
pub mod sign {
    use super::*;
    use secp256k1::{All, SecretKey};
    use umbra_chain::transaction::{Memo, TxType};
    use umbra_chain::transparent::{Input, OutPoint, Output};
    use umbra_state::UtxoEntry;

    /// A deterministic test keypair and its P2PKH lock script.
    pub struct TestKey {
        secp: Secp256k1<All>,
        secret: SecretKey,
        pub pubkey: PublicKey,
        pub pubkey_hash: [u8; 20],
    }

    impl TestKey {
        pub fn from_byte(byte: u8) -> TestKey {
            let secp = Secp256k1::new();
            let secret = SecretKey::from_slice(&[byte; 32]).expect("valid test secret");
            let pubkey = PublicKey::from_secret_key(&secp, &secret);
            let pubkey_hash = hash160(&pubkey.serialize());
            TestKey {
                secp,
                secret,
                pubkey,
                pubkey_hash,
            }
        }

        pub fn lock_script(&self) -> Script {
            Script::pay_to_pubkey_hash(&self.pubkey_hash)
        }

        /// Build a transaction spending `entries` (all locked to this key)
        /// into `outputs`, with every input signed.
        pub fn spend(
            &self,
            entries: &[&UtxoEntry],
            outputs: Vec<Output>,
            tx_type: TxType,
            memo: Memo,
        ) -> Transaction {
            let mut tx = Transaction::new(
                1,
                tx_type,
                entries
                    .iter()
                    .map(|entry| Input {
                        previous_outpoint: OutPoint {
                            hash: entry.tx_hash,
                            index: entry.index,
                        },
                        signature_script: Script(Vec::new()),
                        sequence: 0xffff_ffff,
                    })
                    .collect(),
                outputs,
                0,
                memo,
            );
            for index in 0..tx.inputs.len() {
                let digest = sighash(&tx, index, &self.lock_script());
                let message = Message::from_digest(digest);
                let signature = self.secp.sign_ecdsa(&message, &self.secret);
                tx.inputs[index].signature_script = Script::unlock_p2pkh(
                    &signature.serialize_der(),
                    &self.pubkey.serialize(),
                );
            }
            tx
        }
    }
}
