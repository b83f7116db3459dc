//! Token operations and their memo encoding.
//!
//! Token transactions carry their payload inside the transaction memo as a
//! strict binary sub-format: a one-byte opcode, length-prefixed UTF-8
//! strings, and fixed-width little-endian amounts. Trailing bytes or
//! truncated fields are malformed and rejected outright.

use crate::serialization::SerializationError;
use crate::transaction::{Memo, TxType};

/// A token's chain-wide identity: the fingerprint of its issuing
/// transaction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub [u8; 32]);

impl std::fmt::Debug for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("TokenId").field(&hex::encode(self.0)).finish()
    }
}

/// The maximum token symbol length in bytes.
pub const MAX_SYMBOL_BYTES: usize = 12;
/// The maximum token display-name length in bytes.
pub const MAX_NAME_BYTES: usize = 64;

const OP_ISSUE: u8 = 1;
const OP_TRANSFER: u8 = 2;
const OP_MINT: u8 = 3;
const OP_TRANSFER_OWNERSHIP: u8 = 4;
const OP_SHIELD: u8 = 5;
const OP_BURN: u8 = 6;

/// A decoded token operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenOperation {
    Issue {
        symbol: String,
        name: String,
        supply: u64,
        decimals: u8,
        owner: [u8; 20],
    },
    Transfer {
        token: TokenId,
        amount: u64,
        to: [u8; 20],
    },
    Mint {
        token: TokenId,
        amount: u64,
    },
    TransferOwnership {
        token: TokenId,
        new_owner: [u8; 20],
    },
    Shield {
        token: TokenId,
        amount: u64,
    },
    Burn {
        token: TokenId,
        amount: u64,
    },
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        if self.0.len() < n {
            return Err(SerializationError::Parse("truncated token operation"));
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SerializationError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, SerializationError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn array_20(&mut self) -> Result<[u8; 20], SerializationError> {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(self.take(20)?);
        Ok(bytes)
    }

    fn token_id(&mut self) -> Result<TokenId, SerializationError> {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.take(32)?);
        Ok(TokenId(bytes))
    }

    fn string(&mut self, max: usize) -> Result<String, SerializationError> {
        let len = self.u8()? as usize;
        if len == 0 || len > max {
            return Err(SerializationError::Parse("token string length out of range"));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SerializationError::Parse("token string is not utf-8"))
    }

    fn finish(self) -> Result<(), SerializationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(SerializationError::Parse(
                "trailing bytes after token operation",
            ))
        }
    }
}

impl TokenOperation {
    /// The transaction type this operation must be carried in.
    pub fn expected_tx_type(&self) -> TxType {
        match self {
            TokenOperation::Issue { .. } => TxType::TokenIssue,
            TokenOperation::Transfer { .. } => TxType::TokenTransfer,
            TokenOperation::Mint { .. } => TxType::TokenMint,
            TokenOperation::TransferOwnership { .. } => TxType::TokenTransferOwnership,
            TokenOperation::Shield { .. } => TxType::TokenShielded,
            TokenOperation::Burn { .. } => TxType::TokenBurn,
        }
    }

    /// Encode this operation into a transaction memo.
    pub fn to_memo(&self) -> Memo {
        let mut bytes = Vec::with_capacity(64);
        match self {
            TokenOperation::Issue {
                symbol,
                name,
                supply,
                decimals,
                owner,
            } => {
                bytes.push(OP_ISSUE);
                bytes.push(symbol.len() as u8);
                bytes.extend_from_slice(symbol.as_bytes());
                bytes.push(name.len() as u8);
                bytes.extend_from_slice(name.as_bytes());
                bytes.extend_from_slice(&supply.to_le_bytes());
                bytes.push(*decimals);
                bytes.extend_from_slice(owner);
            }
            TokenOperation::Transfer { token, amount, to } => {
                bytes.push(OP_TRANSFER);
                bytes.extend_from_slice(&token.0);
                bytes.extend_from_slice(&amount.to_le_bytes());
                bytes.extend_from_slice(to);
            }
            TokenOperation::Mint { token, amount } => {
                bytes.push(OP_MINT);
                bytes.extend_from_slice(&token.0);
                bytes.extend_from_slice(&amount.to_le_bytes());
            }
            TokenOperation::TransferOwnership { token, new_owner } => {
                bytes.push(OP_TRANSFER_OWNERSHIP);
                bytes.extend_from_slice(&token.0);
                bytes.extend_from_slice(new_owner);
            }
            TokenOperation::Shield { token, amount } => {
                bytes.push(OP_SHIELD);
                bytes.extend_from_slice(&token.0);
                bytes.extend_from_slice(&amount.to_le_bytes());
            }
            TokenOperation::Burn { token, amount } => {
                bytes.push(OP_BURN);
                bytes.extend_from_slice(&token.0);
                bytes.extend_from_slice(&amount.to_le_bytes());
            }
        }
        Memo::from_bytes(bytes).expect("token operations are far below the memo cap")
    }

    /// Decode a token operation from a memo, rejecting malformed payloads.
    pub fn from_memo(memo: &Memo) -> Result<TokenOperation, SerializationError> {
        let mut reader = Reader(memo.as_bytes());
        let op = match reader.u8()? {
            OP_ISSUE => {
                let symbol = reader.string(MAX_SYMBOL_BYTES)?;
                if !symbol
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
                {
                    return Err(SerializationError::Parse(
                        "token symbol must be uppercase ascii alphanumeric",
                    ));
                }
                TokenOperation::Issue {
                    symbol,
                    name: reader.string(MAX_NAME_BYTES)?,
                    supply: reader.u64()?,
                    decimals: reader.u8()?,
                    owner: reader.array_20()?,
                }
            }
            OP_TRANSFER => TokenOperation::Transfer {
                token: reader.token_id()?,
                amount: reader.u64()?,
                to: reader.array_20()?,
            },
            OP_MINT => TokenOperation::Mint {
                token: reader.token_id()?,
                amount: reader.u64()?,
            },
            OP_TRANSFER_OWNERSHIP => TokenOperation::TransferOwnership {
                token: reader.token_id()?,
                new_owner: reader.array_20()?,
            },
            OP_SHIELD => TokenOperation::Shield {
                token: reader.token_id()?,
                amount: reader.u64()?,
            },
            OP_BURN => TokenOperation::Burn {
                token: reader.token_id()?,
                amount: reader.u64()?,
            },
            _ => return Err(SerializationError::Parse("unknown token opcode")),
        };
        reader.finish()?;
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_roundtrip() {
        let op = TokenOperation::Issue {
            symbol: "NIGHT".to_string(),
            name: "Nightshade".to_string(),
            supply: 1_000_000,
            decimals: 8,
            owner: [9; 20],
        };
        assert_eq!(TokenOperation::from_memo(&op.to_memo()).unwrap(), op);
    }

    #[test]
    fn transfer_roundtrip() {
        let op = TokenOperation::Transfer {
            token: TokenId([1; 32]),
            amount: 42,
            to: [2; 20],
        };
        assert_eq!(TokenOperation::from_memo(&op.to_memo()).unwrap(), op);
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let op = TokenOperation::Mint {
            token: TokenId([1; 32]),
            amount: 5,
        };
        let mut bytes = op.to_memo().as_bytes().to_vec();
        bytes.push(0);
        let memo = Memo::from_bytes(bytes).unwrap();
        assert!(TokenOperation::from_memo(&memo).is_err());
    }

    #[test]
    fn lowercase_symbols_are_rejected() {
        let mut bytes = vec![1u8, 3];
        bytes.extend_from_slice(b"abc");
        bytes.push(1);
        bytes.push(b'A');
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&[0; 20]);
        let memo = Memo::from_bytes(bytes).unwrap();
        assert!(TokenOperation::from_memo(&memo).is_err());
    }
}
