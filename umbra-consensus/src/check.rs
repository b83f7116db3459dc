//! Stateless consensus check functions.

use chrono::{DateTime, Utc};

use umbra_chain::block::{Block, Header, Height, MAX_SOLUTION_BYTES};
use umbra_chain::parameters::NetworkParameters;
use umbra_chain::transaction;

use crate::error::*;
use crate::subsidy;

/// Returns `Ok(())` if there is exactly one coinbase transaction in `block`,
/// and that coinbase transaction is the first transaction in the block.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block.transactions.get(0).ok_or(BlockError::NoTransactions)?;
    let mut rest = block.transactions.iter().skip(1);
    if !first.is_coinbase() {
        return Err(TransactionError::CoinbasePosition)?;
    }
    if rest.any(|tx| tx.contains_coinbase_input()) {
        return Err(TransactionError::CoinbaseInputFound)?;
    }
    Ok(())
}

/// Header sanity: a bounded solution string and a non-zero, expandable
/// difficulty target.
pub fn header_is_sane(header: &Header) -> Result<(), BlockError> {
    if header.solution.len() > MAX_SOLUTION_BYTES {
        return Err(BlockError::InvalidHeader("oversized pow solution"));
    }
    if header.difficulty_threshold.0 == 0 {
        return Err(BlockError::InvalidHeader("zero difficulty bits"));
    }
    if header.difficulty_threshold.to_expanded().is_none() {
        return Err(BlockError::InvalidHeader("difficulty bits do not expand"));
    }
    Ok(())
}

/// Returns `Ok(())` if `header.time` is within the configured drift window
/// around `now`.
///
/// This is a non-deterministic rule, as clocks vary over time and between
/// nodes; a header rejected now may be accepted later.
pub fn time_is_valid_at(
    header: &Header,
    now: DateTime<Utc>,
    params: &NetworkParameters,
) -> Result<(), BlockError> {
    if header.time_is_valid_at(now, params.max_time_drift) {
        Ok(())
    } else {
        Err(BlockError::Time)
    }
}

/// The serialized block must fit the configured ceiling. A block of exactly
/// `max_block_bytes` is acceptable.
pub fn block_is_within_size_limit(
    block: &Block,
    params: &NetworkParameters,
) -> Result<(), BlockError> {
    let size = block.serialized_size();
    if size as u64 > params.max_block_bytes {
        return Err(BlockError::OversizedBlock {
            size,
            limit: params.max_block_bytes,
        });
    }
    Ok(())
}

/// Check Merkle root validity.
///
/// `transaction_hashes` is a precomputed list of transaction hashes.
pub fn merkle_root_validity(
    block: &Block,
    transaction_hashes: &[transaction::Hash],
) -> Result<(), BlockError> {
    let merkle_root = transaction_hashes.iter().cloned().collect();

    if block.header.merkle_root != merkle_root {
        return Err(BlockError::BadMerkleRoot {
            actual: merkle_root,
            expected: block.header.merkle_root,
        });
    }

    // The transaction Merkle tree is malleable: a block with duplicate
    // transactions can share a root with one without them (CVE-2012-2459).
    // Duplicates imply a double-spend, so reject them here.
    use std::collections::HashSet;
    if transaction_hashes.len() != transaction_hashes.iter().collect::<HashSet<_>>().len() {
        return Err(BlockError::DuplicateTransaction);
    }

    Ok(())
}

/// Returns `Ok(())` if the coinbase claims no more than the subsidy at
/// `height` plus the fees collected from the block's transactions.
pub fn subsidy_is_valid(
    block: &Block,
    height: Height,
    params: &NetworkParameters,
    total_fees: i64,
) -> Result<(), BlockError> {
    let coinbase = block
        .coinbase()
        .ok_or(TransactionError::CoinbasePosition)?;
    let claimed = umbra_chain::amount::sum(coinbase.outputs.iter().map(|output| output.value))
        .ok_or(TransactionError::ValueOverflow)?;
    let allowed = subsidy::block_subsidy(height, params)
        .checked_add(total_fees)
        .ok_or(TransactionError::ValueOverflow)?;
    if claimed > allowed {
        return Err(BlockError::SubsidyTooLarge { claimed, allowed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use umbra_chain::parameters::{genesis_block, Network};
    use umbra_chain::transaction::{Memo, Transaction, TxType};
    use umbra_chain::transparent::{Input, OutPoint, Output, Script};
    use umbra_chain::work::difficulty::CompactDifficulty;

    #[test]
    fn genesis_passes_the_stateless_checks() {
        let params = NetworkParameters::mainnet();
        let genesis = genesis_block(Network::Mainnet);

        coinbase_is_first(&genesis).unwrap();
        header_is_sane(&genesis.header).unwrap();
        block_is_within_size_limit(&genesis, &params).unwrap();

        let hashes: Vec<_> = genesis.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root_validity(&genesis, &hashes).unwrap();
        subsidy_is_valid(&genesis, Height(0), &params, 0).unwrap();
    }

    #[test]
    fn zero_bits_fail_header_sanity() {
        let mut genesis = genesis_block(Network::Mainnet);
        genesis.header.difficulty_threshold = CompactDifficulty(0);
        assert!(matches!(
            header_is_sane(&genesis.header),
            Err(BlockError::InvalidHeader(_))
        ));
    }

    #[test]
    fn drift_window_is_two_sided() {
        let params = NetworkParameters::mainnet();
        let genesis = genesis_block(Network::Mainnet);
        let drift = params.max_time_drift;

        let inside = genesis.header.time + drift - Duration::seconds(1);
        time_is_valid_at(&genesis.header, inside, &params).unwrap();

        let ahead = genesis.header.time - drift - Duration::seconds(1);
        assert!(time_is_valid_at(&genesis.header, ahead, &params).is_err());

        let behind = genesis.header.time + drift + Duration::seconds(1);
        assert!(time_is_valid_at(&genesis.header, behind, &params).is_err());
    }

    #[test]
    fn block_size_boundary_is_exact() {
        let mut params = NetworkParameters::mainnet();
        let genesis = genesis_block(Network::Mainnet);

        params.max_block_bytes = genesis.serialized_size() as u64;
        block_is_within_size_limit(&genesis, &params).unwrap();

        params.max_block_bytes -= 1;
        assert!(matches!(
            block_is_within_size_limit(&genesis, &params),
            Err(BlockError::OversizedBlock { .. })
        ));
    }

    #[test]
    fn coinbase_in_second_position_is_rejected() {
        let mut block = genesis_block(Network::Mainnet);
        let coinbase = block.transactions[0].clone();
        let spend = Arc::new(Transaction::new(
            1,
            TxType::Transparent,
            vec![Input {
                previous_outpoint: OutPoint {
                    hash: coinbase.hash(),
                    index: 0,
                },
                signature_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                value: 1,
                pk_script: Script(vec![]),
            }],
            0,
            Memo::empty(),
        ));
        block.transactions = vec![spend, coinbase];
        assert!(matches!(
            coinbase_is_first(&block),
            Err(BlockError::Transaction(TransactionError::CoinbasePosition))
        ));
    }

    #[test]
    fn excessive_coinbase_claim_is_rejected() {
        let params = NetworkParameters::mainnet();
        let mut block = genesis_block(Network::Mainnet);
        let mut coinbase = (*block.transactions[0]).clone();
        coinbase.outputs[0].value = subsidy::block_subsidy(Height(1), &params) + 1;
        block.transactions[0] = Arc::new(coinbase);

        assert!(matches!(
            subsidy_is_valid(&block, Height(1), &params, 0),
            Err(BlockError::SubsidyTooLarge { .. })
        ));
        // With a fee of 1 the claim becomes legal.
        let mut coinbase = (*block.transactions[0]).clone();
        coinbase.outputs[0].value = subsidy::block_subsidy(Height(1), &params) + 1;
        block.transactions[0] = Arc::new(coinbase);
        subsidy_is_valid(&block, Height(1), &params, 1).unwrap();
    }

    #[test]
    fn duplicate_transactions_fail_merkle_validity() {
        let mut block = genesis_block(Network::Mainnet);
        let coinbase = block.transactions[0].clone();
        block.transactions = vec![coinbase.clone(), coinbase.clone()];
        let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
        // Rebuild the root so only the duplicate check can fail.
        block.header.merkle_root = hashes.iter().cloned().collect();
        assert!(matches!(
            merkle_root_validity(&block, &hashes),
            Err(BlockError::DuplicateTransaction)
        ));
    }
}
