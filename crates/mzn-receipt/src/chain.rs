// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipt chain verification.
//!
//! The chain is continuous across sessions: each session opens with a
//! `SESSION_START` receipt whose `prev_receipt_hash` is the previous
//! session's terminal hash, so an end-to-end walk verifies the whole log.

use crate::{Receipt, compute_hash};

/// Errors from receipt chain verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// A receipt's stored hash does not match the recomputed hash.
    #[error("hash mismatch at chain index {index}")]
    HashMismatch {
        /// Index of the offending receipt.
        index: usize,
    },
    /// A receipt's `prev_receipt_hash` does not match its predecessor.
    #[error("broken link at chain index {index}")]
    BrokenLink {
        /// Index of the offending receipt.
        index: usize,
    },
    /// A receipt is missing its stored hash.
    #[error("missing hash at chain index {index}")]
    MissingHash {
        /// Index of the offending receipt.
        index: usize,
    },
    /// The chain is empty when a non-empty chain was expected.
    #[error("chain is empty")]
    Empty,
}

/// Verify hash integrity and linkage over an ordered slice of receipts.
///
/// # Errors
///
/// The first violation found, as a [`ChainError`].
pub fn verify_chain(receipts: &[Receipt]) -> Result<(), ChainError> {
    if receipts.is_empty() {
        return Err(ChainError::Empty);
    }
    verify_chain_range(receipts, 0, receipts.len())
}

/// Verify the half-open index range `[from, to)` of an ordered receipt log.
///
/// Linkage for the receipt at `from` is checked against its in-range
/// predecessor only, so a range starting mid-log is still verifiable.
///
/// # Errors
///
/// The first violation found, as a [`ChainError`].
pub fn verify_chain_range(receipts: &[Receipt], from: usize, to: usize) -> Result<(), ChainError> {
    let slice = receipts.get(from..to).ok_or(ChainError::Empty)?;
    if slice.is_empty() {
        return Err(ChainError::Empty);
    }
    for (offset, receipt) in slice.iter().enumerate() {
        let index = from + offset;
        let stored = receipt
            .this_hash
            .as_ref()
            .ok_or(ChainError::MissingHash { index })?;
        let recomputed =
            compute_hash(receipt).map_err(|_| ChainError::HashMismatch { index })?;
        if *stored != recomputed {
            return Err(ChainError::HashMismatch { index });
        }
        if offset > 0 {
            let prev = &slice[offset - 1];
            if receipt.prev_receipt_hash.as_deref() != prev.this_hash.as_deref() {
                return Err(ChainError::BrokenLink { index });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decision, ReceiptBuilder};

    fn chained(n: usize) -> Vec<Receipt> {
        let mut out: Vec<Receipt> = Vec::new();
        for i in 0..n {
            let mut r = ReceiptBuilder::new("storage.read", Decision::Allow).build("boot");
            r.session_index = i as u64;
            r.prev_receipt_hash = out.last().and_then(|p| p.this_hash.clone());
            r.this_hash = Some(compute_hash(&r).unwrap());
            out.push(r);
        }
        out
    }

    #[test]
    fn valid_chain_verifies() {
        let chain = chained(5);
        verify_chain(&chain).unwrap();
    }

    #[test]
    fn empty_chain_is_error() {
        assert_eq!(verify_chain(&[]).unwrap_err(), ChainError::Empty);
    }

    #[test]
    fn tampered_receipt_detected() {
        let mut chain = chained(3);
        chain[1].action_id = "tool.invoke".to_string();
        assert_eq!(
            verify_chain(&chain).unwrap_err(),
            ChainError::HashMismatch { index: 1 }
        );
    }

    #[test]
    fn broken_link_detected() {
        let mut chain = chained(3);
        chain[2].prev_receipt_hash = Some("0".repeat(64));
        // Rehash so the hash itself is valid but the link is wrong.
        chain[2].this_hash = Some(compute_hash(&chain[2]).unwrap());
        assert_eq!(
            verify_chain(&chain).unwrap_err(),
            ChainError::BrokenLink { index: 2 }
        );
    }

    #[test]
    fn missing_hash_detected() {
        let mut chain = chained(2);
        chain[1].this_hash = None;
        assert_eq!(
            verify_chain(&chain).unwrap_err(),
            ChainError::MissingHash { index: 1 }
        );
    }

    #[test]
    fn range_verification_mid_log() {
        let chain = chained(6);
        verify_chain_range(&chain, 2, 5).unwrap();
    }

    #[test]
    fn out_of_bounds_range_is_empty_error() {
        let chain = chained(2);
        assert_eq!(
            verify_chain_range(&chain, 1, 9).unwrap_err(),
            ChainError::Empty
        );
    }
}
