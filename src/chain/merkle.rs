//! Merkle Tree for Chain Exports
//!
//! Summarizes a whole chain in one root hash so an archived export can be
//! checked against a single published value.

use tracing::debug;

use crate::chain::block::{sha256_hex, Block};
use crate::error::{LedgerError, Result};

/// Hash of two child nodes
fn parent_hash(left: &str, right: &str) -> String {
    sha256_hex(format!("{}{}", left, right).as_bytes())
}

/// Merkle root over block digests, in the order given. An odd node at the
/// end of a level is paired with itself.
pub fn merkle_root(digests: &[String]) -> Result<String> {
    if digests.is_empty() {
        return Err(LedgerError::NotFound(
            "blocks to build a Merkle tree from".to_string(),
        ));
    }

    let mut level = digests.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| parent_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }

    let root = level.swap_remove(0);
    debug!("Merkle root over {} digests: {}", digests.len(), root);
    Ok(root)
}

/// Merkle root of a chain's blocks, taken in ascending sequence order
/// regardless of the order they are passed in
pub fn chain_merkle_root(blocks: &[Block]) -> Result<String> {
    let mut ordered: Vec<&Block> = blocks.iter().collect();
    ordered.sort_by_key(|block| (block.sequence_number, block.team_id));

    let digests: Vec<String> = ordered.iter().map(|block| block.digest.clone()).collect();
    merkle_root(&digests)
}

/// Verify a claimed Merkle root against a set of blocks
pub fn verify_merkle_root(blocks: &[Block], claimed_root: &str) -> Result<bool> {
    Ok(chain_merkle_root(blocks)? == claimed_root)
}
