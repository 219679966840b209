//! Chain Verification
//!
//! Recomputes a team chain's hash linkage and block digests from the raw
//! stored rows. A failed check is a finding reported to the caller, never
//! an error and never repaired.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::block::ZERO_HASH;
use crate::database::models::BlockRow;

/// Which integrity check a block failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// First block is not a genesis block linking to the zero hash
    InvalidGenesis,
    /// Sequence numbers are not contiguous
    SequenceGap,
    /// `previous_hash` does not match the preceding block's digest
    BrokenLink,
    /// Stored digest does not match the recomputed one
    DigestMismatch,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidGenesis => "invalid genesis block",
            FailureKind::SequenceGap => "sequence gap",
            FailureKind::BrokenLink => "broken hash link",
            FailureKind::DigestMismatch => "digest mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFailure {
    pub sequence_number: i64,
    pub kind: FailureKind,
}

/// Verification result with detailed information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub is_valid: bool,
    /// Blocks owned by the verified team; a leading global genesis row of
    /// another team is not counted
    pub total_blocks: usize,
    pub failure: Option<IntegrityFailure>,
}

impl VerificationReport {
    fn valid(total_blocks: usize) -> Self {
        Self {
            is_valid: true,
            total_blocks,
            failure: None,
        }
    }

    fn invalid(total_blocks: usize, sequence_number: i64, kind: FailureKind) -> Self {
        Self {
            is_valid: false,
            total_blocks,
            failure: Some(IntegrityFailure {
                sequence_number,
                kind,
            }),
        }
    }

    pub fn message(&self) -> &'static str {
        if self.is_valid {
            "Blockchain is valid"
        } else {
            "Blockchain integrity compromised"
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match &self.failure {
            None => format!("{} ({} blocks)", self.message(), self.total_blocks),
            Some(failure) => format!(
                "{} ({} blocks): {} at block {}",
                self.message(),
                self.total_blocks,
                failure.kind.as_str(),
                failure.sequence_number
            ),
        }
    }
}

fn digest_matches(row: &BlockRow) -> bool {
    row.recompute_digest().as_deref() == Some(row.digest.as_str())
}

/// Verify a chain given its rows in ascending sequence order.
///
/// An empty chain, or one holding only the global genesis block, is valid.
/// A leading global genesis row followed by another team's blocks belongs
/// to a different provenance and is skipped.
pub fn verify_chain(rows: &[BlockRow]) -> VerificationReport {
    let rows = match rows {
        [first, rest @ ..]
            if first.is_global_genesis()
                && rest.first().is_some_and(|next| next.team_id != first.team_id) =>
        {
            rest
        }
        _ => rows,
    };

    let total_blocks = rows.len();
    let Some(genesis) = rows.first() else {
        debug!("Verified empty chain");
        return VerificationReport::valid(0);
    };

    if genesis.sequence_number != 0 || genesis.previous_hash != ZERO_HASH || !digest_matches(genesis)
    {
        warn!("Chain for team {} has an invalid genesis block", genesis.team_id);
        return VerificationReport::invalid(
            total_blocks,
            genesis.sequence_number,
            FailureKind::InvalidGenesis,
        );
    }

    for pair in rows.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        let failure = if current.sequence_number != previous.sequence_number + 1 {
            Some(FailureKind::SequenceGap)
        } else if current.previous_hash != previous.digest {
            Some(FailureKind::BrokenLink)
        } else if !digest_matches(current) {
            Some(FailureKind::DigestMismatch)
        } else {
            None
        };

        if let Some(kind) = failure {
            warn!(
                "Chain for team {} failed verification: {} at block {}",
                current.team_id,
                kind.as_str(),
                current.sequence_number
            );
            return VerificationReport::invalid(total_blocks, current.sequence_number, kind);
        }
    }

    info!(
        "Chain for team {} verified: {} blocks",
        genesis.team_id, total_blocks
    );
    VerificationReport::valid(total_blocks)
}

/// Find every block whose stored digest no longer matches its contents
pub fn find_tampered_blocks(rows: &[BlockRow]) -> Vec<i64> {
    rows.iter()
        .filter(|row| !digest_matches(row))
        .map(|row| row.sequence_number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::block::{Block, NewEvent, GLOBAL_TEAM_ID};

    fn build_rows(team_id: i64, count: usize) -> Vec<BlockRow> {
        let mut blocks = vec![Block::genesis(team_id).unwrap()];
        for i in 1..count {
            let previous_hash = blocks[i - 1].digest.clone();
            let event = NewEvent::new(format!("event-{}-{}", team_id, i), 42, "document")
                .with_attribute("index", i as i64);
            blocks.push(Block::new(team_id, i as i64, previous_hash, event).unwrap());
        }
        blocks
            .iter()
            .map(|block| BlockRow::from_block(block).unwrap())
            .collect()
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_chain(&[]);
        assert!(report.is_valid);
        assert_eq!(report.total_blocks, 0);
    }

    #[test]
    fn test_valid_chain() {
        let report = verify_chain(&build_rows(7, 5));
        assert!(report.is_valid);
        assert_eq!(report.total_blocks, 5);
        assert_eq!(report.message(), "Blockchain is valid");
    }

    #[test]
    fn test_only_global_genesis_is_valid() {
        let report = verify_chain(&build_rows(GLOBAL_TEAM_ID, 1));
        assert!(report.is_valid);
        assert_eq!(report.total_blocks, 1);
    }

    #[test]
    fn test_leading_global_genesis_is_skipped() {
        let mut rows = build_rows(GLOBAL_TEAM_ID, 1);
        rows.extend(build_rows(7, 3));

        let report = verify_chain(&rows);
        assert!(report.is_valid);
        assert_eq!(report.total_blocks, 3);
    }

    #[test]
    fn test_global_chain_is_verified_in_full() {
        let mut rows = build_rows(GLOBAL_TEAM_ID, 3);
        rows[0].event_type = "tampered".to_string();

        let report = verify_chain(&rows);
        assert!(!report.is_valid);
        assert_eq!(report.failure.unwrap().kind, FailureKind::InvalidGenesis);
    }

    #[test]
    fn test_tampered_genesis() {
        let mut rows = build_rows(7, 3);
        rows[0].attributes = r#"{"message":"forged"}"#.to_string();

        let report = verify_chain(&rows);
        assert!(!report.is_valid);
        assert_eq!(
            report.failure,
            Some(IntegrityFailure {
                sequence_number: 0,
                kind: FailureKind::InvalidGenesis
            })
        );
    }

    #[test]
    fn test_tampered_content_detected() {
        let mut rows = build_rows(7, 4);
        rows[2].actor_id = 99;

        let report = verify_chain(&rows);
        assert!(!report.is_valid);
        assert_eq!(
            report.failure,
            Some(IntegrityFailure {
                sequence_number: 2,
                kind: FailureKind::DigestMismatch
            })
        );
        assert!(report.summary().contains("digest mismatch at block 2"));
    }

    #[test]
    fn test_rewritten_digest_detected() {
        let mut rows = build_rows(7, 4);
        rows[1].digest = "f".repeat(64);

        let report = verify_chain(&rows);
        assert_eq!(
            report.failure,
            Some(IntegrityFailure {
                sequence_number: 1,
                kind: FailureKind::DigestMismatch
            })
        );
    }

    #[test]
    fn test_relinked_block_detected() {
        let mut rows = build_rows(7, 4);
        rows[2].previous_hash = "0".repeat(64);

        let report = verify_chain(&rows);
        assert_eq!(report.failure.unwrap().kind, FailureKind::BrokenLink);
    }

    #[test]
    fn test_deleted_block_detected() {
        let mut rows = build_rows(7, 4);
        rows.remove(2);

        let report = verify_chain(&rows);
        assert_eq!(
            report.failure,
            Some(IntegrityFailure {
                sequence_number: 3,
                kind: FailureKind::SequenceGap
            })
        );
    }

    #[test]
    fn test_annotation_does_not_affect_verification() {
        let mut rows = build_rows(7, 3);
        rows[1].verification_count = 10;
        rows[1].trust_score = 0.9;

        assert!(verify_chain(&rows).is_valid);
    }

    #[test]
    fn test_find_tampered_blocks() {
        let mut rows = build_rows(7, 4);
        rows[1].event_id = "forged".to_string();
        rows[3].content_hash = Some("abc".to_string());

        assert_eq!(find_tampered_blocks(&rows), vec![1, 3]);
    }
}
