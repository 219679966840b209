use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::block::{
    canonical_timestamp, Attributes, Block, CanonicalBlock, TeamId, GLOBAL_TEAM_ID,
    INITIAL_TRUST_SCORE, INITIAL_VERIFICATION_COUNT,
};
use crate::error::LedgerError;

/// A block exactly as persisted in the `blocks` table.
///
/// Verification works on these raw rows so that a corrupted column is
/// reported as an integrity finding instead of a decode error.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BlockRow {
    pub team_id: i64,
    pub sequence_number: i64,
    pub created_at: String,
    pub event_id: String,
    pub actor_id: i64,
    pub event_type: String,
    pub content_hash: Option<String>,
    pub attributes: String,
    pub previous_hash: String,
    pub verification_count: i64,
    pub trust_score: f64,
    pub digest: String,
}

impl BlockRow {
    pub fn from_block(block: &Block) -> Result<Self, serde_json::Error> {
        Ok(Self {
            team_id: block.team_id,
            sequence_number: block.sequence_number,
            created_at: canonical_timestamp(&block.created_at),
            event_id: block.event_id.clone(),
            actor_id: block.actor_id,
            event_type: block.event_type.clone(),
            content_hash: block.content_hash.clone(),
            attributes: serde_json::to_string(&block.attributes)?,
            previous_hash: block.previous_hash.clone(),
            verification_count: block.verification_count,
            trust_score: block.trust_score,
            digest: block.digest.clone(),
        })
    }

    /// Recompute the digest from the stored creation-time fields.
    ///
    /// Returns `None` when the stored attributes are no longer a JSON object.
    pub fn recompute_digest(&self) -> Option<String> {
        let attributes: Attributes = serde_json::from_str(&self.attributes).ok()?;

        CanonicalBlock {
            team_id: self.team_id,
            sequence_number: self.sequence_number,
            created_at: &self.created_at,
            event_id: &self.event_id,
            actor_id: self.actor_id,
            event_type: &self.event_type,
            content_hash: self.content_hash.as_deref(),
            attributes: &attributes,
            previous_hash: &self.previous_hash,
            verification_count: INITIAL_VERIFICATION_COUNT,
            trust_score: INITIAL_TRUST_SCORE,
        }
        .digest()
        .ok()
    }

    pub fn is_global_genesis(&self) -> bool {
        self.team_id == GLOBAL_TEAM_ID && self.sequence_number == 0
    }
}

impl TryFrom<BlockRow> for Block {
    type Error = LedgerError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        let created_at = parse_timestamp(&row.created_at)?;
        let attributes: Attributes = serde_json::from_str(&row.attributes)?;

        Ok(Block {
            team_id: row.team_id,
            sequence_number: row.sequence_number,
            created_at,
            event_id: row.event_id,
            actor_id: row.actor_id,
            event_type: row.event_type,
            content_hash: row.content_hash,
            attributes,
            previous_hash: row.previous_hash,
            verification_count: row.verification_count,
            trust_score: row.trust_score,
            digest: row.digest,
        })
    }
}

/// Per-team chain metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub team_id: TeamId,
    pub frozen: bool,
    pub frozen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ChainMetadataRow {
    pub team_id: i64,
    pub frozen: bool,
    pub frozen_at: Option<String>,
    pub created_at: String,
}

impl TryFrom<ChainMetadataRow> for ChainMetadata {
    type Error = LedgerError;

    fn try_from(row: ChainMetadataRow) -> Result<Self, Self::Error> {
        Ok(ChainMetadata {
            team_id: row.team_id,
            frozen: row.frozen,
            frozen_at: row.frozen_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| LedgerError::StorageUnavailable(format!("Corrupt timestamp {:?}: {}", value, e)))
}
