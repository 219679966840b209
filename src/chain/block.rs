//! Ledger Block
//!
//! Defines the immutable block record of a team chain and the canonical
//! encoding its digest commits to.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Tenant identifier owning exactly one chain
pub type TeamId = i64;

/// Free-form event metadata, serialized with sorted keys
pub type Attributes = Map<String, Value>;

/// Reserved tenant whose genesis block is shown alongside every chain
pub const GLOBAL_TEAM_ID: TeamId = 0;

pub const GENESIS_EVENT_ID: &str = "genesis";
pub const GENESIS_EVENT_TYPE: &str = "genesis";

/// Predecessor hash of every genesis block
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Summary values every block is created (and hashed) with
pub const INITIAL_VERIFICATION_COUNT: i64 = 0;
pub const INITIAL_TRUST_SCORE: f64 = 0.0;

/// Event data supplied by the contribution-tracking collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: String,
    pub actor_id: i64,
    pub event_type: String,
    pub content_hash: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl NewEvent {
    pub fn new(event_id: impl Into<String>, actor_id: i64, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            actor_id,
            event_type: event_type.into(),
            content_hash: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// One ledger record. Everything except `verification_count` and
/// `trust_score` is immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub team_id: TeamId,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub event_id: String,
    pub actor_id: i64,
    pub event_type: String,
    pub content_hash: Option<String>,
    pub attributes: Attributes,
    pub previous_hash: String,
    pub verification_count: i64,
    pub trust_score: f64,
    pub digest: String,
}

/// Fields committed by a digest, in canonical order
#[derive(Serialize)]
pub(crate) struct CanonicalBlock<'a> {
    pub(crate) team_id: TeamId,
    pub(crate) sequence_number: i64,
    pub(crate) created_at: &'a str,
    pub(crate) event_id: &'a str,
    pub(crate) actor_id: i64,
    pub(crate) event_type: &'a str,
    pub(crate) content_hash: Option<&'a str>,
    pub(crate) attributes: &'a Attributes,
    pub(crate) previous_hash: &'a str,
    pub(crate) verification_count: i64,
    pub(crate) trust_score: f64,
}

impl CanonicalBlock<'_> {
    pub(crate) fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub(crate) fn digest(&self) -> Result<String, serde_json::Error> {
        Ok(sha256_hex(self.encode()?.as_bytes()))
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Timestamp rendering used both in storage and in the digest input
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Block {
    /// Create a new block and calculate its digest
    pub fn new(
        team_id: TeamId,
        sequence_number: i64,
        previous_hash: String,
        event: NewEvent,
    ) -> Result<Self, serde_json::Error> {
        // Storage keeps microseconds, so the hashed value must too
        let created_at = Utc::now().trunc_subsecs(6);

        let mut block = Self {
            team_id,
            sequence_number,
            created_at,
            event_id: event.event_id,
            actor_id: event.actor_id,
            event_type: event.event_type,
            content_hash: event.content_hash,
            attributes: event.attributes,
            previous_hash,
            verification_count: INITIAL_VERIFICATION_COUNT,
            trust_score: INITIAL_TRUST_SCORE,
            digest: String::new(),
        };

        block.digest = block.calculate_digest()?;
        Ok(block)
    }

    /// Genesis block for a team chain
    pub fn genesis(team_id: TeamId) -> Result<Self, serde_json::Error> {
        let event = NewEvent::new(GENESIS_EVENT_ID, 0, GENESIS_EVENT_TYPE).with_attribute(
            "message",
            format!("ContriBook Genesis Block for team {}", team_id),
        );
        Self::new(team_id, 0, ZERO_HASH.to_string(), event)
    }

    fn canonical<'a>(&'a self, created_at: &'a str) -> CanonicalBlock<'a> {
        CanonicalBlock {
            team_id: self.team_id,
            sequence_number: self.sequence_number,
            created_at,
            event_id: &self.event_id,
            actor_id: self.actor_id,
            event_type: &self.event_type,
            content_hash: self.content_hash.as_deref(),
            attributes: &self.attributes,
            previous_hash: &self.previous_hash,
            verification_count: INITIAL_VERIFICATION_COUNT,
            trust_score: INITIAL_TRUST_SCORE,
        }
    }

    /// Canonical string representation the digest is taken over
    pub fn canonical_string(&self) -> Result<String, serde_json::Error> {
        let created_at = canonical_timestamp(&self.created_at);
        self.canonical(&created_at).encode()
    }

    /// Calculate the SHA-256 digest of this block's creation-time state
    pub fn calculate_digest(&self) -> Result<String, serde_json::Error> {
        let created_at = canonical_timestamp(&self.created_at);
        self.canonical(&created_at).digest()
    }

    /// Verify this block's stored digest
    pub fn verify_digest(&self) -> bool {
        self.calculate_digest()
            .map(|digest| digest == self.digest)
            .unwrap_or(false)
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_number == 0
    }

    pub fn is_global_genesis(&self) -> bool {
        self.team_id == GLOBAL_TEAM_ID && self.is_genesis()
    }

    /// Whether a replayed event carries the same content as this block
    pub fn matches_event(&self, event: &NewEvent) -> bool {
        self.event_id == event.event_id
            && self.actor_id == event.actor_id
            && self.event_type == event.event_type
            && self.content_hash == event.content_hash
            && self.attributes == event.attributes
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {}: {} by {} ({})",
            self.sequence_number, self.event_type, self.event_id, self.actor_id, self.digest
        )
    }
}
