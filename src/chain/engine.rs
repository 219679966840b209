//! Chain Engine
//!
//! Enforces the chain invariants on top of the ledger store: genesis
//! seeding, the append protocol, freeze state and integrity verification.
//! Every call names its team explicitly; there is no shared chain instance.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::block::{Block, NewEvent, TeamId, GENESIS_EVENT_TYPE, GLOBAL_TEAM_ID};
use crate::chain::store::LedgerStore;
use crate::chain::verify::{find_tampered_blocks, verify_chain, VerificationReport};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};

/// Engine behavior knobs, usually derived from [`LedgerConfig`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub auto_initialize: bool,
    pub include_global_genesis: bool,
    pub default_list_limit: u32,
    pub export_limit: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for EngineOptions {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            auto_initialize: config.auto_initialize,
            include_global_genesis: config.include_global_genesis,
            default_list_limit: config.default_list_limit,
            export_limit: config.export_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Uninitialized,
    Active,
    Frozen,
}

impl ChainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainState::Uninitialized => "uninitialized",
            ChainState::Active => "active",
            ChainState::Frozen => "frozen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStatus {
    pub team_id: TeamId,
    pub state: ChainState,
    pub frozen_at: Option<DateTime<Utc>>,
    pub total_blocks: i64,
    pub head_digest: Option<String>,
}

#[derive(Clone)]
pub struct ChainEngine {
    store: LedgerStore,
    options: EngineOptions,
}

impl ChainEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    pub fn with_options(store: LedgerStore, options: EngineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Create a team's chain and seed its genesis block (idempotent)
    pub async fn initialize(&self, team_id: TeamId) -> Result<Block> {
        self.store.initialize(team_id).await
    }

    /// Create the reserved global genesis block shown next to every chain
    pub async fn initialize_global(&self) -> Result<Block> {
        self.store.initialize(GLOBAL_TEAM_ID).await
    }

    async fn ensure_chain(&self, team_id: TeamId) -> Result<()> {
        if self.store.chain_metadata(team_id).await?.is_some() {
            return Ok(());
        }

        if self.options.auto_initialize {
            info!("Initializing chain for team {} on first append", team_id);
            self.store.initialize(team_id).await?;
            Ok(())
        } else {
            Err(LedgerError::chain_not_found(team_id))
        }
    }

    /// Append an event as the new tail of a team's chain.
    ///
    /// Reads the tail and writes the block without holding a lock; a
    /// concurrent writer that wins the same slot makes this call fail with
    /// [`LedgerError::Conflict`]. Replaying an already recorded event with
    /// identical content returns the stored block.
    pub async fn append(&self, team_id: TeamId, event: NewEvent) -> Result<Block> {
        if event.event_id.trim().is_empty() {
            return Err(LedgerError::InvalidEvent("event_id must not be empty".to_string()));
        }
        if event.event_type == GENESIS_EVENT_TYPE {
            return Err(LedgerError::InvalidEvent(format!(
                "event type {:?} is reserved",
                GENESIS_EVENT_TYPE
            )));
        }

        self.ensure_chain(team_id).await?;

        if self.store.is_frozen(team_id).await? {
            warn!(
                "Rejected event {} for frozen chain of team {}",
                event.event_id, team_id
            );
            return Err(LedgerError::ChainFrozen(team_id));
        }

        if let Some(existing) = self.recorded_replay(team_id, &event).await? {
            return Ok(existing);
        }

        let sequence_number = self.store.next_sequence_number(team_id).await?;
        let previous_hash = self.store.read_tail_hash(team_id).await?;

        let block = Block::new(team_id, sequence_number, previous_hash, event.clone())?;
        match self.store.append(&block).await {
            Ok(()) => {}
            // A concurrent writer recorded the same event after our lookup
            Err(LedgerError::DuplicateEvent(_)) => {
                if let Some(existing) = self.recorded_replay(team_id, &event).await? {
                    return Ok(existing);
                }
                return Err(LedgerError::DuplicateEvent(event.event_id));
            }
            Err(err) => return Err(err),
        }

        info!("Appended block to team {}: {}", team_id, block.summary());
        Ok(block)
    }

    /// The stored block for an already recorded event. Fails with
    /// [`LedgerError::DuplicateEvent`] when the id is taken by different
    /// content or another team.
    async fn recorded_replay(&self, team_id: TeamId, event: &NewEvent) -> Result<Option<Block>> {
        let Some(existing) = self.store.find_by_event_id(&event.event_id).await? else {
            return Ok(None);
        };

        if existing.team_id == team_id && existing.matches_event(event) {
            debug!(
                "Event {} already recorded as block {} of team {}",
                event.event_id, existing.sequence_number, team_id
            );
            Ok(Some(existing))
        } else {
            Err(LedgerError::DuplicateEvent(event.event_id.clone()))
        }
    }

    /// [`append`](Self::append), retried with fresh chain state while it
    /// loses sequence races, up to `max_attempts` tries in total
    pub async fn append_with_retry(
        &self,
        team_id: TeamId,
        event: NewEvent,
        max_attempts: u32,
    ) -> Result<Block> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.append(team_id, event.clone()).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    debug!(
                        "Append of {} to team {} conflicted (attempt {}/{}), retrying",
                        event.event_id, team_id, attempt, max_attempts
                    );
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    /// Update a block's verification summary. A missing block is not an
    /// error: score updates may overtake the append they refer to.
    pub async fn annotate(
        &self,
        event_id: &str,
        verification_count: i64,
        trust_score: f64,
    ) -> Result<()> {
        if !trust_score.is_finite() {
            return Err(LedgerError::InvalidEvent(format!(
                "trust_score must be finite, got {}",
                trust_score
            )));
        }

        if self
            .store
            .annotate(event_id, verification_count, trust_score)
            .await?
        {
            debug!(
                "Annotated event {}: {} verifications, trust {}",
                event_id, verification_count, trust_score
            );
        } else {
            debug!("No block for event {}; annotation skipped", event_id);
        }
        Ok(())
    }

    pub async fn find_by_event(&self, event_id: &str) -> Result<Block> {
        self.store
            .find_by_event_id(event_id)
            .await?
            .ok_or_else(|| LedgerError::event_not_found(event_id))
    }

    /// Newest-first blocks of a chain; `None` uses the configured default limit
    pub async fn list(&self, team_id: TeamId, limit: Option<u32>) -> Result<Vec<Block>> {
        let limit = limit.unwrap_or(self.options.default_list_limit);
        self.store
            .list_chain(team_id, limit, self.options.include_global_genesis)
            .await
    }

    /// Recompute linkage and digests of a team's chain from stored data
    pub async fn verify(&self, team_id: TeamId) -> Result<VerificationReport> {
        let rows = self.store.load_chain(team_id).await?;
        Ok(verify_chain(&rows))
    }

    /// Sequence numbers of every block whose stored digest no longer
    /// matches its contents
    pub async fn tampered_blocks(&self, team_id: TeamId) -> Result<Vec<i64>> {
        let rows = self.store.load_chain(team_id).await?;
        Ok(find_tampered_blocks(&rows))
    }

    /// Stop accepting appends. Freezing a frozen chain keeps its timestamp.
    pub async fn freeze(&self, team_id: TeamId) -> Result<()> {
        let metadata = self
            .store
            .chain_metadata(team_id)
            .await?
            .ok_or_else(|| LedgerError::chain_not_found(team_id))?;

        if metadata.frozen {
            debug!("Chain for team {} is already frozen", team_id);
            return Ok(());
        }

        self.store.set_frozen(team_id, true).await?;
        info!("Froze chain for team {}", team_id);
        Ok(())
    }

    pub async fn unfreeze(&self, team_id: TeamId) -> Result<()> {
        let metadata = self
            .store
            .chain_metadata(team_id)
            .await?
            .ok_or_else(|| LedgerError::chain_not_found(team_id))?;

        if !metadata.frozen {
            return Err(LedgerError::NotFrozen(team_id));
        }

        self.store.set_frozen(team_id, false).await?;
        info!("Unfroze chain for team {}", team_id);
        Ok(())
    }

    pub async fn status(&self, team_id: TeamId) -> Result<ChainStatus> {
        let Some(metadata) = self.store.chain_metadata(team_id).await? else {
            return Ok(ChainStatus {
                team_id,
                state: ChainState::Uninitialized,
                frozen_at: None,
                total_blocks: 0,
                head_digest: None,
            });
        };

        let total_blocks = self.store.block_count(team_id).await?;
        let head_digest = if total_blocks > 0 {
            Some(self.store.read_tail_hash(team_id).await?)
        } else {
            None
        };

        Ok(ChainStatus {
            team_id,
            state: if metadata.frozen {
                ChainState::Frozen
            } else {
                ChainState::Active
            },
            frozen_at: metadata.frozen_at,
            total_blocks,
            head_digest,
        })
    }
}
