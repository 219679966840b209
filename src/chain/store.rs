//! Ledger Store
//!
//! Durable, ordered storage of team chains and their freeze metadata.
//! An append is a single conditional insert, so two writers can never both
//! claim the same sequence slot no matter how many processes share the file.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::chain::block::{canonical_timestamp, Block, TeamId, ZERO_HASH};
use crate::database::models::{BlockRow, ChainMetadata, ChainMetadataRow};
use crate::database::schema::LEDGER_SCHEMA;
use crate::error::{LedgerError, Result};

/// Storage handle shared by every team chain in one database
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(LEDGER_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Create the chain for a team and seed its genesis block.
    ///
    /// Idempotent: a chain that already holds blocks is left untouched and
    /// its existing genesis block is returned.
    pub async fn initialize(&self, team_id: TeamId) -> Result<Block> {
        self.ensure_schema().await?;

        let genesis = BlockRow::from_block(&Block::genesis(team_id)?)?;
        let now = canonical_timestamp(&Utc::now());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chain_metadata (team_id, frozen, frozen_at, created_at)
            VALUES (?, 0, NULL, ?)
            "#,
        )
        .bind(team_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let seeded = sqlx::query(
            r#"
            INSERT INTO blocks
            (team_id, sequence_number, created_at, event_id, actor_id, event_type,
             content_hash, attributes, previous_hash, verification_count, trust_score, digest)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM blocks WHERE team_id = ?)
            "#,
        )
        .bind(genesis.team_id)
        .bind(genesis.sequence_number)
        .bind(&genesis.created_at)
        .bind(&genesis.event_id)
        .bind(genesis.actor_id)
        .bind(&genesis.event_type)
        .bind(&genesis.content_hash)
        .bind(&genesis.attributes)
        .bind(&genesis.previous_hash)
        .bind(genesis.verification_count)
        .bind(genesis.trust_score)
        .bind(&genesis.digest)
        .bind(team_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let stored = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT team_id, sequence_number, created_at, event_id, actor_id, event_type,
                   content_hash, attributes, previous_hash, verification_count, trust_score, digest
            FROM blocks
            WHERE team_id = ? AND sequence_number = 0
            "#,
        )
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let genesis = stored.ok_or_else(|| {
            LedgerError::StorageUnavailable(format!(
                "Chain for team {} has blocks but no genesis block",
                team_id
            ))
        })?;
        let genesis = Block::try_from(genesis)?;

        if seeded {
            info!("Initialized chain for team {} with genesis {}", team_id, genesis.digest);
        } else {
            debug!("Chain for team {} already initialized", team_id);
        }

        Ok(genesis)
    }

    /// Persist a fully formed block as the new tail of its chain.
    ///
    /// The insert only happens if the block's sequence number is exactly one
    /// past the current tail, its `previous_hash` is the current tail digest
    /// and the chain is not frozen. Otherwise nothing is written.
    pub async fn append(&self, block: &Block) -> Result<()> {
        let row = BlockRow::from_block(block)?;

        let result = sqlx::query(
            r#"
            INSERT INTO blocks
            (team_id, sequence_number, created_at, event_id, actor_id, event_type,
             content_hash, attributes, previous_hash, verification_count, trust_score, digest)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE COALESCE((SELECT MAX(sequence_number) FROM blocks WHERE team_id = ?), -1) + 1 = ?
              AND COALESCE((SELECT digest FROM blocks WHERE team_id = ?
                            ORDER BY sequence_number DESC LIMIT 1), ?) = ?
              AND NOT EXISTS (SELECT 1 FROM chain_metadata WHERE team_id = ? AND frozen = 1)
            "#,
        )
        .bind(row.team_id)
        .bind(row.sequence_number)
        .bind(&row.created_at)
        .bind(&row.event_id)
        .bind(row.actor_id)
        .bind(&row.event_type)
        .bind(&row.content_hash)
        .bind(&row.attributes)
        .bind(&row.previous_hash)
        .bind(row.verification_count)
        .bind(row.trust_score)
        .bind(&row.digest)
        .bind(row.team_id)
        .bind(row.sequence_number)
        .bind(row.team_id)
        .bind(ZERO_HASH)
        .bind(&row.previous_hash)
        .bind(row.team_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!(
                    "Stored block {} for team {} ({})",
                    row.sequence_number, row.team_id, row.digest
                );
                Ok(())
            }
            Ok(_) => {
                if self.is_frozen(row.team_id).await? {
                    warn!(
                        "Chain for team {} was frozen before block {} could be stored",
                        row.team_id, row.sequence_number
                    );
                    Err(LedgerError::ChainFrozen(row.team_id))
                } else {
                    debug!(
                        "Sequence {} on team {} lost to a concurrent writer",
                        row.sequence_number, row.team_id
                    );
                    Err(LedgerError::Conflict {
                        team_id: row.team_id,
                        sequence_number: row.sequence_number,
                    })
                }
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if db_err.message().contains("event_id") {
                    Err(LedgerError::DuplicateEvent(row.event_id))
                } else {
                    Err(LedgerError::Conflict {
                        team_id: row.team_id,
                        sequence_number: row.sequence_number,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Digest of the last block, or the zero hash for an empty chain
    pub async fn read_tail_hash(&self, team_id: TeamId) -> Result<String> {
        let digest = sqlx::query_scalar::<_, String>(
            r#"
            SELECT digest FROM blocks
            WHERE team_id = ?
            ORDER BY sequence_number DESC
            LIMIT 1
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(digest.unwrap_or_else(|| ZERO_HASH.to_string()))
    }

    pub async fn next_sequence_number(&self, team_id: TeamId) -> Result<i64> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(sequence_number) FROM blocks WHERE team_id = ?",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(max.map_or(0, |max| max + 1))
    }

    /// Look up a block by event id across every team. Genesis sentinels are
    /// not events and never match.
    pub async fn find_by_event_id(&self, event_id: &str) -> Result<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT team_id, sequence_number, created_at, event_id, actor_id, event_type,
                   content_hash, attributes, previous_hash, verification_count, trust_score, digest
            FROM blocks
            WHERE event_id = ? AND sequence_number > 0
            LIMIT 1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Block::try_from).transpose()
    }

    /// Newest-first listing of a chain, optionally including the global
    /// genesis block after the team's own blocks.
    pub async fn list_chain(
        &self,
        team_id: TeamId,
        limit: u32,
        include_global: bool,
    ) -> Result<Vec<Block>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT team_id, sequence_number, created_at, event_id, actor_id, event_type,
                   content_hash, attributes, previous_hash, verification_count, trust_score, digest
            FROM blocks
            WHERE team_id = ? OR (? AND team_id = 0 AND sequence_number = 0)
            ORDER BY sequence_number DESC, team_id DESC
            LIMIT ?
            "#,
        )
        .bind(team_id)
        .bind(include_global)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Block::try_from).collect()
    }

    /// Every stored row of a chain in ascending sequence order
    pub async fn load_chain(&self, team_id: TeamId) -> Result<Vec<BlockRow>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT team_id, sequence_number, created_at, event_id, actor_id, event_type,
                   content_hash, attributes, previous_hash, verification_count, trust_score, digest
            FROM blocks
            WHERE team_id = ?
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Update the summary fields of the block recording `event_id`.
    ///
    /// Returns whether a block matched. The digest is left alone.
    pub async fn annotate(
        &self,
        event_id: &str,
        verification_count: i64,
        trust_score: f64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE blocks
            SET verification_count = ?, trust_score = ?
            WHERE event_id = ? AND sequence_number > 0
            "#,
        )
        .bind(verification_count)
        .bind(trust_score)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Toggle the freeze flag. Freezing an already frozen chain keeps the
    /// first `frozen_at`; unfreezing clears it.
    pub async fn set_frozen(&self, team_id: TeamId, frozen: bool) -> Result<()> {
        let result = if frozen {
            sqlx::query(
                r#"
                UPDATE chain_metadata
                SET frozen = 1,
                    frozen_at = CASE WHEN frozen = 1 THEN frozen_at ELSE ? END
                WHERE team_id = ?
                "#,
            )
            .bind(canonical_timestamp(&Utc::now()))
            .bind(team_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE chain_metadata
                SET frozen = 0, frozen_at = NULL
                WHERE team_id = ?
                "#,
            )
            .bind(team_id)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(LedgerError::chain_not_found(team_id));
        }

        Ok(())
    }

    pub async fn is_frozen(&self, team_id: TeamId) -> Result<bool> {
        let frozen = sqlx::query_scalar::<_, bool>(
            "SELECT frozen FROM chain_metadata WHERE team_id = ?",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(frozen.unwrap_or(false))
    }

    pub async fn chain_metadata(&self, team_id: TeamId) -> Result<Option<ChainMetadata>> {
        let row = sqlx::query_as::<_, ChainMetadataRow>(
            r#"
            SELECT team_id, frozen, frozen_at, created_at
            FROM chain_metadata
            WHERE team_id = ?
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChainMetadata::try_from).transpose()
    }

    pub async fn block_count(&self, team_id: TeamId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blocks WHERE team_id = ?")
            .bind(team_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
