//! Chain Archive Export
//!
//! Bundles a team chain into an archive directory holding the block list
//! (`blockchain.json`) and a manifest with the Merkle root, head digest and
//! verification result at export time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::chain::block::{Block, TeamId};
use crate::chain::engine::{ChainEngine, ChainState};
use crate::chain::merkle::chain_merkle_root;
use crate::error::{LedgerError, Result};

pub const BLOCKS_FILE: &str = "blockchain.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExport {
    pub team_id: TeamId,
    pub exported_at: DateTime<Utc>,
    pub total_blocks: usize,
    pub head_digest: String,
    pub merkle_root: String,
    pub is_valid: bool,
    /// Newest first, exactly as `list` returns them
    pub blocks: Vec<Block>,
}

/// Archive metadata written next to the block list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub team_id: TeamId,
    pub exported_at: DateTime<Utc>,
    pub total_blocks: usize,
    pub head_digest: String,
    pub merkle_root: String,
    pub is_valid: bool,
    pub export_tool_version: String,
}

impl ChainExport {
    pub fn manifest(&self) -> ExportManifest {
        ExportManifest {
            team_id: self.team_id,
            exported_at: self.exported_at,
            total_blocks: self.total_blocks,
            head_digest: self.head_digest.clone(),
            merkle_root: self.merkle_root.clone(),
            is_valid: self.is_valid,
            export_tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Pretty-printed JSON array of the exported blocks
    pub fn blocks_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.blocks)?)
    }
}

pub struct ChainExporter {
    engine: ChainEngine,
}

impl ChainExporter {
    pub fn new(engine: ChainEngine) -> Self {
        Self { engine }
    }

    /// Snapshot a team chain, capped at the configured export limit
    pub async fn export_chain(&self, team_id: TeamId) -> Result<ChainExport> {
        if self.engine.status(team_id).await?.state == ChainState::Uninitialized {
            return Err(LedgerError::chain_not_found(team_id));
        }

        let limit = self.engine.options().export_limit;
        let blocks = self.engine.list(team_id, Some(limit)).await?;
        let report = self.engine.verify(team_id).await?;

        let head_digest = blocks
            .iter()
            .find(|block| block.team_id == team_id)
            .map(|block| block.digest.clone())
            .ok_or_else(|| LedgerError::chain_not_found(team_id))?;
        let merkle_root = chain_merkle_root(&blocks)?;

        if !report.is_valid {
            warn!("Exporting chain for team {}: {}", team_id, report.summary());
        }

        Ok(ChainExport {
            team_id,
            exported_at: Utc::now(),
            total_blocks: blocks.len(),
            head_digest,
            merkle_root,
            is_valid: report.is_valid,
            blocks,
        })
    }

    /// Write `blockchain.json` and `manifest.json` into `output_dir`
    pub async fn save_export(&self, export: &ChainExport, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            LedgerError::StorageUnavailable(format!(
                "Failed to create archive directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let manifest = serde_json::to_string_pretty(&export.manifest())?;
        write_file(&output_dir.join(BLOCKS_FILE), export.blocks_json()?).await?;
        write_file(&output_dir.join(MANIFEST_FILE), manifest).await?;

        info!(
            "Exported {} blocks of team {} to {}",
            export.total_blocks,
            export.team_id,
            output_dir.display()
        );
        Ok(())
    }

    /// Load an archive directory written by [`save_export`](Self::save_export)
    pub async fn load_export(&self, archive_dir: &Path) -> Result<ChainExport> {
        let manifest: ExportManifest =
            serde_json::from_str(&read_file(&archive_dir.join(MANIFEST_FILE)).await?)?;
        let blocks: Vec<Block> =
            serde_json::from_str(&read_file(&archive_dir.join(BLOCKS_FILE)).await?)?;

        Ok(ChainExport {
            team_id: manifest.team_id,
            exported_at: manifest.exported_at,
            total_blocks: manifest.total_blocks,
            head_digest: manifest.head_digest,
            merkle_root: manifest.merkle_root,
            is_valid: manifest.is_valid,
            blocks,
        })
    }

    /// Check an export against its own manifest values.
    ///
    /// Every block digest must match its contents, the team's blocks must
    /// link to each other, and the recorded Merkle root and head digest must
    /// match the block list.
    pub fn verify_export(&self, export: &ChainExport) -> Result<bool> {
        if export.blocks.len() != export.total_blocks {
            return Ok(false);
        }

        if let Some(tampered) = export.blocks.iter().find(|block| !block.verify_digest()) {
            warn!(
                "Export of team {} holds tampered block {}",
                export.team_id, tampered.sequence_number
            );
            return Ok(false);
        }

        let mut own: Vec<&Block> = export
            .blocks
            .iter()
            .filter(|block| block.team_id == export.team_id)
            .collect();
        own.sort_by_key(|block| block.sequence_number);

        let linked = own.windows(2).all(|pair| {
            pair[1].sequence_number == pair[0].sequence_number + 1
                && pair[1].previous_hash == pair[0].digest
        });
        let head_matches = own
            .last()
            .is_some_and(|head| head.digest == export.head_digest);

        Ok(linked && head_matches && chain_merkle_root(&export.blocks)? == export.merkle_root)
    }
}

async fn write_file(path: &Path, content: String) -> Result<()> {
    tokio::fs::write(path, content).await.map_err(|e| {
        LedgerError::StorageUnavailable(format!("Failed to write {}: {}", path.display(), e))
    })
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        LedgerError::StorageUnavailable(format!("Failed to read {}: {}", path.display(), e))
    })
}
