//! Team Chains
//!
//! Per-team, append-only, hash-linked ledgers of contribution events with
//! tamper detection, freezing and archive export.

pub mod block;
pub mod engine;
pub mod export;
pub mod merkle;
pub mod store;
pub mod verify;

pub use block::{
    Attributes, Block, NewEvent, TeamId, GENESIS_EVENT_ID, GENESIS_EVENT_TYPE, GLOBAL_TEAM_ID,
    ZERO_HASH,
};
pub use engine::{ChainEngine, ChainState, ChainStatus, EngineOptions};
pub use export::{ChainExport, ChainExporter, ExportManifest};
pub use merkle::{chain_merkle_root, merkle_root, verify_merkle_root};
pub use store::LedgerStore;
pub use verify::{find_tampered_blocks, verify_chain, FailureKind, IntegrityFailure, VerificationReport};
