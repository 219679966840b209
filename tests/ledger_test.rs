//! Team Ledger Integration Tests
//!
//! Exercises team chains end to end against an on-disk database: the
//! freeze lifecycle, annotation, tamper detection and the global genesis.

mod common;

use common::{seed_chain, setup_test_ledger, setup_test_ledger_with, test_event};
use team_ledger::chain::{ChainEngine, EngineOptions, FailureKind, ZERO_HASH};
use team_ledger::LedgerError;

#[tokio::test]
async fn test_team_chain_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    let engine = &ledger.engine;

    let genesis = engine.initialize(7).await?;
    assert_eq!(genesis.sequence_number, 0);
    assert_eq!(genesis.previous_hash, ZERO_HASH);
    assert_eq!(ledger.store().block_count(7).await?, 1);
    assert!(engine.verify(7).await?.is_valid);

    let c1 = engine.append(7, test_event("c1")).await?;
    assert_eq!(c1.sequence_number, 1);
    assert_eq!(c1.previous_hash, genesis.digest);
    assert!(engine.verify(7).await?.is_valid);

    engine.freeze(7).await?;
    let err = engine.append(7, test_event("c2")).await.unwrap_err();
    assert!(matches!(err, LedgerError::ChainFrozen(7)));
    assert_eq!(ledger.store().block_count(7).await?, 2);
    assert!(engine.verify(7).await?.is_valid);

    engine.unfreeze(7).await?;
    let c2 = engine.append(7, test_event("c2")).await?;
    assert_eq!(c2.sequence_number, 2);
    assert_eq!(c2.previous_hash, c1.digest);

    let report = engine.verify(7).await?;
    assert!(report.is_valid);
    assert_eq!(report.total_blocks, 3);
    assert_eq!(report.message(), "Blockchain is valid");

    Ok(())
}

#[tokio::test]
async fn test_blocks_link_to_predecessors() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger_with(EngineOptions {
        include_global_genesis: false,
        ..EngineOptions::default()
    })
    .await;
    seed_chain(&ledger.engine, 7, 6).await;

    let mut blocks = ledger.engine.list(7, None).await?;
    blocks.reverse();

    assert_eq!(blocks.len(), 7);
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].sequence_number, pair[0].sequence_number + 1);
        assert_eq!(pair[1].previous_hash, pair[0].digest);
        assert!(pair[1].verify_digest());
    }

    Ok(())
}

#[tokio::test]
async fn test_teams_are_independent() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 3).await;
    seed_chain(&ledger.engine, 8, 1).await;

    ledger.engine.freeze(8).await?;
    ledger.engine.append(7, test_event("extra")).await?;

    assert_eq!(ledger.store().block_count(7).await?, 5);
    assert_eq!(ledger.store().block_count(8).await?, 2);
    assert!(ledger.engine.verify(7).await?.is_valid);
    assert!(ledger.engine.verify(8).await?.is_valid);

    Ok(())
}

#[tokio::test]
async fn test_annotation_keeps_chain_valid() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 3).await;

    let before = ledger.engine.find_by_event("team7-c2").await?;
    ledger.engine.annotate("team7-c2", 5, 0.8).await?;
    ledger.engine.annotate("team7-c2", 6, 0.85).await?;

    let after = ledger.engine.find_by_event("team7-c2").await?;
    assert_eq!(after.verification_count, 6);
    assert_eq!(after.trust_score, 0.85);
    assert_eq!(after.digest, before.digest);
    assert!(ledger.engine.verify(7).await?.is_valid);

    Ok(())
}

#[tokio::test]
async fn test_tampering_any_field_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let tampering = [
        "UPDATE blocks SET created_at = '2001-01-01T00:00:00.000000Z' WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET event_id = 'forged-' || team_id WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET actor_id = 99 WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET event_type = 'code' WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET content_hash = NULL WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET attributes = '{\"title\":\"forged\"}' WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET previous_hash = digest WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET digest = previous_hash WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET sequence_number = 10 WHERE team_id = ? AND sequence_number = 1",
        "UPDATE blocks SET attributes = '[]' WHERE team_id = ? AND sequence_number = 1",
    ];

    let ledger = setup_test_ledger().await;

    for (i, statement) in tampering.iter().enumerate() {
        let team_id = 100 + i as i64;
        seed_chain(&ledger.engine, team_id, 3).await;
        assert!(ledger.engine.verify(team_id).await?.is_valid);

        sqlx::query(statement)
            .bind(team_id)
            .execute(ledger.database.pool())
            .await?;

        let report = ledger.engine.verify(team_id).await?;
        assert!(!report.is_valid, "tampering not detected: {}", statement);
        assert_eq!(report.message(), "Blockchain integrity compromised");
    }

    Ok(())
}

#[tokio::test]
async fn test_tampered_genesis_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 2).await;

    sqlx::query("UPDATE blocks SET actor_id = 1 WHERE team_id = 7 AND sequence_number = 0")
        .execute(ledger.database.pool())
        .await?;

    let report = ledger.engine.verify(7).await?;
    assert!(!report.is_valid);
    assert_eq!(report.failure.map(|f| f.kind), Some(FailureKind::InvalidGenesis));

    Ok(())
}

#[tokio::test]
async fn test_deleted_block_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 4).await;

    sqlx::query("DELETE FROM blocks WHERE team_id = 7 AND sequence_number = 2")
        .execute(ledger.database.pool())
        .await?;

    let report = ledger.engine.verify(7).await?;
    assert!(!report.is_valid);
    assert_eq!(report.failure.map(|f| f.kind), Some(FailureKind::SequenceGap));

    Ok(())
}

#[tokio::test]
async fn test_global_genesis_listing() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    let global = ledger.engine.initialize_global().await?;
    seed_chain(&ledger.engine, 7, 2).await;

    let blocks = ledger.engine.list(7, None).await?;
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0].sequence_number, 2);
    assert_eq!(blocks[2].team_id, 7);
    assert_eq!(blocks[3], global);

    // Listing the global chain itself shows it once
    let global_blocks = ledger.engine.list(0, None).await?;
    assert_eq!(global_blocks.len(), 1);

    assert!(ledger.engine.verify(0).await?.is_valid);
    assert!(ledger.engine.verify(7).await?.is_valid);

    Ok(())
}

#[tokio::test]
async fn test_find_by_event() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 2).await;

    let block = ledger.engine.find_by_event("team7-c1").await?;
    assert_eq!(block.team_id, 7);
    assert_eq!(block.sequence_number, 1);
    assert_eq!(block.attributes["hours"], 2.5);

    let err = ledger.engine.find_by_event("missing").await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let err = ledger.engine.find_by_event("genesis").await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_event_ids_are_unique_across_teams() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 0).await;
    seed_chain(&ledger.engine, 8, 0).await;

    ledger.engine.append(7, test_event("shared")).await?;
    let err = ledger
        .engine
        .append(8, test_event("shared"))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::DuplicateEvent(_)));
    assert_eq!(ledger.store().block_count(8).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_engine_handles_share_stored_state() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 3).await;
    let head = ledger.engine.status(7).await?.head_digest;

    let reopened = ChainEngine::new(ledger.store().clone());
    let status = reopened.status(7).await?;
    assert_eq!(status.head_digest, head);
    assert_eq!(status.total_blocks, 4);
    assert!(reopened.verify(7).await?.is_valid);

    Ok(())
}

#[tokio::test]
async fn test_tampered_blocks_are_listed() -> Result<(), Box<dyn std::error::Error>> {
    let ledger = setup_test_ledger().await;
    seed_chain(&ledger.engine, 7, 5).await;
    assert!(ledger.engine.tampered_blocks(7).await?.is_empty());

    sqlx::query("UPDATE blocks SET actor_id = 99 WHERE team_id = 7 AND sequence_number IN (2, 4)")
        .execute(ledger.database.pool())
        .await?;

    assert!(!ledger.engine.verify(7).await?.is_valid);
    assert_eq!(ledger.engine.tampered_blocks(7).await?, vec![2, 4]);

    Ok(())
}
