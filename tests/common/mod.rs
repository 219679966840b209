#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;

use team_ledger::chain::{ChainEngine, EngineOptions, LedgerStore, NewEvent, TeamId};
use team_ledger::database::Database;

/// Ledger backed by a database file in a temporary directory
pub struct TestLedger {
    pub database: Database,
    pub engine: ChainEngine,
    _temp_dir: TempDir,
}

impl TestLedger {
    pub fn store(&self) -> &LedgerStore {
        self.engine.store()
    }
}

/// Setup a file-backed SQLite ledger, shared by several pool connections
pub async fn setup_test_ledger() -> TestLedger {
    setup_test_ledger_with(EngineOptions::default()).await
}

pub async fn setup_test_ledger_with(options: EngineOptions) -> TestLedger {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let database_url = format!("sqlite://{}", temp_dir.path().join("ledger.db").display());

    let database = Database::connect(&database_url, 8, Duration::from_secs(10))
        .await
        .expect("Failed to open test database");
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    let engine = ChainEngine::with_options(LedgerStore::new(database.pool().clone()), options);

    TestLedger {
        database,
        engine,
        _temp_dir: temp_dir,
    }
}

/// Create a test contribution event
pub fn test_event(event_id: &str) -> NewEvent {
    NewEvent::new(event_id, 42, "document")
        .with_content_hash(format!("sha256-of-{}", event_id))
        .with_attribute("title", format!("Contribution {}", event_id))
        .with_attribute("hours", 2.5)
}

/// Initialize a chain and append `count` events to it
pub async fn seed_chain(engine: &ChainEngine, team_id: TeamId, count: usize) {
    engine
        .initialize(team_id)
        .await
        .expect("Failed to initialize chain");
    for i in 1..=count {
        engine
            .append(team_id, test_event(&format!("team{}-c{}", team_id, i)))
            .await
            .expect("Failed to append event");
    }
}
