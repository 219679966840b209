//! Team Ledger CLI
//!
//! Command-line access to team chains: initialize, append and annotate
//! events, inspect, verify, freeze and archive.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use team_ledger::chain::{
    verify_merkle_root, Attributes, Block, ChainEngine, ChainExporter, EngineOptions,
    LedgerStore, NewEvent, TeamId,
};
use team_ledger::config::{LedgerConfig, DEFAULT_CONFIG_FILE};
use team_ledger::database::Database;

#[derive(Parser)]
#[command(name = "team-ledger")]
#[command(about = "Tamper-evident per-team contribution ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (ledger.toml in the working directory when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overriding the configuration
    #[arg(long)]
    database_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a team chain with its genesis block
    Init {
        team_id: TeamId,

        /// Also create the global genesis block
        #[arg(long)]
        with_global: bool,
    },

    /// Append an event to a team chain
    Append {
        team_id: TeamId,

        /// Actor who produced the event
        #[arg(short, long)]
        actor_id: i64,

        /// Event type (document, code, meeting, ...)
        #[arg(short = 't', long)]
        event_type: String,

        /// Event identifier (random UUID when omitted)
        #[arg(short, long)]
        event_id: Option<String>,

        /// Hash of the event's content
        #[arg(long)]
        content_hash: Option<String>,

        /// Event attributes (key=value pairs, values parsed as JSON when possible)
        #[arg(long = "attr")]
        attributes: Vec<String>,

        /// Retry when another writer claims the same sequence number
        #[arg(long)]
        retry: bool,
    },

    /// Update the verification summary of a recorded event
    Annotate {
        event_id: String,

        #[arg(long)]
        verification_count: i64,

        #[arg(long)]
        trust_score: f64,
    },

    /// Show the block recording an event
    Show { event_id: String },

    /// List a team chain, newest first
    List {
        team_id: TeamId,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Verify a team chain's hash linkage and digests
    Verify {
        team_id: TeamId,

        /// Expected Merkle root of the exported chain
        #[arg(short, long)]
        merkle_root: Option<String>,
    },

    /// Stop accepting new blocks on a team chain
    Freeze { team_id: TeamId },

    /// Accept new blocks on a frozen team chain again
    Unfreeze { team_id: TeamId },

    /// Show the state of a team chain
    Status { team_id: TeamId },

    /// Export a team chain into an archive directory
    Export {
        team_id: TeamId,

        /// Archive directory (defaults to archives/team_<id>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "team_ledger=debug"
    } else {
        "team_ledger=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => LedgerConfig::load_from(path, true)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => LedgerConfig::load()
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_FILE))?,
    };
    if let Some(database_url) = cli.database_url.clone() {
        config.database_url = database_url;
    }

    let database = Database::from_config(&config)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    database.run_migrations().await?;
    info!("Ledger database ready at {}", config.database_url);

    let engine = ChainEngine::with_options(
        LedgerStore::new(database.pool().clone()),
        EngineOptions::from(&config),
    );

    let result = run(cli.command, &engine, &config).await;
    database.close().await;
    result
}

async fn run(command: Commands, engine: &ChainEngine, config: &LedgerConfig) -> Result<()> {
    match command {
        Commands::Init {
            team_id,
            with_global,
        } => {
            if with_global {
                let global = engine.initialize_global().await?;
                println!("Global genesis: {}", global.digest);
            }
            let genesis = engine.initialize(team_id).await?;
            println!("Chain for team {} initialized", team_id);
            println!("  Genesis digest: {}", genesis.digest);
        }

        Commands::Append {
            team_id,
            actor_id,
            event_type,
            event_id,
            content_hash,
            attributes,
            retry,
        } => {
            let event_id = event_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut event = NewEvent::new(event_id, actor_id, event_type)
                .with_attributes(parse_attributes(attributes)?);
            if let Some(content_hash) = content_hash {
                event = event.with_content_hash(content_hash);
            }

            let block = if retry {
                engine
                    .append_with_retry(team_id, event, config.max_append_retries)
                    .await?
            } else {
                engine.append(team_id, event).await?
            };

            println!("Block appended:");
            print_block(&block);
        }

        Commands::Annotate {
            event_id,
            verification_count,
            trust_score,
        } => {
            engine
                .annotate(&event_id, verification_count, trust_score)
                .await?;
            println!("Annotated event {}", event_id);
        }

        Commands::Show { event_id } => {
            let block = engine.find_by_event(&event_id).await?;
            println!("{}", serde_json::to_string_pretty(&block)?);
        }

        Commands::List { team_id, limit } => {
            let blocks = engine.list(team_id, limit).await?;
            if blocks.is_empty() {
                println!("No blocks for team {}", team_id);
            }
            for block in &blocks {
                println!("{}", block.summary());
            }
        }

        Commands::Verify {
            team_id,
            merkle_root,
        } => {
            let report = engine.verify(team_id).await?;
            println!("{}", report.summary());
            if !report.is_valid {
                let tampered = engine.tampered_blocks(team_id).await?;
                if !tampered.is_empty() {
                    let listed: Vec<String> = tampered.iter().map(i64::to_string).collect();
                    println!("  Tampered blocks: {}", listed.join(", "));
                }
            }

            let mut valid = report.is_valid;
            if let Some(expected) = merkle_root {
                let blocks = engine
                    .list(team_id, Some(engine.options().export_limit))
                    .await?;
                if blocks.is_empty() {
                    return Err(anyhow!("Chain for team {} has no blocks", team_id));
                }
                if verify_merkle_root(&blocks, &expected)? {
                    println!("Merkle root matches");
                } else {
                    println!("Merkle root mismatch");
                    valid = false;
                }
            }

            if !valid {
                error!("Chain for team {} failed verification", team_id);
                std::process::exit(1);
            }
        }

        Commands::Freeze { team_id } => {
            engine.freeze(team_id).await?;
            println!("Chain for team {} frozen", team_id);
        }

        Commands::Unfreeze { team_id } => {
            engine.unfreeze(team_id).await?;
            println!("Chain for team {} unfrozen", team_id);
        }

        Commands::Status { team_id } => {
            let status = engine.status(team_id).await?;
            println!("Team {}: {}", team_id, status.state.as_str());
            println!("  Blocks: {}", status.total_blocks);
            if let Some(head) = status.head_digest {
                println!("  Head: {}", head);
            }
            if let Some(frozen_at) = status.frozen_at {
                println!("  Frozen at: {}", frozen_at);
            }
        }

        Commands::Export { team_id, output } => {
            let output =
                output.unwrap_or_else(|| PathBuf::from("archives").join(format!("team_{}", team_id)));
            let exporter = ChainExporter::new(engine.clone());

            let export = exporter.export_chain(team_id).await?;
            exporter.save_export(&export, &output).await?;

            println!("Exported {} blocks to {}", export.total_blocks, output.display());
            println!("  Merkle root: {}", export.merkle_root);
            println!("  Valid: {}", export.is_valid);
        }
    }

    Ok(())
}

fn parse_attributes(pairs: Vec<String>) -> Result<Attributes> {
    let mut attributes = Attributes::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid attribute format, expected key=value: {}", pair))?;
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        attributes.insert(key.to_string(), value);
    }
    Ok(attributes)
}

fn print_block(block: &Block) {
    println!("  Team: {}", block.team_id);
    println!("  Sequence: {}", block.sequence_number);
    println!("  Event: {} ({})", block.event_id, block.event_type);
    println!("  Actor: {}", block.actor_id);
    println!("  Previous: {}", block.previous_hash);
    println!("  Digest: {}", block.digest);
}
