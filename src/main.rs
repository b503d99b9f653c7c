use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shopfind::config::Settings;
use shopfind::corpus::EntryId;
use shopfind::embedding::FastEmbedEncoder;
use shopfind::lifecycle::{CancelToken, ServiceCell};
use shopfind::storage::Snapshot;

#[derive(Parser)]
#[command(name = "shopfind")]
#[command(about = "Semantic product retrieval over a quantized inverted-file index")]
#[command(version)]
struct Cli {
    /// Path to a settings file (defaults to .shopfind/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index from the corpus, or load an existing snapshot
    Build {
        /// Discard any existing snapshot and rebuild from the corpus
        #[arg(long)]
        force: bool,
    },
    /// Search the catalog
    Search {
        /// Query text, or a catalog id for an exact lookup
        query: String,
        /// Number of approximate results
        #[arg(short, default_value_t = 10)]
        k: usize,
        /// Print one formatted context line per hit instead of JSON
        #[arg(long)]
        format: bool,
    },
    /// Replace the description of one entry and re-encode it
    Update {
        /// Catalog id
        id: u32,
        /// New description text
        description: String,
    },
    /// Remove an entry from the catalog
    Remove {
        /// Catalog id
        id: u32,
    },
    /// Retrain the index from cached vectors, dropping stale postings
    Rebuild,
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    if let Command::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let encoder = Arc::new(FastEmbedEncoder::new(&settings.embedding)?);
    let snapshot = Snapshot::new(settings.storage_path.clone());
    let cell = ServiceCell::new();
    let token = CancelToken::none();

    match cli.command {
        Command::Build { force } => {
            if force {
                snapshot.clear().context("failed to clear snapshot")?;
            }
            let service = cell.get_or_init(&settings, encoder, &token)?;
            println!(
                "index ready: {} entries, stale ratio {:.3}",
                service.entry_count(),
                service.stale_ratio()
            );
        }
        Command::Search { query, k, format } => {
            let service = cell.get_or_init(&settings, encoder, &token)?;
            if format {
                println!("{}", service.search_and_format(&query, k)?);
            } else {
                let results = service.search(&query, k)?;
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Command::Update { id, description } => {
            let id = EntryId::new(id).context("catalog id must be greater than zero")?;
            let service = cell.get_or_init(&settings, encoder.clone(), &token)?;
            let mut updates = HashMap::new();
            updates.insert(id, description);
            service.update_descriptions(&updates)?;
            service.persist(&snapshot, encoder.model_name())?;
            println!("updated entry {id}");
        }
        Command::Remove { id } => {
            let id = EntryId::new(id).context("catalog id must be greater than zero")?;
            let service = cell.get_or_init(&settings, encoder.clone(), &token)?;
            service.remove_by_id(id)?;
            service.persist(&snapshot, encoder.model_name())?;
            println!("removed entry {id}");
        }
        Command::Rebuild => {
            let service = cell.get_or_init(&settings, encoder.clone(), &token)?;
            service.rebuild()?;
            service.persist(&snapshot, encoder.model_name())?;
            println!(
                "rebuilt index: {} entries, stale ratio {:.3}",
                service.entry_count(),
                service.stale_ratio()
            );
        }
        Command::Config => unreachable!("handled above"),
    }

    Ok(())
}
