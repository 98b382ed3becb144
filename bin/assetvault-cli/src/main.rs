//! AssetVault CLI - Operator Command Line Interface
//!
//! Opens the store described by a TOML configuration file (replaying any
//! uploads a previous run left pending) and runs one command against it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use assetvault_common::{Asset, AssetId, AssetType, Config};
use assetvault_replica::{CacheRule, ReplicatedStore, StoreBuilder};
use assetvault_storage::AssetFilter;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "assetvault-cli")]
#[command(about = "AssetVault operator CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/assetvault/assetvault.toml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch an asset from the local store or upstream
    Get {
        /// Asset ID
        id: AssetId,
        /// Ignore the local copy and go upstream
        #[arg(long)]
        skip_read: bool,
        /// Do not cache a remote result locally
        #[arg(long)]
        skip_write: bool,
        /// Write the asset data to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a file as a new asset
    Put {
        /// File holding the asset data
        file: PathBuf,
        /// Numeric asset type
        #[arg(short = 't', long = "type", default_value_t = -1, allow_hyphen_values = true)]
        asset_type: i8,
        /// Asset ID (random if omitted)
        #[arg(long)]
        id: Option<AssetId>,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        temporary: bool,
        #[arg(long)]
        local: bool,
    },
    /// Delete one asset from the local store
    Purge {
        /// Asset ID
        id: AssetId,
    },
    /// Delete every local asset matching the given conditions
    PurgeAll {
        /// Regular expression over the 32-character hex id
        #[arg(long)]
        id: Option<String>,
        /// Numeric asset type
        #[arg(short = 't', long = "type", allow_hyphen_values = true)]
        asset_type: Option<i8>,
        #[arg(long)]
        local: Option<bool>,
        #[arg(long)]
        temporary: Option<bool>,
        /// Created at or after (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        created_after: Option<DateTime<Utc>>,
        /// Created at or before (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        created_before: Option<DateTime<Utc>>,
        /// Regular expression over the name
        #[arg(long)]
        name: Option<String>,
        /// Regular expression over the description
        #[arg(long)]
        description: Option<String>,
        /// Every bit must be set in the asset's storage flags
        #[arg(long)]
        storage_flags: Option<u32>,
        /// Purge everything when no condition is given
        #[arg(long)]
        all: bool,
    },
    /// Replay pending uploads and report the outcome
    Replay,
    /// Show store, log and backend status
    Status,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time {s:?}: {e}"))
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("Config file {} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args.config)?;
    let replicated = StoreBuilder::from_config(&config)?.build().await?;
    info!("Opened asset store using {}", args.config.display());

    match args.command {
        Commands::Get {
            id,
            skip_read,
            skip_write,
            output,
        } => get(&replicated, id, skip_read, skip_write, output).await,
        Commands::Put {
            file,
            asset_type,
            id,
            name,
            description,
            temporary,
            local,
        } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let asset = Asset::new(id.unwrap_or_else(AssetId::new), AssetType::new(asset_type), data)
                .with_name(name)
                .with_description(description)
                .with_temporary(temporary)
                .with_local(local);
            let id = asset.id;
            replicated.writer().put(Arc::new(asset)).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Purge { id } => {
            replicated.store().purge(id)?;
            println!("Purged {id}");
            Ok(())
        }
        Commands::PurgeAll {
            id,
            asset_type,
            local,
            temporary,
            created_after,
            created_before,
            name,
            description,
            storage_flags,
            all,
        } => {
            let mut filter = AssetFilter::new();
            if let Some(pattern) = id {
                filter = filter.with_id_pattern(&pattern)?;
            }
            if let Some(asset_type) = asset_type {
                filter = filter.with_type(AssetType::new(asset_type));
            }
            if let Some(local) = local {
                filter = filter.with_local(local);
            }
            if let Some(temporary) = temporary {
                filter = filter.with_temporary(temporary);
            }
            if created_after.is_some() || created_before.is_some() {
                filter = filter.with_created_between(created_after, created_before);
            }
            if let Some(pattern) = name {
                filter = filter.with_name_pattern(&pattern)?;
            }
            if let Some(pattern) = description {
                filter = filter.with_description_pattern(&pattern)?;
            }
            if let Some(flags) = storage_flags {
                filter = filter.with_storage_flags(flags);
            }

            let filters = if filter.is_empty() {
                if !all {
                    bail!("no purge condition given; pass --all to purge every asset");
                }
                Vec::new()
            } else {
                vec![filter]
            };

            let purged = replicated.store().purge_all(&filters)?;
            println!("Purged {purged} assets");
            Ok(())
        }
        Commands::Replay => {
            let report = replicated.replay_report();
            println!("Replay");
            println!("======");
            println!("Resent:           {}", report.resent);
            println!("Already upstream: {}", report.already_upstream);
            println!("Missing locally:  {}", report.missing_locally);
            println!("Still pending:    {}", report.still_pending);
            Ok(())
        }
        Commands::Status => {
            status(&replicated);
            Ok(())
        }
    }
}

async fn get(
    replicated: &ReplicatedStore,
    id: AssetId,
    skip_read: bool,
    skip_write: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut rule = CacheRule::NORMAL;
    if skip_read {
        rule = rule | CacheRule::SKIP_READ;
    }
    if skip_write {
        rule = rule | CacheRule::SKIP_WRITE;
    }

    let Some(asset) = replicated.reader().get(id, rule).await else {
        bail!("asset {id} not found");
    };

    println!("Asset {}", asset.id);
    println!("  Type:        {}", asset.asset_type);
    println!("  Name:        {}", asset.name);
    println!("  Description: {}", asset.description);
    println!("  Created:     {}", asset.create_time.to_rfc3339());
    println!("  Local:       {}", asset.local);
    println!("  Temporary:   {}", asset.temporary);
    println!("  Size:        {} bytes", asset.size());

    if let Some(path) = output {
        std::fs::write(&path, &asset.data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("  Written to:  {}", path.display());
    }
    Ok(())
}

fn status(replicated: &ReplicatedStore) {
    let store = replicated.store();
    println!("Local store");
    println!("===========");
    println!("Root:    {}", store.root().display());
    match store.availability().reason() {
        None => println!("State:   enabled"),
        Some(reason) => println!("State:   disabled ({reason})"),
    }

    println!();
    println!("Write-intent log");
    println!("================");
    match replicated.wal() {
        Some(wal) => {
            println!("Path:    {}", wal.path());
            println!("Slots:   {}", wal.slot_count());
            println!("In use:  {}", wal.in_use());
        }
        None => println!("Not configured"),
    }

    println!();
    println!("Backends");
    println!("========");
    let topology = replicated.topology();
    if topology.is_empty() {
        println!("None (local only)");
    }
    for (index, group) in topology.groups().iter().enumerate() {
        let names: Vec<&str> = group.iter().map(|backend| backend.name()).collect();
        println!("Group {index}: {}", names.join(", "));
    }
}
