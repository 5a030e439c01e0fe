//! Shard Ring
//!
//! Diagnostic tool for consistent-hash shard routing: shows where keys land,
//! how evenly a shard set splits the key space, and how many keys move when a
//! shard leaves.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::json;
use shard_ring::{
    config::{ShardConfig, Settings},
    error::ResourceError,
    logging::{init_tracing, LogFormat},
    services::{
        HashAlgorithm, ShardInfo, ShardRegistry, ShardResource, ShardedRing, ShardedRingFactory,
        ShardedRingPool,
    },
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shard Ring
///
/// Consistent-hash routing diagnostics over the configured shard set.
#[derive(Parser, Debug)]
#[command(name = "shard-ring")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shard list `[name=]address[*weight],...` (overrides SHARDS env var)
    #[arg(long, global = true)]
    shards: Option<String>,

    /// Hash algorithm (overrides HASH_ALGORITHM env var)
    #[arg(long, global = true)]
    hash: Option<HashAlgorithm>,

    /// Disable key tag extraction (overrides KEY_TAGS_ENABLED env var)
    #[arg(long, global = true)]
    no_key_tags: bool,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (overrides LOG_FORMAT env var)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the shard each key routes to
    Route {
        /// Keys to route
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Share of random keys owned by each shard
    Distribution {
        /// Number of random keys to route
        #[arg(long, default_value_t = 100_000)]
        samples: usize,
    },
    /// Fraction of keys that move when one shard leaves
    Rebalance {
        /// Name (or address, for unnamed shards) of the shard to remove
        #[arg(long)]
        remove: String,
        /// Number of random keys to route
        #[arg(long, default_value_t = 100_000)]
        samples: usize,
    },
    /// Print the effective settings
    Config,
}

/// Address handle standing in for a connection; never touches the network
#[derive(Debug)]
struct Endpoint {
    address: String,
}

#[async_trait]
impl ShardResource for Endpoint {
    async fn ping(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError> {
        tracing::trace!(address = %self.address, "Endpoint released");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    // Override settings with CLI arguments
    if let Some(shards) = &args.shards {
        settings.shards =
            shard_ring::config::parse_shard_list(shards).context("Invalid --shards value")?;
    }
    if let Some(hash) = args.hash {
        settings.hash_algorithm = hash;
    }
    if args.no_key_tags {
        settings.key_tags_enabled = false;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }
    settings.validate()?;

    init_tracing(&settings.log_level, settings.log_format)?;

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        shards = settings.shards.len(),
        hash = %settings.hash_algorithm,
        "Starting shard-ring"
    );

    if let Command::Config = args.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    if settings.shards.is_empty() {
        anyhow::bail!("No shards configured; set SHARDS or pass --shards");
    }

    let shards = build_shards(&settings.shards)?;
    let registry = Arc::new(ShardRegistry::with_shards(
        shards.iter().map(|(_, shard)| shard.clone()).collect(),
    ));
    let factory = ShardedRingFactory::from_registry(Arc::clone(&registry), settings.ring_config()?);
    let pool = ShardedRingPool::new(factory, settings.pool_config());

    let ring = pool.borrow().await?;
    let outcome = match args.command {
        Command::Route { keys } => route(&ring, &keys),
        Command::Distribution { samples } => distribution(&ring, &shards, samples),
        Command::Rebalance { remove, samples } => {
            rebalance(&ring, &registry, &shards, &remove, samples)
        }
        Command::Config => Ok(()),
    };
    pool.return_object(ring).await;
    pool.close().await;

    outcome
}

/// Shard descriptors for the configured entries, each paired with its config
fn build_shards(configs: &[ShardConfig]) -> Result<Vec<(ShardConfig, ShardInfo<Endpoint>)>> {
    configs
        .iter()
        .map(|config| {
            let address = config.address.clone();
            let shard = config
                .to_shard(move || Endpoint {
                    address: address.clone(),
                })
                .with_context(|| format!("Invalid shard {}", config))?;
            Ok((config.clone(), shard))
        })
        .collect()
}

fn route(ring: &ShardedRing<Endpoint>, keys: &[String]) -> Result<()> {
    for key in keys {
        let (shard, endpoint) = ring.route(key)?;
        let line = json!({
            "key": key,
            "tag": ring.key_tag(key),
            "shard": shard.label(),
            "address": endpoint.address,
        });
        println!("{}", line);
    }
    Ok(())
}

fn distribution(
    ring: &ShardedRing<Endpoint>,
    shards: &[(ShardConfig, ShardInfo<Endpoint>)],
    samples: usize,
) -> Result<()> {
    let keys = random_keys(samples);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in &keys {
        let shard = ring.shard_for_key(key)?;
        *counts.entry(shard.label()).or_default() += 1;
    }

    let total_weight: u32 = shards.iter().map(|(config, _)| config.weight).sum();
    let report: Vec<_> = shards
        .iter()
        .map(|(config, shard)| {
            let owned = counts.get(&shard.label()).copied().unwrap_or(0);
            json!({
                "shard": config.label(),
                "address": config.address,
                "weight": config.weight,
                "keys": owned,
                "share": ratio(owned, samples),
                "expected_share": f64::from(config.weight) / f64::from(total_weight),
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "samples": samples,
            "virtual_nodes": ring.snapshot().vnode_count(),
            "shards": report,
        }))?
    );
    Ok(())
}

fn rebalance(
    ring: &ShardedRing<Endpoint>,
    registry: &ShardRegistry<Endpoint>,
    shards: &[(ShardConfig, ShardInfo<Endpoint>)],
    remove: &str,
    samples: usize,
) -> Result<()> {
    let (removed_config, removed) = shards
        .iter()
        .find(|(config, _)| config.label() == remove)
        .with_context(|| format!("No shard named {}", remove))?;

    let keys = random_keys(samples);
    let before = keys
        .iter()
        .map(|key| ring.shard_for_key(key))
        .collect::<Result<Vec<_>, _>>()?;

    registry.remove_shard(removed);
    if registry.is_empty() {
        anyhow::bail!("Removing {} would leave no shards", remove);
    }

    let mut moved = 0;
    let mut moved_between_survivors = 0;
    for (key, old) in keys.iter().zip(&before) {
        let new = ring.shard_for_key(key)?;
        if new != *old {
            moved += 1;
            if old != removed {
                moved_between_survivors += 1;
            }
        }
    }

    let total_weight: u32 = shards.iter().map(|(config, _)| config.weight).sum();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "removed": removed_config.label(),
            "samples": samples,
            "moved": moved,
            "moved_fraction": ratio(moved, samples),
            "expected_fraction": f64::from(removed_config.weight) / f64::from(total_weight),
            "moved_between_survivors": moved_between_survivors,
            "ring_version": ring.version(),
        }))?
    );
    Ok(())
}

fn random_keys(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| format!("key:{:016x}", rng.gen::<u64>()))
        .collect()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
