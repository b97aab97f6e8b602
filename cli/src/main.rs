//! logforge CLI — inspect and manage indexer state.
//!
//! Usage:
//! ```bash
//! logforge check ./indexer.json
//! logforge status --db ./logforge.db --chain 137
//! logforge reset  --db ./logforge.db --chain 137
//! logforge info
//! ```

use std::env;
use std::fs;
use std::process;

use anyhow::{bail, Context, Result};

use logforge_core::checkpoint::CheckpointStore;
use logforge_core::config::IndexerConfig;
use logforge_store::sqlite::SqliteCheckpointStore;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "check" => cmd_check(&args[2..]),
        "status" => cmd_status(&args[2..]),
        "reset" => cmd_reset(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("logforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("logforge {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe, multi-chain EVM event indexing engine\n");
    println!("USAGE:");
    println!("    logforge <COMMAND>\n");
    println!("COMMANDS:");
    println!("    check <config.json>            Validate an indexer configuration file");
    println!("    status --db <path> --chain <n> Show a chain's persisted checkpoint");
    println!("    reset  --db <path> --chain <n> Delete a chain's checkpoint (after a deep reorg)");
    println!("    info                           Show engine defaults");
    println!("    version                        Print version");
    println!("    help                           Print this help");
}

fn cmd_info() {
    println!("Logforge v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: 2000 ms");
    println!("  Default batch size: 1000 blocks/range");
    println!("  Default max reorg depth: 64 blocks");
    println!("  Default dispatch retry budget: 5 attempts/range");
    println!("  Checkpoint backends: memory, SQLite");
    println!("  Chains: EVM (Ethereum, Arbitrum, Base, Polygon, Optimism, ...)");
}

fn cmd_check(args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("usage: logforge check <config.json>");
    };
    let raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config: IndexerConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    if config.chains.is_empty() {
        bail!("{path}: no chains configured");
    }
    for chain in &config.chains {
        if chain.rpc_url.is_empty() {
            bail!("chain {}: rpc_url is empty", chain.chain_id);
        }
        if chain.batch_size == 0 {
            bail!("chain {}: batch_size must be at least 1", chain.chain_id);
        }
        for factory in &chain.factories {
            if !chain.contracts.iter().any(|c| c.label == factory.parent) {
                bail!(
                    "chain {}: factory parent '{}' is not a configured contract",
                    chain.chain_id,
                    factory.parent
                );
            }
        }
        println!(
            "chain {} ({}): {} contract(s), {} factory rule(s), from block {}",
            chain.chain_id,
            chain.name,
            chain.contracts.len(),
            chain.factories.len(),
            chain.initial_block() + 1
        );
    }
    println!("OK");
    Ok(())
}

fn cmd_status(args: &[String]) -> Result<()> {
    let (db, chain_id) = parse_db_chain(args)?;
    runtime()?.block_on(async {
        let store = SqliteCheckpointStore::open(&db).await?;
        match store.load(chain_id).await? {
            Some(state) => {
                println!("chain {chain_id}:");
                println!("  block:      {}", state.block_number);
                println!("  hash:       {}", state.block_hash);
                println!("  updated_at: {}", state.updated_at);
            }
            None => println!("chain {chain_id}: no checkpoint"),
        }
        Ok(())
    })
}

fn cmd_reset(args: &[String]) -> Result<()> {
    let (db, chain_id) = parse_db_chain(args)?;
    runtime()?.block_on(async {
        let store = SqliteCheckpointStore::open(&db).await?;
        store.delete(chain_id).await?;
        println!("chain {chain_id}: checkpoint deleted");
        Ok(())
    })
}

fn parse_db_chain(args: &[String]) -> Result<(String, u64)> {
    let mut db = None;
    let mut chain = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => db = iter.next().cloned(),
            "--chain" => chain = iter.next().cloned(),
            other => bail!("unexpected argument: {other}"),
        }
    }
    let db = db.context("--db <path> is required")?;
    let chain = chain
        .context("--chain <id> is required")?
        .parse::<u64>()
        .context("--chain must be a number")?;
    Ok((db, chain))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")
}
