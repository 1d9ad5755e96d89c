// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use das_node::{Config, Discovery, MockDiscovery, Node, VerticalIndex};
use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::info;

#[derive(Parser)]
#[command(name = "das-node")]
#[command(about = "A data availability sampling node prototype", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local multi-node network with in-memory discovery
    Local {
        /// Number of nodes to spawn
        #[arg(long, default_value_t = 16)]
        nodes: u64,

        /// Number of shards
        #[arg(long, default_value_t = 4)]
        shards: u64,

        /// Number of validators, split evenly across the nodes
        #[arg(long, default_value_t = 1500)]
        validators: u64,

        /// Slot duration in seconds
        #[arg(long, default_value_t = 3)]
        seconds_per_slot: u64,

        /// Seconds until genesis
        #[arg(long, default_value_t = 12)]
        genesis_delay: u64,

        /// Slots to run before shutting down
        #[arg(long, default_value_t = 32)]
        slots: u64,

        /// First listen port; node i listens on base_port + i
        #[arg(long, default_value_t = 9000)]
        base_port: u16,

        /// Keep transport encryption on (slower startup on big networks)
        #[arg(long)]
        secure_transport: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Local {
            nodes,
            shards,
            validators,
            seconds_per_slot,
            genesis_delay,
            slots,
            base_port,
            secure_transport,
        } => {
            run_local(
                nodes,
                shards,
                validators,
                seconds_per_slot,
                genesis_delay,
                slots,
                base_port,
                secure_transport,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_local(
    node_count: u64,
    shards: u64,
    validators: u64,
    seconds_per_slot: u64,
    genesis_delay: u64,
    slots: u64,
    base_port: u16,
    secure_transport: bool,
) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before the unix epoch")?
        .as_secs();
    let config = Config {
        shard_count: shards,
        validator_count: validators,
        seconds_per_slot,
        genesis_time: now + genesis_delay,
        disable_transport_security: !secure_transport,
        ..Default::default()
    };
    let expanded = config.expand()?;
    let disc = Arc::new(MockDiscovery::default());

    let mut nodes = Vec::with_capacity(node_count as usize);
    for i in 0..node_count {
        let mut node = Node::new(config.clone(), disc.clone())?;

        // Contiguous validator ranges, one per node.
        let start = validators * i / node_count;
        let end = validators * (i + 1) / node_count;
        let indices: Vec<u64> = (start..end).collect();
        node.register_validators(&indices);

        node.start(IpAddr::V4(Ipv4Addr::LOCALHOST), base_port + i as u16)
            .await
            .with_context(|| format!("failed to start node {i}"))?;
        let (peer_id, addrs) = node.disc_info();
        disc.register(peer_id, addrs);
        nodes.push(node);
    }
    info!(
        nodes = nodes.len(),
        genesis_in = genesis_delay,
        "local network up"
    );

    // Global per-slot summary, deliberately outside any single node so it
    // is logged once: backbone coverage and per-node peer counts.
    let all_subnets: BTreeSet<VerticalIndex> =
        (0..expanded.sample_subnets).map(VerticalIndex).collect();
    let mut ticker = expanded.ticker_with_offset(Duration::ZERO);
    loop {
        ticker.tick().await;
        let (slot, pre_genesis) = expanded.slot_with_offset(SystemTime::now(), 0.0);
        if pre_genesis {
            info!(
                genesis_time = expanded.genesis_time,
                slots = slot.0,
                "genesis countdown..."
            );
            continue;
        }

        let backbone = disc.find_public(&expanded, slot, &all_subnets);
        let covered = backbone.len() as u64;
        let mut peer_counts = Vec::with_capacity(nodes.len());
        for node in &nodes {
            peer_counts.push(node.stats().await.unwrap_or(0));
        }
        info!(
            %slot,
            backbone_coverage = %format!("{covered}/{}", expanded.sample_subnets),
            ?peer_counts,
            "slot stats"
        );

        if slot.0 >= slots {
            break;
        }
    }

    for node in nodes.iter_mut() {
        node.close().await?;
    }
    info!("local network stopped");
    Ok(())
}
