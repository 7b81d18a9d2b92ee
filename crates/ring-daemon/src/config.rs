//! Command line and config file handling.

use anyhow::{Context, Result};
use clap::Parser;
use ring_core::{NodeId, RingConfig};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ring-daemon")]
#[command(about = "Self-healing leader ring node")]
pub struct Args {
    /// Address this node listens on and is known by
    #[arg(long, default_value = "127.0.0.1", env = "RING_IP")]
    pub ip: String,

    /// Port this node listens on
    #[arg(long, env = "RING_PORT")]
    pub port: u16,

    /// Successor's address
    #[arg(long, default_value = "127.0.0.1", env = "RING_RIGHT_IP")]
    pub right_ip: String,

    /// Successor's port
    #[arg(long, env = "RING_RIGHT_PORT")]
    pub right_port: u16,

    /// Start out as the ring's leader
    #[arg(long, env = "RING_LEADER")]
    pub leader: bool,

    /// JSON file with protocol timings
    #[arg(long, env = "RING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Everything needed to start one node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub id: NodeId,
    pub successor: NodeId,
    pub leader: bool,
    pub ring: RingConfig,
}

impl NodeSettings {
    pub fn from_args(args: &Args) -> Result<Self> {
        Ok(Self {
            id: NodeId::new(args.ip.clone(), args.port),
            successor: NodeId::new(args.right_ip.clone(), args.right_port),
            leader: args.leader,
            ring: load_ring_config(args.config.as_deref())?,
        })
    }
}

/// Read protocol timings from `path`. A missing file means defaults.
pub fn load_ring_config(path: Option<&Path>) -> Result<RingConfig> {
    let Some(path) = path else {
        return Ok(RingConfig::default());
    };
    if !path.exists() {
        info!("Config file {:?} not found, using defaults", path);
        return Ok(RingConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: RingConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    if config.election_delay_min_ms > config.election_delay_max_ms {
        anyhow::bail!(
            "election_delay_min_ms ({}) is greater than election_delay_max_ms ({})",
            config.election_delay_min_ms,
            config.election_delay_max_ms
        );
    }
    info!("Loaded config from {:?}", path);
    Ok(config)
}
