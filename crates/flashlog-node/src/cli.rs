//! Command line for the `flashlog` binary.
//!
//! A YAML file given with `--config` is loaded first; any flag given on the
//! command line then overrides the matching field.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use flashlog::config::parse_duration;
use flashlog::{ConfigError, GossipConfig, IngestConfig, StoreConfig, SyncMode};

#[derive(Parser, Debug)]
#[command(name = "flashlog")]
#[command(about = "flashlog log aggregation node")]
#[command(version)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept producer streams and hand segments to store nodes
    Ingest(IngestArgs),
    /// Pull, replicate, compact and serve segments
    Store(StoreArgs),
}

#[derive(Args, Debug, Default)]
pub struct GossipArgs {
    /// Gossip listen address
    #[arg(long)]
    pub cluster_addr: Option<SocketAddr>,
    /// IP advertised to peers instead of the bind address
    #[arg(long)]
    pub advertise_ip: Option<IpAddr>,
    /// Seed peer gossip address, repeatable
    #[arg(long = "peer")]
    pub peers: Vec<String>,
}

impl GossipArgs {
    fn apply(self, gossip: &mut GossipConfig) {
        if let Some(addr) = self.cluster_addr {
            gossip.bind_addr = addr;
        }
        if self.advertise_ip.is_some() {
            gossip.advertise_ip = self.advertise_ip;
        }
        if !self.peers.is_empty() {
            gossip.peers = self.peers;
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct IngestArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub api_addr: Option<SocketAddr>,
    #[arg(long)]
    pub fast_addr: Option<SocketAddr>,
    /// Flush the active segment at this many bytes
    #[arg(long)]
    pub segment_flush_size: Option<u64>,
    #[arg(long, value_parser = parse_duration)]
    pub segment_flush_age: Option<Duration>,
    #[arg(long, value_parser = parse_duration)]
    pub segment_pending_timeout: Option<Duration>,
    /// Drop producer records longer than this many bytes
    #[arg(long)]
    pub max_record_size: Option<usize>,
    /// fsync after every record instead of on flush
    #[arg(long)]
    pub sync_every_record: bool,
    #[command(flatten)]
    pub gossip: GossipArgs,
}

impl IngestArgs {
    pub fn into_config(self) -> Result<IngestConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::from_yaml_path(path)?,
            None => IngestConfig::default(),
        };
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(addr) = self.fast_addr {
            config.fast_addr = addr;
        }
        if let Some(size) = self.segment_flush_size {
            config.segment_flush_size = size;
        }
        if let Some(age) = self.segment_flush_age {
            config.segment_flush_age = age;
        }
        if let Some(timeout) = self.segment_pending_timeout {
            config.segment_pending_timeout = timeout;
        }
        if let Some(size) = self.max_record_size {
            config.max_record_size = size;
        }
        if self.sync_every_record {
            config.sync_mode = SyncMode::Immediate;
        }
        self.gossip.apply(&mut config.gossip);
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Default)]
pub struct StoreArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub api_addr: Option<SocketAddr>,
    /// Number of concurrent consumers
    #[arg(long)]
    pub segment_consumers: Option<usize>,
    #[arg(long)]
    pub segment_target_size: Option<u64>,
    #[arg(long, value_parser = parse_duration)]
    pub segment_target_age: Option<Duration>,
    #[arg(long)]
    pub segment_replication_factor: Option<usize>,
    #[arg(long, value_parser = parse_duration)]
    pub segment_retain: Option<Duration>,
    #[arg(long, value_parser = parse_duration)]
    pub segment_purge: Option<Duration>,
    #[arg(long, value_parser = parse_duration)]
    pub compact_interval: Option<Duration>,
    #[arg(long, value_parser = parse_duration)]
    pub replication_timeout: Option<Duration>,
    /// Per-peer bound on scatter-gather query answers
    #[arg(long, value_parser = parse_duration)]
    pub query_timeout: Option<Duration>,
    #[command(flatten)]
    pub gossip: GossipArgs,
}

impl StoreArgs {
    pub fn into_config(self) -> Result<StoreConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_yaml_path(path)?,
            None => StoreConfig::default(),
        };
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(n) = self.segment_consumers {
            config.segment_consumers = n;
        }
        if let Some(size) = self.segment_target_size {
            config.segment_target_size = size;
        }
        if let Some(age) = self.segment_target_age {
            config.segment_target_age = age;
        }
        if let Some(factor) = self.segment_replication_factor {
            config.segment_replication_factor = factor;
        }
        if let Some(retain) = self.segment_retain {
            config.segment_retain = retain;
        }
        if let Some(purge) = self.segment_purge {
            config.segment_purge = purge;
        }
        if let Some(interval) = self.compact_interval {
            config.compact_interval = interval;
        }
        if let Some(timeout) = self.replication_timeout {
            config.replication_timeout = timeout;
        }
        if let Some(timeout) = self.query_timeout {
            config.query_timeout = timeout;
        }
        self.gossip.apply(&mut config.gossip);
        config.validate()?;
        Ok(config)
    }
}
