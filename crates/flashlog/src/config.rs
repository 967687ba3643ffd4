//! Node configuration for both tiers.
//!
//! Durations are written as human strings (`"500ms"`, `"3s"`, `"1m"`, `"24h"`,
//! `"7d"`) in YAML files. Every field has a default, so a config file only
//! needs the values that differ.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ingest::SyncMode;

pub const DEFAULT_API_PORT: u16 = 7650;
pub const DEFAULT_FAST_PORT: u16 = 7651;
pub const DEFAULT_CLUSTER_PORT: u16 = 7659;

const MIB: u64 = 1024 * 1024;

/// Longest record line a producer may send before it is discarded.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GossipConfig {
    pub bind_addr: SocketAddr,
    /// Address other nodes use to reach this one. Defaults to the bind
    /// address, or loopback when bound to the unspecified address.
    pub advertise_ip: Option<IpAddr>,
    /// Gossip addresses of nodes to contact at startup.
    pub peers: Vec<String>,
    #[serde(with = "duration_str")]
    pub gossip_interval: Duration,
    #[serde(with = "duration_str")]
    pub ping_timeout: Duration,
    pub indirect_probes: usize,
    #[serde(with = "duration_str")]
    pub suspicion_timeout: Duration,
    #[serde(with = "duration_str")]
    pub dead_reap_timeout: Duration,
    #[serde(with = "duration_str")]
    pub leave_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig {
            bind_addr: any_addr(DEFAULT_CLUSTER_PORT),
            advertise_ip: None,
            peers: Vec::new(),
            gossip_interval: Duration::from_secs(1),
            ping_timeout: Duration::from_millis(500),
            indirect_probes: 3,
            suspicion_timeout: Duration::from_secs(5),
            dead_reap_timeout: Duration::from_secs(30),
            leave_timeout: Duration::from_secs(2),
        }
    }
}

impl GossipConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("gossip.gossip_interval", self.gossip_interval)?;
        non_zero("gossip.ping_timeout", self.ping_timeout)?;
        non_zero("gossip.suspicion_timeout", self.suspicion_timeout)?;
        non_zero("gossip.dead_reap_timeout", self.dead_reap_timeout)?;
        if self.ping_timeout >= self.gossip_interval {
            return Err(ConfigError::invalid(
                "gossip.ping_timeout",
                "must be shorter than gossip_interval",
            ));
        }
        Ok(())
    }

    /// The IP to advertise for a listener bound to `bound`.
    pub fn advertised(&self, bound: SocketAddr) -> SocketAddr {
        let ip = self.advertise_ip.unwrap_or_else(|| {
            if bound.ip().is_unspecified() {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            } else {
                bound.ip()
            }
        });
        SocketAddr::new(ip, bound.port())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub api_addr: SocketAddr,
    pub fast_addr: SocketAddr,
    pub segment_flush_size: u64,
    #[serde(with = "duration_str")]
    pub segment_flush_age: Duration,
    #[serde(with = "duration_str")]
    pub segment_pending_timeout: Duration,
    pub sync_mode: SyncMode,
    /// Producer lines longer than this many bytes are dropped.
    pub max_record_size: usize,
    pub gossip: GossipConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            data_dir: PathBuf::from("data/ingest"),
            api_addr: any_addr(DEFAULT_API_PORT),
            fast_addr: any_addr(DEFAULT_FAST_PORT),
            segment_flush_size: 16 * MIB,
            segment_flush_age: Duration::from_secs(3),
            segment_pending_timeout: Duration::from_secs(60),
            sync_mode: SyncMode::OnFlush,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            gossip: GossipConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_yaml_path(path.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_flush_size == 0 {
            return Err(ConfigError::invalid("segment_flush_size", "must be > 0"));
        }
        if self.max_record_size == 0 {
            return Err(ConfigError::invalid("max_record_size", "must be > 0"));
        }
        non_zero("segment_flush_age", self.segment_flush_age)?;
        non_zero("segment_pending_timeout", self.segment_pending_timeout)?;
        self.gossip.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub api_addr: SocketAddr,
    pub segment_consumers: usize,
    pub segment_target_size: u64,
    #[serde(with = "duration_str")]
    pub segment_target_age: Duration,
    pub segment_replication_factor: usize,
    #[serde(with = "duration_str")]
    pub segment_retain: Duration,
    #[serde(with = "duration_str")]
    pub segment_purge: Duration,
    #[serde(with = "duration_str")]
    pub compact_interval: Duration,
    #[serde(with = "duration_str")]
    pub replication_timeout: Duration,
    /// Bound on each store peer's answer to a scatter-gather query.
    #[serde(with = "duration_str")]
    pub query_timeout: Duration,
    #[serde(with = "duration_str")]
    pub idle_backoff: Duration,
    pub gossip: GossipConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("data/store"),
            api_addr: any_addr(DEFAULT_API_PORT),
            segment_consumers: 1,
            segment_target_size: 128 * MIB,
            segment_target_age: Duration::from_secs(3),
            segment_replication_factor: 2,
            segment_retain: Duration::from_secs(7 * 24 * 3600),
            segment_purge: Duration::from_secs(24 * 3600),
            compact_interval: Duration::from_secs(1),
            replication_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(10),
            idle_backoff: Duration::from_millis(250),
            gossip: GossipConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_yaml_path(path.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_consumers == 0 {
            return Err(ConfigError::invalid("segment_consumers", "must be > 0"));
        }
        if self.segment_target_size == 0 {
            return Err(ConfigError::invalid("segment_target_size", "must be > 0"));
        }
        if self.segment_replication_factor == 0 {
            return Err(ConfigError::invalid(
                "segment_replication_factor",
                "must be > 0",
            ));
        }
        non_zero("segment_target_age", self.segment_target_age)?;
        non_zero("segment_retain", self.segment_retain)?;
        non_zero("segment_purge", self.segment_purge)?;
        non_zero("compact_interval", self.compact_interval)?;
        non_zero("replication_timeout", self.replication_timeout)?;
        non_zero("query_timeout", self.query_timeout)?;
        self.gossip.validate()
    }
}

fn non_zero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(field, "must be > 0"));
    }
    Ok(())
}

fn from_yaml_path<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Parse `"<number><unit>"` with unit `ms`, `s`, `m`, `h` or `d`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{text}' has no unit"))?;
    if split == 0 {
        return Err(format!("duration '{text}' must start with a number"));
    }
    let value: u64 = text[..split]
        .parse()
        .map_err(|e| format!("duration '{text}': {e}"))?;
    let millis_per_unit = match &text[split..] {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        unit => return Err(format!("duration '{text}' has unknown unit '{unit}'")),
    };
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{text}' is too large"))
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    for (unit, size) in [("d", 86_400_000), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if ms != 0 && ms % size == 0 {
            return format!("{}{unit}", ms / size);
        }
    }
    format!("{ms}ms")
}

pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_format_duration_picks_largest_unit() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(7 * 86_400)), "7d");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_defaults_are_valid() {
        let ingest = IngestConfig::default();
        assert_eq!(ingest.fast_addr.port(), DEFAULT_FAST_PORT);
        assert_eq!(ingest.segment_flush_size, 16 * MIB);
        assert_eq!(ingest.max_record_size, DEFAULT_MAX_RECORD_SIZE);
        ingest.validate().unwrap();

        let store = StoreConfig::default();
        assert_eq!(store.segment_replication_factor, 2);
        assert_eq!(store.segment_retain, Duration::from_secs(604_800));
        assert_eq!(store.query_timeout, Duration::from_secs(10));
        store.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_replication_factor() {
        let config = StoreConfig {
            segment_replication_factor: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "segment_replication_factor"
        ));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        std::fs::write(
            &path,
            "segment_target_size: 1024\nsegment_retain: 2h\ngossip:\n  peers: [\"10.0.0.1:7659\"]\n  ping_timeout: 200ms\n",
        )
        .unwrap();

        let config = StoreConfig::from_yaml_path(&path).unwrap();
        assert_eq!(config.segment_target_size, 1024);
        assert_eq!(config.segment_retain, Duration::from_secs(7200));
        assert_eq!(config.gossip.peers, vec!["10.0.0.1:7659".to_string()]);
        assert_eq!(config.gossip.ping_timeout, Duration::from_millis(200));
        assert_eq!(config.segment_consumers, 1);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = IngestConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert!(text.contains("segment_flush_age: 3s"));
        let parsed: IngestConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_advertised_address() {
        let gossip = GossipConfig::default();
        let bound: SocketAddr = "0.0.0.0:7659".parse().unwrap();
        assert_eq!(gossip.advertised(bound).to_string(), "127.0.0.1:7659");
        let bound: SocketAddr = "10.1.2.3:7659".parse().unwrap();
        assert_eq!(gossip.advertised(bound).to_string(), "10.1.2.3:7659");
    }
}
