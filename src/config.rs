//! Quorumcast Configuration
//!
//! This module provides the single configuration value handed to the
//! leader and replica engines. It is usually loaded from TOML; the engines
//! themselves never read arguments or the environment.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::network::MulticastOptions;
use crate::replication::protocol::WireProfile;

/// Upper bound on `leader.rounds`: one pass through the 16-bit sequence space
pub const MAX_ROUNDS: u32 = 1 << 16;

/// Main Quorumcast configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuorumcastConfig {
    /// Local node configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Multicast group configuration
    #[serde(default)]
    pub group: GroupConfig,

    /// Wire profile and socket configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Leader round configuration
    #[serde(default)]
    pub leader: LeaderConfig,

    /// Replica configuration
    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address of the interface used for multicast egress/ingress
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,
}

/// Multicast group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Multicast group address identifying the protocol instance
    #[serde(default = "default_group")]
    pub address: Ipv4Addr,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Wire profile (raw or udp)
    #[serde(default = "default_profile")]
    pub profile: WireProfile,

    /// IP protocol number for the raw profile
    #[serde(default = "default_protocol")]
    pub protocol: u8,

    /// UDP port requests are multicast to
    #[serde(default = "default_request_port")]
    pub request_port: u16,

    /// UDP port acknowledgments are sent to
    #[serde(default = "default_ack_port")]
    pub ack_port: u16,

    /// Multicast TTL
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Loop multicast back to local sockets
    #[serde(default = "default_true")]
    pub loopback: bool,
}

/// Leader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Number of distinct replica ACKs needed for a successful round
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Round deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Request resend interval in milliseconds (0 = never resend)
    #[serde(default)]
    pub resend_interval_ms: u64,

    /// Upper bound on a single receive poll in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of rounds in a campaign
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Sequence number of the first round
    #[serde(default = "default_start_seq")]
    pub start_seq: u16,

    /// Pause between rounds in milliseconds
    #[serde(default = "default_round_delay_ms")]
    pub round_delay_ms: u64,
}

/// Replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Send ACKs to this address instead of the request's source
    #[serde(default)]
    pub ack_target: Option<Ipv4Addr>,

    /// How often a blocked receive wakes up to check for shutdown, in milliseconds
    #[serde(default = "default_wake_interval_ms")]
    pub wake_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_interface() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 1, 1)
}

fn default_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 1, 1, 1)
}

fn default_profile() -> WireProfile {
    WireProfile::Raw
}

fn default_protocol() -> u8 {
    253
}

fn default_request_port() -> u16 {
    5000
}

fn default_ack_port() -> u16 {
    5001
}

fn default_ttl() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_quorum() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_rounds() -> u32 {
    1
}

fn default_start_seq() -> u16 {
    42
}

fn default_round_delay_ms() -> u64 {
    300
}

fn default_wake_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { interface: default_interface() }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self { address: default_group() }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            protocol: default_protocol(),
            request_port: default_request_port(),
            ack_port: default_ack_port(),
            ttl: default_ttl(),
            loopback: true,
        }
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            timeout_ms: default_timeout_ms(),
            resend_interval_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
            rounds: default_rounds(),
            start_seq: default_start_seq(),
            round_delay_ms: default_round_delay_ms(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            ack_target: None,
            wake_interval_ms: default_wake_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Round parameters handed to the leader engine
#[derive(Debug, Clone)]
pub struct LeaderSettings {
    pub group: Ipv4Addr,
    pub profile: WireProfile,
    pub multicast: MulticastOptions,
    pub quorum: usize,
    pub timeout: Duration,
    /// `None` disables resending
    pub resend_interval: Option<Duration>,
    pub poll_interval: Duration,
    pub rounds: u32,
    pub start_seq: u16,
    pub round_delay: Duration,
}

/// Listening parameters handed to the replica engine
#[derive(Debug, Clone)]
pub struct ReplicaSettings {
    pub group: Ipv4Addr,
    pub interface: Ipv4Addr,
    pub profile: WireProfile,
    pub ack_target: Option<Ipv4Addr>,
    pub wake_interval: Duration,
}

impl QuorumcastConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QuorumcastConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: QuorumcastConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if !self.group.address.is_multicast() {
            return Err(crate::Error::Config(format!(
                "group.address {} is not an IPv4 multicast address",
                self.group.address
            )));
        }

        if self.node.interface.is_unspecified() {
            return Err(crate::Error::Config("node.interface cannot be 0.0.0.0".into()));
        }

        if self.transport.ttl == 0 {
            return Err(crate::Error::Config("transport.ttl must be at least 1".into()));
        }

        match self.transport.profile {
            WireProfile::Raw => {
                // 0 is IPPROTO_IP; TCP and UDP would hand us unrelated traffic
                if matches!(self.transport.protocol, 0 | 6 | 17) {
                    return Err(crate::Error::Config(format!(
                        "transport.protocol {} is reserved",
                        self.transport.protocol
                    )));
                }
            }
            WireProfile::Udp => {
                if self.transport.request_port == 0 || self.transport.ack_port == 0 {
                    return Err(crate::Error::Config("udp ports cannot be 0".into()));
                }
                if self.transport.request_port == self.transport.ack_port {
                    return Err(crate::Error::Config(
                        "transport.request_port and transport.ack_port must differ".into(),
                    ));
                }
            }
        }

        if self.leader.quorum == 0 {
            return Err(crate::Error::Config("leader.quorum must be at least 1".into()));
        }

        if self.leader.timeout_ms == 0 {
            return Err(crate::Error::Config("leader.timeout_ms cannot be 0".into()));
        }

        if self.leader.poll_interval_ms == 0 {
            return Err(crate::Error::Config("leader.poll_interval_ms cannot be 0".into()));
        }

        if self.leader.rounds == 0 || self.leader.rounds > MAX_ROUNDS {
            return Err(crate::Error::Config(format!(
                "leader.rounds must be between 1 and {}",
                MAX_ROUNDS
            )));
        }

        if self.replica.wake_interval_ms == 0 {
            return Err(crate::Error::Config("replica.wake_interval_ms cannot be 0".into()));
        }

        Ok(())
    }

    /// Get the round deadline as Duration
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.leader.timeout_ms)
    }

    /// Get the resend interval, or None when resending is disabled
    pub fn resend_interval(&self) -> Option<Duration> {
        match self.leader.resend_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Get the receive poll slice as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.leader.poll_interval_ms)
    }

    /// Get the pause between campaign rounds as Duration
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.leader.round_delay_ms)
    }

    /// Get the replica shutdown wake interval as Duration
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.replica.wake_interval_ms)
    }

    /// Multicast socket options for requests
    pub fn multicast_options(&self) -> MulticastOptions {
        MulticastOptions {
            interface: self.node.interface,
            ttl: self.transport.ttl,
            loopback: self.transport.loopback,
        }
    }

    /// Settings for the leader engine
    pub fn leader_settings(&self) -> LeaderSettings {
        LeaderSettings {
            group: self.group.address,
            profile: self.transport.profile,
            multicast: self.multicast_options(),
            quorum: self.leader.quorum,
            timeout: self.round_timeout(),
            resend_interval: self.resend_interval(),
            poll_interval: self.poll_interval(),
            rounds: self.leader.rounds,
            start_seq: self.leader.start_seq,
            round_delay: self.round_delay(),
        }
    }

    /// Settings for the replica engine
    pub fn replica_settings(&self) -> ReplicaSettings {
        ReplicaSettings {
            group: self.group.address,
            interface: self.node.interface,
            profile: self.transport.profile,
            ack_target: self.replica.ack_target,
            wake_interval: self.wake_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
interface = "10.0.2.2"

[group]
address = "239.1.1.1"

[transport]
profile = "udp"
request_port = 6000
ack_port = 6001
ttl = 8

[leader]
quorum = 2
timeout_ms = 2500
resend_interval_ms = 1000
rounds = 3
start_seq = 100

[replica]
ack_target = "10.0.1.1"
"#;

        let config = QuorumcastConfig::from_str(toml).unwrap();
        assert_eq!(config.node.interface, Ipv4Addr::new(10, 0, 2, 2));
        assert_eq!(config.transport.profile, WireProfile::Udp);
        assert_eq!(config.transport.ttl, 8);
        assert_eq!(config.leader.quorum, 2);
        assert_eq!(config.round_timeout(), Duration::from_millis(2500));
        assert_eq!(config.resend_interval(), Some(Duration::from_secs(1)));
        assert_eq!(config.replica.ack_target, Some(Ipv4Addr::new(10, 0, 1, 1)));

        // Untouched fields keep their defaults
        assert_eq!(config.transport.protocol, 253);
        assert_eq!(config.leader.poll_interval_ms, 250);
        assert!(config.transport.loopback);
    }

    #[test]
    fn test_defaults_match_reference_tooling() {
        let config = QuorumcastConfig::from_str("").unwrap();
        assert_eq!(config.group.address, Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(config.transport.profile, WireProfile::Raw);
        assert_eq!(config.transport.protocol, 253);
        assert_eq!(config.transport.ttl, 4);
        assert_eq!(config.leader.quorum, 1);
        assert_eq!(config.round_timeout(), Duration::from_secs(5));
        assert_eq!(config.resend_interval(), None);
        assert_eq!(config.leader.start_seq, 42);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = QuorumcastConfig::default();
        assert!(config.validate().is_ok());

        config.group.address = Ipv4Addr::new(10, 0, 0, 1);
        assert!(config.validate().is_err());
        config.group.address = Ipv4Addr::new(239, 1, 1, 1);

        config.node.interface = Ipv4Addr::UNSPECIFIED;
        assert!(config.validate().is_err());
        config.node.interface = Ipv4Addr::new(10, 0, 1, 1);

        config.leader.quorum = 0;
        assert!(config.validate().is_err());
        config.leader.quorum = 1;

        config.transport.protocol = 17;
        assert!(config.validate().is_err());
        config.transport.protocol = 253;

        config.transport.profile = WireProfile::Udp;
        config.transport.ack_port = config.transport.request_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rounds_are_bounded() {
        let err = QuorumcastConfig::from_str("[leader]\nrounds = 4294967295\ntimeout_ms = 1\n")
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let toml = format!("[leader]\nrounds = {}\n", MAX_ROUNDS);
        let config = QuorumcastConfig::from_str(&toml).unwrap();
        assert_eq!(config.leader_settings().rounds, MAX_ROUNDS);

        let toml = format!("[leader]\nrounds = {}\n", MAX_ROUNDS + 1);
        assert!(QuorumcastConfig::from_str(&toml).is_err());
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let err = QuorumcastConfig::from_str("[transport]\nprofile = \"sctp\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_from_file_and_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[leader]\nquorum = 3\nresend_interval_ms = 0\nround_delay_ms = 0").unwrap();

        let config = QuorumcastConfig::from_file(file.path()).unwrap();
        let leader = config.leader_settings();
        assert_eq!(leader.quorum, 3);
        assert_eq!(leader.resend_interval, None);
        assert_eq!(leader.round_delay, Duration::ZERO);
        assert_eq!(leader.multicast.ttl, 4);
        assert_eq!(leader.multicast.interface, Ipv4Addr::new(10, 0, 1, 1));

        let replica = config.replica_settings();
        assert_eq!(replica.group, Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(replica.ack_target, None);
    }
}
