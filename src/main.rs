//! Quorumcast - Multicast Quorum Acknowledgment Probe
//!
//! Command-line front end for the leader and replica engines.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorumcast::config::QuorumcastConfig;
use quorumcast::network::{open_transport, Role, Transport};
use quorumcast::replication::{Leader, Replica, RoundResult, WireProfile};

/// Quorumcast - Multicast Quorum Acknowledgment Probe
#[derive(Parser)]
#[command(name = "quorumcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Multicast group address
    #[arg(long, global = true)]
    group: Option<Ipv4Addr>,

    /// Local interface address
    #[arg(long, global = true)]
    iface: Option<Ipv4Addr>,

    /// Wire profile (raw or udp)
    #[arg(long, global = true)]
    profile: Option<WireProfile>,

    /// IP protocol number for the raw profile
    #[arg(long, global = true)]
    proto: Option<u8>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multicast REQUESTs and count acknowledging replicas
    Leader {
        /// Sequence number of the first round
        #[arg(long)]
        seq: Option<u16>,

        /// Number of distinct ACKs that completes a round
        #[arg(long)]
        expect: Option<usize>,

        /// Round deadline in seconds
        #[arg(long, value_parser = parse_seconds)]
        timeout: Option<Duration>,

        /// Resend interval in seconds (0 disables)
        #[arg(long, value_parser = parse_seconds)]
        resend: Option<Duration>,

        /// Number of rounds
        #[arg(long)]
        rounds: Option<u32>,

        /// Pause between rounds in seconds
        #[arg(long, value_parser = parse_seconds)]
        delay: Option<Duration>,

        /// Multicast TTL
        #[arg(long)]
        ttl: Option<u32>,

        /// Print one JSON object per round instead of a summary line
        #[arg(long)]
        json: bool,
    },

    /// Join the group and acknowledge REQUESTs until interrupted
    Replica {
        /// Send ACKs to this address instead of each request's source
        #[arg(long)]
        ack_to: Option<Ipv4Addr>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "quorumcast.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show the effective configuration
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output } = &cli.command {
        return run_init(output);
    }

    let config = load_config(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    match cli.command {
        Commands::Leader { json, .. } => run_leader(&config, json),
        Commands::Replica { .. } => run_replica(&config),
        Commands::Validate => run_validate(&config, cli.config.as_deref()),
        Commands::Info => run_info(&config),
        Commands::Init { .. } => Ok(()),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Parse a seconds flag. Settings are kept in whole milliseconds, so any
/// non-zero value below 1 ms is rejected.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("'{}' must be a non-negative number of seconds", value));
    }
    let duration = Duration::from_secs_f64(secs);
    if !duration.is_zero() && duration < Duration::from_millis(1) {
        return Err(format!("'{}' is below the 1 ms resolution", value));
    }
    Ok(duration)
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Load the configuration file (or defaults) and apply command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<QuorumcastConfig> {
    let mut config = match &cli.config {
        Some(path) => QuorumcastConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => QuorumcastConfig::default(),
    };

    if let Some(group) = cli.group {
        config.group.address = group;
    }
    if let Some(iface) = cli.iface {
        config.node.interface = iface;
    }
    if let Some(profile) = cli.profile {
        config.transport.profile = profile;
    }
    if let Some(proto) = cli.proto {
        config.transport.protocol = proto;
    }

    match &cli.command {
        Commands::Leader { seq, expect, timeout, resend, rounds, delay, ttl, .. } => {
            if let Some(seq) = seq {
                config.leader.start_seq = *seq;
            }
            if let Some(expect) = expect {
                config.leader.quorum = *expect;
            }
            if let Some(timeout) = timeout {
                config.leader.timeout_ms = millis(*timeout);
            }
            if let Some(resend) = resend {
                config.leader.resend_interval_ms = millis(*resend);
            }
            if let Some(rounds) = rounds {
                config.leader.rounds = *rounds;
            }
            if let Some(delay) = delay {
                config.leader.round_delay_ms = millis(*delay);
            }
            if let Some(ttl) = ttl {
                config.transport.ttl = *ttl;
            }
        }
        Commands::Replica { ack_to } => {
            if ack_to.is_some() {
                config.replica.ack_target = *ack_to;
            }
        }
        _ => {}
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open(config: &QuorumcastConfig, role: Role) -> anyhow::Result<Box<dyn Transport>> {
    match open_transport(config, role) {
        Ok(transport) => Ok(transport),
        Err(e) => {
            if e.is_permission_denied() {
                tracing::error!(
                    "Raw sockets need root or CAP_NET_RAW (try sudo, or --profile udp)"
                );
            }
            let profile = config.transport.profile.name();
            Err(e).context(format!("Failed to open {} transport", profile))
        }
    }
}

/// Run leader rounds
fn run_leader(config: &QuorumcastConfig, json: bool) -> anyhow::Result<()> {
    let transport = open(config, Role::Leader)?;
    let mut leader = Leader::new(config.leader_settings(), transport);

    let summary = leader.run_campaign(|index, result| {
        if json {
            match serde_json::to_string(result) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to serialize round result: {}", e),
            }
        } else {
            print_round(index, result);
        }
    })?;

    if !json && summary.rounds > 1 {
        println!();
        println!(
            "All rounds done: {}/{} reached quorum",
            summary.reached_quorum, summary.rounds
        );
    }

    Ok(())
}

fn print_round(index: u32, result: &RoundResult) {
    let sources: Vec<String> = result.ack_set.iter().map(|ip| ip.to_string()).collect();
    println!(
        "Round {} seq={}: {}/{} ACK(s) in {:.2}s [{}] {}",
        index + 1,
        result.seq,
        result.acknowledged,
        result.quorum,
        result.elapsed.as_secs_f64(),
        sources.join(", "),
        if result.reached_quorum() { "quorum" } else { "timeout" }
    );
}

/// Run a replica until SIGINT/SIGTERM
fn run_replica(config: &QuorumcastConfig) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install signal handler")?;

    let transport = open(config, Role::Replica)?;
    let mut replica = Replica::new(config.replica_settings(), transport);
    let stats = replica.run(&shutdown)?;

    println!(
        "Replica {} bye: {} REQ seen, {} ACK sent, {} self-suppressed",
        config.node.interface, stats.requests_seen, stats.acks_sent, stats.self_suppressed
    );
    Ok(())
}

/// Initialize configuration file
fn run_init(output: &std::path::Path) -> anyhow::Result<()> {
    let config_content = r#"# Quorumcast Configuration
# Generated configuration file

[node]
# Address of the interface used to send and receive multicast
interface = "10.0.1.1"

[group]
address = "239.1.1.1"

[transport]
# "raw" carries group|seq|type|pad over a custom IP protocol (needs CAP_NET_RAW)
# "udp" carries only the sequence number; group comes from membership
profile = "raw"
protocol = 253
request_port = 5000
ack_port = 5001
ttl = 4
loopback = true

[leader]
quorum = 1
timeout_ms = 5000
resend_interval_ms = 0
poll_interval_ms = 250
rounds = 1
start_seq = 42
round_delay_ms = 300

[replica]
# ack_target = "10.0.1.1"
wake_interval_ms = 1000

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(output, config_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the interface and group addresses for this node.");
    println!("Then start with: quorumcast --config {} leader", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config: &QuorumcastConfig, path: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("✓ Configuration is valid");
    if let Some(path) = path {
        println!("  File: {}", path.display());
    }
    println!("  Interface: {}", config.node.interface);
    println!("  Group: {}", config.group.address);
    println!("  Profile: {}", config.transport.profile.name());
    println!("  Quorum: {}", config.leader.quorum);
    Ok(())
}

/// Show the effective configuration
fn run_info(config: &QuorumcastConfig) -> anyhow::Result<()> {
    println!("Quorumcast Node Information");
    println!("===========================");
    println!();
    println!("Interface:        {}", config.node.interface);
    println!("Group:            {}", config.group.address);
    println!();
    println!("Transport:");
    match config.transport.profile {
        WireProfile::Raw => {
            println!("  Profile:        raw (IP protocol {})", config.transport.protocol);
        }
        WireProfile::Udp => {
            println!(
                "  Profile:        udp (requests :{}, acks :{})",
                config.transport.request_port, config.transport.ack_port
            );
        }
    }
    println!("  TTL:            {}", config.transport.ttl);
    println!("  Loopback:       {}", config.transport.loopback);
    println!();
    println!("Leader:");
    println!("  Quorum:         {}", config.leader.quorum);
    println!("  Timeout:        {} ms", config.leader.timeout_ms);
    match config.resend_interval() {
        Some(interval) => println!("  Resend:         every {} ms", interval.as_millis()),
        None => println!("  Resend:         off"),
    }
    println!("  Rounds:         {} from seq {}", config.leader.rounds, config.leader.start_seq);
    println!();
    println!("Replica:");
    match config.replica.ack_target {
        Some(target) => println!("  ACKs to:        {}", target),
        None => println!("  ACKs to:        request source"),
    }
    println!();
    println!("{}", toml::to_string_pretty(config).context("Failed to render configuration")?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_seconds("0.001").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_seconds("2.5").unwrap(), Duration::from_millis(2500));

        assert!(parse_seconds("0.0005").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "quorumcast",
            "--profile",
            "udp",
            "leader",
            "--resend",
            "0.25",
            "--rounds",
            "3",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.transport.profile, WireProfile::Udp);
        assert_eq!(config.leader.resend_interval_ms, 250);
        assert_eq!(config.leader.rounds, 3);
        assert_eq!(config.leader.timeout_ms, 5000);
    }

    #[test]
    fn test_sub_millisecond_resend_rejected() {
        let parsed = Cli::try_parse_from(["quorumcast", "leader", "--resend", "0.0005"]);
        assert!(parsed.is_err());
    }
}
