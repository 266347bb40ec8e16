//! Quorumcast - Multicast Quorum Acknowledgment Probe
//!
//! A leader multicasts a tagged REQUEST to a group and counts how many
//! distinct replicas answer with a unicast ACK before a deadline. The
//! framing header (group, sequence, type) is the one a programmable
//! data-plane forwards, so a round doubles as a check of the forwarding path.
//!
//! # Architecture
//!
//! - [`replication::protocol`]: wire framing and IPv4 header stripping
//! - [`network`]: transport trait with raw IP and UDP implementations
//! - [`replication::Leader`]: broadcast-and-collect rounds and campaigns
//! - [`replication::Replica`]: listen-and-reply loop with self-ACK suppression
//!
//! Engines are single-threaded and receive everything they need through a
//! [`QuorumcastConfig`]; nothing is read from the environment.

pub mod config;
pub mod error;
pub mod network;
pub mod replication;

pub use config::QuorumcastConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{QuorumcastConfig, LeaderSettings, ReplicaSettings};
    pub use crate::error::{Error, Result};
    pub use crate::network::{open_transport, Datagram, MulticastOptions, Role, Transport};
    pub use crate::replication::{
        CampaignSummary, Leader, Replica, ReplicaStats, RoundOutcome, RoundResult,
    };
    pub use crate::replication::protocol::{FrameCodec, Message, MessageKind, WireProfile};
}
