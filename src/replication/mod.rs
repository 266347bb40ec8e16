//! Replication Module
//!
//! The request/acknowledge protocol: one leader multicasts a REQUEST for a
//! (group, seq) round and counts distinct replicas answering with a unicast
//! ACK, until a quorum is reached or the round deadline passes.

pub mod protocol;
mod leader;
mod replica;

pub use protocol::{FrameCodec, Message, MessageKind, WireProfile};
pub use leader::{AckSet, Leader};
pub use replica::{Replica, ReplicaStats};

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// How a round reached DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundOutcome {
    /// The quorum target was reached before the deadline
    Quorum,
    /// The deadline passed first
    Timeout,
}

/// Result of one leader round, produced once at DONE
#[derive(Debug, Clone, Serialize)]
pub struct RoundResult {
    pub group: Ipv4Addr,
    pub seq: u16,
    /// Number of distinct sources that acknowledged
    pub acknowledged: usize,
    /// Quorum target for the round
    pub quorum: usize,
    pub outcome: RoundOutcome,
    /// Time from the first transmission to DONE
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Acknowledging source addresses
    pub ack_set: BTreeSet<Ipv4Addr>,
    /// REQUEST transmissions, including resends
    pub transmissions: u32,
    /// Wall-clock time the round started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RoundResult {
    pub fn reached_quorum(&self) -> bool {
        self.outcome == RoundOutcome::Quorum
    }
}

/// Totals for a campaign; per-round detail goes through the round callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    /// Rounds run
    pub rounds: u32,
    /// Rounds that reached quorum
    pub reached_quorum: u32,
}

impl CampaignSummary {
    fn record(&mut self, result: &RoundResult) {
        self.rounds += 1;
        if result.reached_quorum() {
            self.reached_quorum += 1;
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}
