//! Leader Implementation
//!
//! Drives rounds: multicast a REQUEST, collect ACKs from distinct sources,
//! stop at quorum or at the deadline. The receive poll is bounded so the
//! resend timer and the deadline stay responsive.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use super::protocol::{hexdump, FrameCodec, Message, MessageKind};
use super::{CampaignSummary, RoundOutcome, RoundResult};
use crate::config::LeaderSettings;
use crate::error::Result;
use crate::network::Transport;

/// What happened to an inbound message offered to an [`AckSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    /// New source, counted
    Counted,
    /// Source already acknowledged this round
    Duplicate,
    /// Not an ACK
    NotAck,
    /// ACK for a different (group, seq)
    OtherRound,
}

/// Distinct sources that acknowledged one (group, seq) round
#[derive(Debug, Clone)]
pub struct AckSet {
    group: Ipv4Addr,
    seq: u16,
    sources: BTreeSet<Ipv4Addr>,
}

impl AckSet {
    pub fn new(group: Ipv4Addr, seq: u16) -> Self {
        Self {
            group,
            seq,
            sources: BTreeSet::new(),
        }
    }

    /// Offer a decoded message received from `source`
    pub fn record(&mut self, message: &Message, source: Ipv4Addr) -> AckDisposition {
        if message.kind != MessageKind::Ack {
            return AckDisposition::NotAck;
        }
        if !message.is_for_round(self.group, self.seq) {
            return AckDisposition::OtherRound;
        }
        if self.sources.insert(source) {
            AckDisposition::Counted
        } else {
            AckDisposition::Duplicate
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, source: &Ipv4Addr) -> bool {
        self.sources.contains(source)
    }

    pub fn into_sources(self) -> BTreeSet<Ipv4Addr> {
        self.sources
    }
}

/// Leader engine
pub struct Leader<T: Transport> {
    /// Round parameters
    settings: LeaderSettings,
    /// Codec for the configured wire profile
    codec: FrameCodec,
    /// Transport shared by every round
    transport: T,
}

impl<T: Transport> Leader<T> {
    /// Create a new leader
    pub fn new(settings: LeaderSettings, transport: T) -> Self {
        let codec = FrameCodec::for_profile(settings.profile, settings.group, MessageKind::Ack);
        Self {
            settings,
            codec,
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run one round for `seq` and return its result.
    ///
    /// Only a failure of the initial transmission is an error; a round that
    /// times out without quorum is a normal result.
    pub fn run_round(&mut self, seq: u16) -> Result<RoundResult> {
        let group = self.settings.group;
        let quorum = self.settings.quorum;
        let request = self.codec.encode(&Message::request(group, seq));

        // INIT
        let started_at = chrono::Utc::now();
        self.transport
            .multicast_send(group, &request, &self.settings.multicast)?;
        let start = Instant::now();
        let deadline = start + self.settings.timeout;
        let mut last_send = start;
        let mut transmissions: u32 = 1;

        tracing::info!(
            "Sent REQ seq={} to {} from {} ({} profile)",
            seq,
            group,
            self.settings.multicast.interface,
            self.codec.profile().name()
        );

        // AWAIT_ACK
        let mut acks = AckSet::new(group, seq);
        while acks.len() < quorum {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            if let Some(interval) = self.settings.resend_interval {
                if now.duration_since(last_send) >= interval {
                    match self
                        .transport
                        .multicast_send(group, &request, &self.settings.multicast)
                    {
                        Ok(()) => {
                            transmissions += 1;
                            tracing::debug!(
                                "Re-sent REQ seq={} (transmission {})",
                                seq,
                                transmissions
                            );
                        }
                        Err(e) => tracing::warn!("Re-send of REQ seq={} failed: {}", seq, e),
                    }
                    last_send = now;
                }
            }

            let slice = self.poll_slice(now, deadline, last_send);
            let datagram = match self.transport.receive(Some(slice)) {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("Receive error during round seq={}: {}", seq, e);
                    continue;
                }
            };

            tracing::trace!(
                "rx len={} from {} bytes={}",
                datagram.payload.len(),
                datagram.source,
                hexdump(&datagram.payload, 32)
            );

            let Some(message) = self.codec.read_datagram(&datagram.payload) else {
                tracing::trace!("Discarding malformed datagram from {}", datagram.source);
                continue;
            };

            match acks.record(&message, datagram.source) {
                AckDisposition::Counted => {
                    tracing::info!(
                        "ACK {}/{} from {} (seq={})",
                        acks.len(),
                        quorum,
                        datagram.source,
                        seq
                    );
                }
                AckDisposition::Duplicate => {
                    tracing::debug!("Duplicate ACK from {} (seq={})", datagram.source, seq);
                }
                AckDisposition::NotAck | AckDisposition::OtherRound => {
                    tracing::trace!(
                        "Ignoring {} seq={} group={} from {}",
                        message.kind.type_name(),
                        message.seq,
                        message.group,
                        datagram.source
                    );
                }
            }
        }

        // DONE
        let elapsed = start.elapsed();
        let acknowledged = acks.len();
        let outcome = if acknowledged >= quorum {
            RoundOutcome::Quorum
        } else {
            RoundOutcome::Timeout
        };

        tracing::info!(
            "Round seq={} done: {} ACK(s) in {:.2}s ({:?})",
            seq,
            acknowledged,
            elapsed.as_secs_f64(),
            outcome
        );

        Ok(RoundResult {
            group,
            seq,
            acknowledged,
            quorum,
            outcome,
            elapsed,
            ack_set: acks.into_sources(),
            transmissions,
            started_at,
        })
    }

    /// Run `rounds` consecutive rounds starting at `start_seq`, handing each
    /// result to `on_round` as it finishes. Results are not retained.
    pub fn run_campaign<F>(&mut self, mut on_round: F) -> Result<CampaignSummary>
    where
        F: FnMut(u32, &RoundResult),
    {
        let rounds = self.settings.rounds;
        let mut summary = CampaignSummary::default();

        for index in 0..rounds {
            // Sequence numbers are 16-bit and wrap
            let seq = self.settings.start_seq.wrapping_add(index as u16);
            tracing::info!("Round {} of {}: seq={}", index + 1, rounds, seq);

            let result = self.run_round(seq)?;
            summary.record(&result);
            on_round(index, &result);

            if index + 1 < rounds && !self.settings.round_delay.is_zero() {
                std::thread::sleep(self.settings.round_delay);
            }
        }

        Ok(summary)
    }

    /// Longest receive wait that keeps the deadline and the next resend on time
    fn poll_slice(&self, now: Instant, deadline: Instant, last_send: Instant) -> Duration {
        let mut slice = self
            .settings
            .poll_interval
            .min(deadline.saturating_duration_since(now));
        if let Some(interval) = self.settings.resend_interval {
            slice = slice.min((last_send + interval).saturating_duration_since(now));
        }
        slice
    }
}
