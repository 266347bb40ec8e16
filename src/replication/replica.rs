//! Replica Implementation
//!
//! Joins the multicast group, answers each REQUEST with a unicast ACK and
//! leaves the group when asked to shut down.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use super::protocol::{hexdump, FrameCodec, MessageKind};
use crate::config::ReplicaSettings;
use crate::error::Result;
use crate::network::{Datagram, Transport};

/// Counters reported when the replica stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaStats {
    /// REQUESTs for our group
    pub requests_seen: u64,
    /// ACKs handed to the transport
    pub acks_sent: u64,
    /// REQUESTs that came from our own interface address
    pub self_suppressed: u64,
    /// Malformed, non-REQUEST or foreign-group datagrams
    pub discarded: u64,
    /// ACK sends the transport rejected
    pub send_failures: u64,
    /// Receive calls that failed
    pub receive_errors: u64,
}

/// What the replica did with one inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDisposition {
    /// ACK sent to this address
    Acked(Ipv4Addr),
    /// ACK could not be sent
    SendFailed,
    /// Request originated from this node
    SelfSuppressed,
    /// Not a request for our group
    Discarded,
}

/// Replica engine
pub struct Replica<T: Transport> {
    /// Listening parameters
    settings: ReplicaSettings,
    /// Codec for the configured wire profile
    codec: FrameCodec,
    /// Transport holding the group membership
    transport: T,
    stats: ReplicaStats,
}

impl<T: Transport> Replica<T> {
    /// Create a new replica
    pub fn new(settings: ReplicaSettings, transport: T) -> Self {
        let codec = FrameCodec::for_profile(settings.profile, settings.group, MessageKind::Request);
        Self {
            settings,
            codec,
            transport,
            stats: ReplicaStats::default(),
        }
    }

    pub fn stats(&self) -> ReplicaStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Join the group on our interface
    pub fn join(&mut self) -> Result<()> {
        self.transport
            .join_group(self.settings.group, self.settings.interface)?;
        tracing::info!(
            "Replica {} joined {} ({} profile), waiting for REQ",
            self.settings.interface,
            self.settings.group,
            self.codec.profile().name()
        );
        Ok(())
    }

    /// Leave the group. Failures are logged and otherwise ignored.
    pub fn leave(&mut self) {
        match self
            .transport
            .leave_group(self.settings.group, self.settings.interface)
        {
            Ok(()) => tracing::debug!("Left group {}", self.settings.group),
            Err(e) => {
                tracing::warn!("Leaving group {} failed (ignored): {}", self.settings.group, e)
            }
        }
    }

    /// Join, answer requests until `shutdown` is set, then leave.
    ///
    /// The receive blocks for at most the configured wake interval so the
    /// shutdown flag is noticed without a request arriving. A failed receive
    /// is followed by a pause of one wake interval.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<ReplicaStats> {
        self.join()?;

        while !shutdown.load(Ordering::SeqCst) {
            match self.transport.receive(Some(self.settings.wake_interval)) {
                Ok(Some(datagram)) => {
                    self.handle_datagram(&datagram);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.stats.receive_errors += 1;
                    tracing::warn!("Receive error: {}", e);
                    std::thread::sleep(self.settings.wake_interval);
                }
            }
        }

        self.leave();
        tracing::info!(
            "Replica {} stopped: {} REQ seen, {} ACK sent, {} self-suppressed, {} discarded",
            self.settings.interface,
            self.stats.requests_seen,
            self.stats.acks_sent,
            self.stats.self_suppressed,
            self.stats.discarded
        );
        Ok(self.stats)
    }

    /// Process one inbound datagram, replying with an ACK when it is a
    /// REQUEST for our group from another node.
    pub fn handle_datagram(&mut self, datagram: &Datagram) -> RequestDisposition {
        tracing::trace!(
            "rx len={} from {} bytes={}",
            datagram.payload.len(),
            datagram.source,
            hexdump(&datagram.payload, 32)
        );

        let Some(message) = self.codec.read_datagram(&datagram.payload) else {
            self.stats.discarded += 1;
            return RequestDisposition::Discarded;
        };

        if message.kind != MessageKind::Request || message.group != self.settings.group {
            self.stats.discarded += 1;
            return RequestDisposition::Discarded;
        }

        self.stats.requests_seen += 1;
        tracing::info!(
            "Replica {} got REQ seq={} from {}",
            self.settings.interface,
            message.seq,
            datagram.source
        );

        // Same-address check only; a leader behind NAT or on another of our
        // addresses is not recognised
        if datagram.source == self.settings.interface {
            self.stats.self_suppressed += 1;
            tracing::debug!("Not acknowledging our own REQ seq={}", message.seq);
            return RequestDisposition::SelfSuppressed;
        }

        let destination = self.settings.ack_target.unwrap_or(datagram.source);
        let ack = self.codec.encode(&message.ack_reply());

        match self.transport.unicast_send(destination, &ack) {
            Ok(()) => {
                self.stats.acks_sent += 1;
                tracing::info!(
                    "Replica {} sent ACK seq={} -> {}",
                    self.settings.interface,
                    message.seq,
                    destination
                );
                RequestDisposition::Acked(destination)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::warn!("ACK seq={} to {} failed: {}", message.seq, destination, e);
                RequestDisposition::SendFailed
            }
        }
    }
}
