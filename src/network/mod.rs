//! Network Module
//!
//! Transport capability used by the leader and replica engines: multicast
//! membership, multicast and unicast sends, and receive with a timeout.
//! Two implementations exist, one per wire profile.

mod socket;
mod raw;
mod udp;
#[cfg(test)]
pub(crate) mod mock;

pub use raw::RawTransport;
pub use udp::UdpTransport;

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::QuorumcastConfig;
use crate::error::Result;
use crate::replication::protocol::WireProfile;

/// A datagram as handed back by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Payload bytes (raw sockets may include the IPv4 header)
    pub payload: Vec<u8>,
    /// Source IPv4 address
    pub source: Ipv4Addr,
}

/// Socket options applied to multicast transmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastOptions {
    /// Egress interface address
    pub interface: Ipv4Addr,
    /// Multicast TTL
    pub ttl: u32,
    /// Deliver our own multicasts back to local sockets
    pub loopback: bool,
}

/// Which side of the protocol a transport is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Replica,
}

/// Datagram transport used by the engines
pub trait Transport {
    /// Join a multicast group on the given local interface. Joining twice is
    /// a no-op.
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()>;

    /// Leave a multicast group. Leaving a group that was never joined is a no-op.
    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()>;

    /// Send a payload to a multicast group
    fn multicast_send(
        &mut self,
        group: Ipv4Addr,
        payload: &[u8],
        options: &MulticastOptions,
    ) -> Result<()>;

    /// Send a payload to a single peer
    fn unicast_send(&mut self, destination: Ipv4Addr, payload: &[u8]) -> Result<()>;

    /// Wait for one datagram. `None` timeout blocks until something arrives;
    /// `Ok(None)` means the timeout elapsed.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        (**self).join_group(group, interface)
    }

    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        (**self).leave_group(group, interface)
    }

    fn multicast_send(
        &mut self,
        group: Ipv4Addr,
        payload: &[u8],
        options: &MulticastOptions,
    ) -> Result<()> {
        (**self).multicast_send(group, payload, options)
    }

    fn unicast_send(&mut self, destination: Ipv4Addr, payload: &[u8]) -> Result<()> {
        (**self).unicast_send(destination, payload)
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>> {
        (**self).receive(timeout)
    }
}

/// Open the transport selected by the configuration for the given role
pub fn open_transport(config: &QuorumcastConfig, role: Role) -> Result<Box<dyn Transport>> {
    let interface = config.node.interface;
    let transport = &config.transport;

    match transport.profile {
        WireProfile::Raw => {
            // The leader listens on its own address, replicas on the group
            let bind_to = match role {
                Role::Leader => interface,
                Role::Replica => config.group.address,
            };
            let raw = RawTransport::open(transport.protocol, bind_to, role == Role::Replica)?;
            tracing::debug!(
                "Opened raw transport: proto={} rx bound to {}",
                transport.protocol,
                bind_to
            );
            Ok(Box::new(raw))
        }
        WireProfile::Udp => {
            let (request_port, ack_port) = (transport.request_port, transport.ack_port);
            let udp = match role {
                Role::Leader => UdpTransport::leader(interface, request_port, ack_port)?,
                Role::Replica => UdpTransport::replica(interface, request_port, ack_port)?,
            };
            tracing::debug!(
                "Opened udp transport: requests on :{} acks on :{}",
                transport.request_port,
                transport.ack_port
            );
            Ok(Box::new(udp))
        }
    }
}

/// Map "nothing arrived in time" errors onto `Ok(None)`
pub(crate) fn timed_out<T>(result: std::io::Result<T>) -> std::io::Result<Option<T>> {
    use std::io::ErrorKind;

    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Socket timeouts of zero are rejected by the OS layer; round up to 1ms
pub(crate) fn read_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(Duration::from_millis(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_timed_out_mapping() {
        assert_eq!(timed_out(Ok::<_, io::Error>(3)).unwrap(), Some(3));
        assert_eq!(timed_out::<u8>(Err(io::ErrorKind::WouldBlock.into())).unwrap(), None);
        assert_eq!(timed_out::<u8>(Err(io::ErrorKind::TimedOut.into())).unwrap(), None);
        assert!(timed_out::<u8>(Err(io::ErrorKind::ConnectionRefused.into())).is_err());
    }

    #[test]
    fn test_read_timeout_never_zero() {
        assert_eq!(read_timeout(None), None);
        assert_eq!(read_timeout(Some(Duration::ZERO)), Some(Duration::from_millis(1)));
        let slice = Duration::from_millis(250);
        assert_eq!(read_timeout(Some(slice)), Some(slice));
    }
}
