//! UDP transport
//!
//! Reduced profile: requests go to `group:request_port`, acknowledgments to
//! `peer:ack_port`. The port a datagram arrives on tells the receiver what
//! kind of message it is.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use super::socket::{self, SocketPair};
use super::{Datagram, MulticastOptions, Transport};
use crate::error::{Error, Result};

const RECV_BUFFER: usize = 65535;

/// UDP transport bound for one role
pub struct UdpTransport {
    sockets: SocketPair,
    request_port: u16,
    ack_port: u16,
}

impl UdpTransport {
    /// Leader side: multicast requests out, receive acks on `interface:ack_port`
    pub fn leader(interface: Ipv4Addr, request_port: u16, ack_port: u16) -> Result<Self> {
        let tx = socket::open_udp().map_err(|e| Error::setup("open udp tx socket", e))?;
        let rx = reusable_bound(SocketAddrV4::new(interface, ack_port))?;
        Ok(Self::new(tx, rx, request_port, ack_port))
    }

    /// Replica side: receive requests on `*:request_port`, send acks from `interface`
    pub fn replica(interface: Ipv4Addr, request_port: u16, ack_port: u16) -> Result<Self> {
        let rx = reusable_bound(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, request_port))?;
        let tx = UdpSocket::bind(SocketAddrV4::new(interface, 0))
            .map_err(|e| Error::setup("bind udp ack socket", e))?;
        Ok(Self::new(tx, rx, request_port, ack_port))
    }

    fn new(tx: UdpSocket, rx: UdpSocket, request_port: u16, ack_port: u16) -> Self {
        Self {
            sockets: SocketPair::new(tx, rx, RECV_BUFFER),
            request_port,
            ack_port,
        }
    }

    /// Local address of the receiving socket
    pub fn local_rx_addr(&self) -> Result<SocketAddr> {
        Ok(self.sockets.rx().local_addr()?)
    }
}

fn reusable_bound(addr: SocketAddrV4) -> Result<UdpSocket> {
    let socket = socket::open_udp().map_err(|e| Error::setup("open udp rx socket", e))?;
    socket::set_reuse_address(&socket).map_err(|e| Error::setup("set SO_REUSEADDR", e))?;
    socket::bind(&socket, addr).map_err(|e| Error::setup("bind udp rx socket", e))?;
    Ok(socket)
}

impl Transport for UdpTransport {
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        self.sockets.join(group, interface)
    }

    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        self.sockets.leave(group, interface)
    }

    fn multicast_send(
        &mut self,
        group: Ipv4Addr,
        payload: &[u8],
        options: &MulticastOptions,
    ) -> Result<()> {
        self.sockets.apply_multicast_options(options)?;
        self.sockets
            .send_to(payload, SocketAddrV4::new(group, self.request_port))
    }

    fn unicast_send(&mut self, destination: Ipv4Addr, payload: &[u8]) -> Result<()> {
        self.sockets
            .send_to(payload, SocketAddrV4::new(destination, self.ack_port))
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>> {
        self.sockets.receive(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_receive_times_out() {
        let mut transport = UdpTransport::leader(Ipv4Addr::LOCALHOST, 0, 0).unwrap();

        let start = Instant::now();
        let got = transport.receive(Some(Duration::from_millis(30))).unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_unicast_reaches_ack_port() {
        let mut leader = UdpTransport::leader(Ipv4Addr::LOCALHOST, 0, 0).unwrap();
        let ack_port = leader.local_rx_addr().unwrap().port();

        let mut replica = UdpTransport::replica(Ipv4Addr::LOCALHOST, 0, ack_port).unwrap();
        replica.unicast_send(Ipv4Addr::LOCALHOST, b"\x00\x2aACK").unwrap();

        let datagram = leader
            .receive(Some(Duration::from_secs(2)))
            .unwrap()
            .expect("ack should arrive on loopback");
        assert_eq!(datagram.payload, b"\x00\x2aACK".to_vec());
        assert_eq!(datagram.source, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_leave_without_join_is_noop() {
        let mut transport = UdpTransport::leader(Ipv4Addr::LOCALHOST, 0, 0).unwrap();
        transport
            .leave_group(Ipv4Addr::new(239, 1, 1, 1), Ipv4Addr::LOCALHOST)
            .unwrap();
    }
}
