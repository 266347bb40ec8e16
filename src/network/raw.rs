//! Raw IP transport
//!
//! Uses `SOCK_RAW` sockets bound to a custom IP protocol number, so the
//! 8-byte frame header is the whole IP payload. Requires CAP_NET_RAW.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use super::socket::{self, SocketPair};
use super::{Datagram, MulticastOptions, Transport};
use crate::error::{Error, Result};

/// Receive buffer size; frames are tiny but an IP header may precede them
const RECV_BUFFER: usize = 4096;

/// Raw-socket transport for one IP protocol number
pub struct RawTransport {
    sockets: SocketPair,
}

impl RawTransport {
    /// Open transmit and receive sockets for `protocol`.
    ///
    /// The receive socket is bound to `bind_to` when the kernel allows it;
    /// binding only narrows delivery on some kernels, so failure is not fatal.
    pub fn open(protocol: u8, bind_to: Ipv4Addr, loopback_rx: bool) -> Result<Self> {
        let tx = socket::open_raw(protocol).map_err(|e| Error::setup("open raw tx socket", e))?;
        let rx = socket::open_raw(protocol).map_err(|e| Error::setup("open raw rx socket", e))?;

        socket::set_reuse_address(&rx).map_err(|e| Error::setup("set SO_REUSEADDR", e))?;

        if let Err(e) = socket::bind(&rx, SocketAddrV4::new(bind_to, 0)) {
            tracing::debug!(
                "Could not bind raw rx socket to {}: {} (continuing unbound)",
                bind_to,
                e
            );
        }

        if loopback_rx {
            rx.set_multicast_loop_v4(true)
                .map_err(|e| Error::setup("set IP_MULTICAST_LOOP", e))?;
        }

        Ok(Self {
            sockets: SocketPair::new(tx, rx, RECV_BUFFER),
        })
    }
}

impl Transport for RawTransport {
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
        // Port is meaningless for raw IP and must be zero
        self.sockets.send_to(payload, SocketAddrV4::new(group, 0))
    }

    fn unicast_send(&mut self, destination: Ipv4Addr, payload: &[u8]) -> Result<()> {
        self.sockets.send_to(payload, SocketAddrV4::new(destination, 0))
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>> {
        self.sockets.receive(timeout)
    }
}
