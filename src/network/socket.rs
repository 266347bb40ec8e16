//! Socket setup helpers
//!
//! `std::net::UdpSocket` covers sending, receiving, TTL, loopback and group
//! membership, but cannot create raw sockets, set `SO_REUSEADDR` before
//! binding, or pick the multicast egress interface. Those few calls go
//! through libc here; the resulting descriptor is then driven through the
//! std socket API.
//!
//! [`SocketPair`] holds the transmit/receive sockets every transport uses,
//! along with group membership, multicast option state and the receive path.

use std::collections::HashSet;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use super::{read_timeout, timed_out, Datagram, MulticastOptions};
use crate::error::{Error, Result};

/// Create an AF_INET socket of the given type and protocol
pub(super) fn open(kind: libc::c_int, protocol: libc::c_int) -> io::Result<UdpSocket> {
    let fd = unsafe { libc::socket(libc::AF_INET, kind | libc::SOCK_CLOEXEC, protocol) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // The descriptor is freshly created and owned by nothing else
    Ok(unsafe { UdpSocket::from_raw_fd(fd) })
}

/// Raw IPv4 socket for a custom protocol number
pub(super) fn open_raw(protocol: u8) -> io::Result<UdpSocket> {
    open(libc::SOCK_RAW, libc::c_int::from(protocol))
}

/// Unbound UDP socket
pub(super) fn open_udp() -> io::Result<UdpSocket> {
    open(libc::SOCK_DGRAM, libc::IPPROTO_UDP)
}

fn set_option<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn in_addr(addr: Ipv4Addr) -> libc::in_addr {
    libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) }
}

/// Enable SO_REUSEADDR
pub(super) fn set_reuse_address(socket: &UdpSocket) -> io::Result<()> {
    let on: libc::c_int = 1;
    set_option(socket.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, &on)
}

/// Select the egress interface for multicast sends (IP_MULTICAST_IF)
pub(super) fn set_multicast_interface(socket: &UdpSocket, interface: Ipv4Addr) -> io::Result<()> {
    set_option(socket.as_raw_fd(), libc::IPPROTO_IP, libc::IP_MULTICAST_IF, &in_addr(interface))
}

/// Bind a socket created by [`open`]
pub(super) fn bind(socket: &UdpSocket, addr: SocketAddrV4) -> io::Result<()> {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: in_addr(*addr.ip()),
        sin_zero: [0; 8],
    };
    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Transmit and receive sockets plus the state shared by both profiles
pub(super) struct SocketPair {
    /// Multicast requests and unicast acks leave through here
    tx: UdpSocket,
    /// Group membership is held on this socket
    rx: UdpSocket,
    joined: HashSet<(Ipv4Addr, Ipv4Addr)>,
    /// Multicast options last applied to `tx`
    applied: Option<MulticastOptions>,
    buf: Vec<u8>,
}

impl SocketPair {
    pub(super) fn new(tx: UdpSocket, rx: UdpSocket, recv_buffer: usize) -> Self {
        Self {
            tx,
            rx,
            joined: HashSet::new(),
            applied: None,
            buf: vec![0u8; recv_buffer],
        }
    }

    pub(super) fn rx(&self) -> &UdpSocket {
        &self.rx
    }

    /// Join a group on `rx`. Joining twice is a no-op.
    pub(super) fn join(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        if self.joined.contains(&(group, interface)) {
            return Ok(());
        }
        self.rx
            .join_multicast_v4(&group, &interface)
            .map_err(|e| Error::setup("join multicast group", e))?;
        self.joined.insert((group, interface));
        Ok(())
    }

    /// Leave a group joined through [`SocketPair::join`]; anything else is a no-op
    pub(super) fn leave(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        if !self.joined.remove(&(group, interface)) {
            return Ok(());
        }
        self.rx.leave_multicast_v4(&group, &interface)?;
        Ok(())
    }

    /// Apply multicast options to `tx`, skipping the syscalls when unchanged
    pub(super) fn apply_multicast_options(&mut self, options: &MulticastOptions) -> Result<()> {
        if self.applied.as_ref() == Some(options) {
            return Ok(());
        }

        set_multicast_interface(&self.tx, options.interface)
            .map_err(|e| Error::setup("set IP_MULTICAST_IF", e))?;
        self.tx
            .set_multicast_ttl_v4(options.ttl)
            .map_err(|e| Error::setup("set IP_MULTICAST_TTL", e))?;
        self.tx
            .set_multicast_loop_v4(options.loopback)
            .map_err(|e| Error::setup("set IP_MULTICAST_LOOP", e))?;

        self.applied = Some(*options);
        Ok(())
    }

    pub(super) fn send_to(&self, payload: &[u8], destination: SocketAddrV4) -> Result<()> {
        self.tx.send_to(payload, destination)?;
        Ok(())
    }

    /// Wait up to `timeout` for one datagram on `rx`
    pub(super) fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>> {
        self.rx.set_read_timeout(read_timeout(timeout))?;

        let Some((len, src)) = timed_out(self.rx.recv_from(&mut self.buf))? else {
            return Ok(None);
        };

        match src {
            SocketAddr::V4(v4) => Ok(Some(Datagram {
                payload: self.buf[..len].to_vec(),
                source: *v4.ip(),
            })),
            SocketAddr::V6(v6) => Err(Error::Transport(format!(
                "unexpected IPv6 source {} on an IPv4 socket",
                v6
            ))),
        }
    }
}
