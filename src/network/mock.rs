//! Scripted in-memory transport for engine tests

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Datagram, MulticastOptions, Transport};
use crate::error::{Error, Result};

/// Delivers scripted datagrams at fixed offsets from creation and records
/// every send.
pub struct ScriptedTransport {
    origin: Instant,
    script: VecDeque<(Duration, Datagram)>,
    /// Set once the script is exhausted, so a blocking receive loop can end
    shutdown_when_drained: Option<Arc<AtomicBool>>,
    fail_leave: bool,
    /// Receive calls that fail before the script is consulted
    failing_receives: u32,
    pub multicasts: Vec<(Ipv4Addr, Vec<u8>, Duration)>,
    pub unicasts: Vec<(Ipv4Addr, Vec<u8>)>,
    pub joined: Vec<(Ipv4Addr, Ipv4Addr)>,
    pub left: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            script: VecDeque::new(),
            shutdown_when_drained: None,
            fail_leave: false,
            failing_receives: 0,
            multicasts: Vec::new(),
            unicasts: Vec::new(),
            joined: Vec::new(),
            left: Vec::new(),
        }
    }

    /// Queue a datagram for delivery `at` after creation. Entries must be
    /// added in time order.
    pub fn deliver(mut self, at: Duration, source: Ipv4Addr, payload: impl Into<Vec<u8>>) -> Self {
        self.script.push_back((at, Datagram { payload: payload.into(), source }));
        self
    }

    pub fn shutdown_when_drained(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_when_drained = Some(flag);
        self
    }

    pub fn failing_leave(mut self) -> Self {
        self.fail_leave = true;
        self
    }

    pub fn failing_receives(mut self, count: u32) -> Self {
        self.failing_receives = count;
        self
    }
}

impl Transport for ScriptedTransport {
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        if !self.joined.contains(&(group, interface)) {
            self.joined.push((group, interface));
        }
        Ok(())
    }

    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        if self.fail_leave {
            return Err(Error::Transport("membership already gone".into()));
        }
        self.left.push((group, interface));
        Ok(())
    }

    fn multicast_send(
        &mut self,
        group: Ipv4Addr,
        payload: &[u8],
        _options: &MulticastOptions,
    ) -> Result<()> {
        self.multicasts.push((group, payload.to_vec(), self.origin.elapsed()));
        Ok(())
    }

    fn unicast_send(&mut self, destination: Ipv4Addr, payload: &[u8]) -> Result<()> {
        self.unicasts.push((destination, payload.to_vec()));
        Ok(())
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Datagram>> {
        if self.failing_receives > 0 {
            self.failing_receives -= 1;
            return Err(Error::Transport("socket closed".into()));
        }

        let Some((at, _)) = self.script.front() else {
            if let Some(flag) = &self.shutdown_when_drained {
                flag.store(true, Ordering::SeqCst);
                return Ok(None);
            }
            std::thread::sleep(timeout.unwrap_or(Duration::from_millis(10)));
            return Ok(None);
        };

        let due = self.origin + *at;
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if let Some(limit) = timeout {
                if limit < wait {
                    std::thread::sleep(limit);
                    return Ok(None);
                }
            }
            std::thread::sleep(wait);
        }

        Ok(self.script.pop_front().map(|(_, datagram)| datagram))
    }
}
