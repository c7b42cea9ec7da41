//! Egress policy for the build's execution environment.
//!
//! A sandboxed build may reach exactly one destination: the control
//! channel back to the requester. Everything else is refused up front,
//! and even a permitted connect is bounded so a blackholed route fails
//! within the configured time instead of hanging a build.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// The sandbox's single-destination egress rule.
#[derive(Debug, Clone, Copy)]
pub struct EgressPolicy {
    /// The one destination a build may reach.
    control: SocketAddr,
    /// Bound on every permitted connect.
    connect_timeout: Duration,
}

impl EgressPolicy {
    /// Allows only `control`, with every connect bounded by `connect_timeout`.
    pub fn new(control: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            control,
            connect_timeout,
        }
    }

    /// Whether `addr` is a permitted destination.
    pub fn permits(&self, addr: SocketAddr) -> bool {
        addr == self.control
    }

    /// Connects to `addr` under the policy. Blocked destinations fail
    /// immediately; permitted ones fail within the connect timeout.
    pub fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        if !self.permits(addr) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("egress to {addr} is blocked inside the sandbox"),
            ));
        }
        TcpStream::connect_timeout(&addr, self.connect_timeout)
    }
}
