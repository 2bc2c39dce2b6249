//! Port policy: allowed range plus a best-effort OS occupancy probe

use std::ops::RangeInclusive;

use tracing::{debug, trace};

use crate::errors::{DaemonError, Result};

/// Lowest port a mock server may bind
pub const MIN_MOCK_PORT: u16 = 9001;
/// Highest port a mock server may bind
pub const MAX_MOCK_PORT: u16 = 9999;

pub const ALLOWED_PORTS: RangeInclusive<u16> = MIN_MOCK_PORT..=MAX_MOCK_PORT;

/// Whether `port` lies in the range mock servers are allowed to bind.
pub fn is_allowed_range(port: i64) -> bool {
    (i64::from(MIN_MOCK_PORT)..=i64::from(MAX_MOCK_PORT)).contains(&port)
}

/// Check the range and narrow the port to `u16`.
pub fn validate_port(port: i64) -> Result<u16> {
    if !is_allowed_range(port) {
        return Err(DaemonError::InvalidPort(port));
    }
    u16::try_from(port).map_err(|_| DaemonError::InvalidPort(port))
}

/// Answers whether something on the host is already listening on a port.
///
/// Implementations are best effort: an inconclusive probe must answer
/// `false` and leave the spawn itself to surface a real bind failure.
pub trait PortProbe: Send + Sync {
    fn is_port_in_use(&self, port: u16) -> bool;
}

impl<F> PortProbe for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn is_port_in_use(&self, port: u16) -> bool {
        self(port)
    }
}

/// Probe backed by the kernel's TCP socket tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortProbe;

impl PortProbe for SystemPortProbe {
    fn is_port_in_use(&self, port: u16) -> bool {
        let in_use = listening_on(port).unwrap_or_else(|| {
            debug!("Port probe for {} inconclusive, assuming free", port);
            false
        });
        trace!("Port {} in use: {}", port, in_use);
        in_use
    }
}

/// `None` when neither TCP table could be read.
#[cfg(target_os = "linux")]
fn listening_on(port: u16) -> Option<bool> {
    use procfs::net::TcpState;

    let mut conclusive = false;
    for table in [procfs::net::tcp(), procfs::net::tcp6()] {
        match table {
            Ok(entries) => {
                conclusive = true;
                if entries
                    .iter()
                    .any(|e| matches!(e.state, TcpState::Listen) && e.local_address.port() == port)
                {
                    return Some(true);
                }
            }
            Err(e) => debug!("Cannot read TCP table: {}", e),
        }
    }
    conclusive.then_some(false)
}

#[cfg(not(target_os = "linux"))]
fn listening_on(_port: u16) -> Option<bool> {
    None
}
