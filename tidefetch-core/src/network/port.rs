//! Ephemeral port allocation

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::ops::Range;

use rand::Rng;

use super::PortSource;

/// Range the fallback draws from when the OS cannot hand out a port.
pub const FALLBACK_PORT_RANGE: Range<u16> = 10_000..50_000;

/// Port chosen for an engine and how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocation {
    pub port: u16,
    pub source: PortSource,
}

/// Returns a port that was unused at the time of the call.
///
/// The port is released before returning, so another process may claim it
/// before the engine binds. Callers treat a later bind failure as an engine
/// construction error.
pub fn allocate_ephemeral_port() -> u16 {
    allocate_port().port
}

/// Like [`allocate_ephemeral_port`] but reports whether the OS assigned the
/// port or the random fallback was used.
pub fn allocate_port() -> PortAllocation {
    allocate_port_with(bind_wildcard)
}

fn bind_wildcard() -> io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
    Ok(listener.local_addr()?.port())
}

fn allocate_port_with(bind: impl FnOnce() -> io::Result<u16>) -> PortAllocation {
    match bind() {
        Ok(port) => {
            tracing::debug!(port, "OS assigned ephemeral port");
            PortAllocation {
                port,
                source: PortSource::OsAssigned,
            }
        }
        Err(e) => {
            let port = rand::rng().random_range(FALLBACK_PORT_RANGE);
            tracing::warn!(
                error = %e,
                port,
                "Could not bind ephemeral port, falling back to random port"
            );
            PortAllocation {
                port,
                source: PortSource::RandomFallback,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_os_assigned_port_is_bindable() {
        let allocation = allocate_port();
        assert_eq!(allocation.source, PortSource::OsAssigned);
        assert_ne!(allocation.port, 0);

        // The probe listener is gone, so the port can be bound again
        let listener = TcpListener::bind(("0.0.0.0", allocation.port));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_successive_allocations_differ() {
        // Hold each port so the OS cannot reuse it for the next call
        let mut held = Vec::new();
        let mut ports = HashSet::new();
        for _ in 0..8 {
            let port = allocate_ephemeral_port();
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)) {
                held.push(listener);
                ports.insert(port);
            }
        }
        assert_eq!(ports.len(), held.len());
    }

    #[test]
    fn test_bind_failure_uses_fallback() {
        let allocation = allocate_port_with(|| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no sockets"))
        });
        assert_eq!(allocation.source, PortSource::RandomFallback);
        assert!(FALLBACK_PORT_RANGE.contains(&allocation.port));
    }

    proptest! {
        #[test]
        fn fallback_always_in_range(_seed in any::<u64>()) {
            let allocation = allocate_port_with(|| Err(io::Error::other("denied")));
            prop_assert!(allocation.port >= 10_000 && allocation.port < 50_000);
        }
    }
}
