//! Listen address and port policy

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::port::allocate_port;

/// Conventional BitTorrent listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 6881;

/// How the listen port should be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortSelection {
    /// Always 6881. Fails when another client already holds it.
    WellKnown,
    /// Fresh OS-assigned port per engine, so concurrent engines coexist.
    #[default]
    Ephemeral,
    /// Caller-specified port.
    Fixed(u16),
}

/// Where a [`NetworkIdentity`]'s port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    WellKnown,
    Fixed,
    OsAssigned,
    RandomFallback,
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WellKnown => "well-known",
            Self::Fixed => "fixed",
            Self::OsAssigned => "os-assigned",
            Self::RandomFallback => "random-fallback",
        };
        f.write_str(name)
    }
}

/// Address and port an engine listens on. Immutable once the engine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub listen_address: IpAddr,
    pub listen_port: u16,
    /// True when the wildcard IPv6 address also accepts IPv4 peers.
    pub dual_stack: bool,
    pub port_source: PortSource,
}

impl NetworkIdentity {
    /// Resolves an identity using the platform listen policy.
    ///
    /// Linux hosts listen on the IPv6 wildcard (dual stack); other platforms
    /// stay on IPv4 loopback. `address_override` replaces that choice.
    pub fn resolve(selection: PortSelection, address_override: Option<IpAddr>) -> Self {
        let (listen_port, port_source) = match selection {
            PortSelection::WellKnown => (DEFAULT_LISTEN_PORT, PortSource::WellKnown),
            PortSelection::Fixed(port) => (port, PortSource::Fixed),
            PortSelection::Ephemeral => {
                let allocation = allocate_port();
                (allocation.port, allocation.source)
            }
        };

        let listen_address = address_override.unwrap_or_else(default_listen_address);

        let identity = Self {
            listen_address,
            listen_port,
            dual_stack: listen_address == IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port_source,
        };

        tracing::debug!(
            listen_addr = %identity.socket_addr(),
            port_source = %identity.port_source,
            dual_stack = identity.dual_stack,
            "Resolved network identity"
        );

        identity
    }

    /// Identity bound to IPv4 loopback, used by tests and local seeding.
    pub fn loopback(selection: PortSelection) -> Self {
        Self::resolve(selection, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }
}

/// Platform default listen address.
pub fn default_listen_address() -> IpAddr {
    if cfg!(target_os = "linux") {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_port() {
        let identity = NetworkIdentity::resolve(PortSelection::WellKnown, None);
        assert_eq!(identity.listen_port, 6881);
        assert_eq!(identity.port_source, PortSource::WellKnown);
    }

    #[test]
    fn test_ephemeral_takes_precedence_over_well_known() {
        let identity = NetworkIdentity::resolve(PortSelection::Ephemeral, None);
        assert_ne!(identity.listen_port, 0);
        assert!(matches!(
            identity.port_source,
            PortSource::OsAssigned | PortSource::RandomFallback
        ));
    }

    #[test]
    fn test_fixed_port_and_override() {
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        let identity = NetworkIdentity::resolve(PortSelection::Fixed(7000), Some(addr));
        assert_eq!(identity.socket_addr(), "127.0.0.1:7000".parse().unwrap());
        assert_eq!(identity.port_source, PortSource::Fixed);
        assert!(!identity.dual_stack);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_defaults_to_dual_stack_wildcard() {
        let identity = NetworkIdentity::resolve(PortSelection::Fixed(7001), None);
        assert_eq!(identity.listen_address, IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert!(identity.dual_stack);
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_other_platforms_default_to_loopback() {
        let identity = NetworkIdentity::resolve(PortSelection::Fixed(7001), None);
        assert_eq!(identity.listen_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
