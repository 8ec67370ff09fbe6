//! Engine configuration

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::network::NetworkIdentity;

/// Standard request size for a piece block (16 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

/// Everything an engine needs to start.
///
/// [`EngineConfig::configure`] sets the data directory and listen address;
/// feature toggles keep their defaults and are only reported through
/// [`EngineConfig::log_properties`]. DHT, PEX, uTP, webseeds and webtorrent
/// are not implemented, so their toggles stay disabled.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub identity: NetworkIdentity,

    pub disable_webseeds: bool,
    pub disable_tcp: bool,
    pub disable_utp: bool,
    pub disable_ipv4: bool,
    pub disable_ipv6: bool,
    pub disable_accept_rate_limiting: bool,
    pub no_dht: bool,
    pub debug: bool,
    /// Serve verified pieces to inbound peers
    pub seed: bool,
    pub public_ip4: Option<Ipv4Addr>,
    pub public_ip6: Option<Ipv6Addr>,
    pub disable_pex: bool,
    pub disable_webtorrent: bool,

    /// Peers dialed in addition to whatever trackers return
    pub initial_peers: Vec<SocketAddr>,
    pub max_peer_connections: usize,
    /// Idle time after which a peer session is dropped
    pub peer_timeout: Duration,
    pub connect_timeout: Duration,
    pub tracker_timeout: Duration,
    pub user_agent: String,
    /// Pause between peer discovery rounds while incomplete
    pub rediscover_interval: Duration,
    /// Give up when no piece completes for this long; `None` never gives up
    pub give_up_after: Option<Duration>,
    pub block_size: u32,
}

impl EngineConfig {
    /// Builds the configuration for one engine instance.
    pub fn configure(data_dir: impl Into<PathBuf>, identity: NetworkIdentity, debug: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            identity,
            disable_webseeds: true,
            disable_tcp: false,
            disable_utp: true,
            disable_ipv4: false,
            disable_ipv6: false,
            disable_accept_rate_limiting: false,
            no_dht: true,
            debug,
            seed: true,
            public_ip4: None,
            public_ip6: None,
            disable_pex: true,
            disable_webtorrent: true,
            initial_peers: Vec::new(),
            max_peer_connections: 50,
            peer_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            tracker_timeout: Duration::from_secs(30),
            user_agent: format!("tidefetch/{}", env!("CARGO_PKG_VERSION")),
            rediscover_interval: Duration::from_secs(15),
            give_up_after: None,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Copies connection tunables from the network section of the fetch config.
    pub fn with_network(mut self, network: &NetworkConfig) -> Self {
        self.initial_peers = network.initial_peers.clone();
        self.max_peer_connections = network.max_peer_connections.max(1);
        self.peer_timeout = network.peer_timeout;
        self.connect_timeout = network.connect_timeout;
        self.tracker_timeout = network.tracker_timeout;
        self.user_agent = network.user_agent.clone();
        self.rediscover_interval = network.rediscover_interval;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.identity.socket_addr()
    }

    /// Feature toggles as `(name, value)` pairs, in a stable order.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        let optional = |value: Option<String>| value.unwrap_or_else(|| "none".to_string());
        vec![
            ("disable_webseeds", self.disable_webseeds.to_string()),
            ("disable_tcp", self.disable_tcp.to_string()),
            ("disable_utp", self.disable_utp.to_string()),
            ("disable_ipv4", self.disable_ipv4.to_string()),
            ("disable_ipv6", self.disable_ipv6.to_string()),
            (
                "disable_accept_rate_limiting",
                self.disable_accept_rate_limiting.to_string(),
            ),
            ("no_dht", self.no_dht.to_string()),
            ("debug", self.debug.to_string()),
            ("seed", self.seed.to_string()),
            ("public_ip4", optional(self.public_ip4.map(|ip| ip.to_string()))),
            ("public_ip6", optional(self.public_ip6.map(|ip| ip.to_string()))),
            ("disable_pex", self.disable_pex.to_string()),
            ("disable_webtorrent", self.disable_webtorrent.to_string()),
        ]
    }

    /// Emits one `info` event per feature toggle.
    pub fn log_properties(&self) {
        for (name, value) in self.properties() {
            tracing::info!(name = name, value = %value, "engine property");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::network::PortSelection;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(debug: bool) -> EngineConfig {
        EngineConfig::configure(
            "/tmp/tidefetch-data",
            NetworkIdentity::loopback(PortSelection::Fixed(7881)),
            debug,
        )
    }

    #[test]
    fn test_only_data_dir_and_listen_address_are_set() {
        let config = config(false);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tidefetch-data"));
        assert_eq!(config.listen_addr(), "127.0.0.1:7881".parse().unwrap());
        assert!(!config.disable_tcp);
        assert!(config.seed);
        assert!(config.no_dht);
        assert_eq!(config.block_size, 16384);
    }

    #[test]
    fn test_debug_flag_is_carried() {
        assert!(config(true).debug);
        assert!(!config(false).debug);
    }

    #[test]
    fn test_thirteen_properties_in_order() {
        let names: Vec<_> = config(false).properties().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), 13);
        assert_eq!(names.first(), Some(&"disable_webseeds"));
        assert_eq!(names.last(), Some(&"disable_webtorrent"));
    }

    #[test]
    fn test_log_properties_emits_one_line_per_field() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        tracing::subscriber::with_default(subscriber, || config(true).log_properties());

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<_> = output.lines().filter(|l| l.contains("engine property")).collect();
        assert_eq!(lines.len(), 13);
        assert!(lines.iter().any(|l| l.contains("name=\"debug\"") && l.contains("value=true")));
        assert!(lines.iter().any(|l| l.contains("public_ip4") && l.contains("value=none")));
    }

    #[test]
    fn test_with_network_copies_tunables() {
        let network = NetworkConfig {
            max_peer_connections: 0,
            connect_timeout: Duration::from_millis(250),
            ..NetworkConfig::default()
        };
        let config = config(false).with_network(&network);
        assert_eq!(config.max_peer_connections, 1);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
