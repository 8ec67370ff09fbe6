//! Centralized configuration for tidefetch.
//!
//! Defaults live here; environment variables and CLI flags override them.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::network::PortSelection;

/// Configuration for one [`crate::fetch::DownloadOrchestrator`].
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    pub network: NetworkConfig,
    pub download: DownloadConfig,
}

/// Listen identity and connection tunables handed to each engine.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// How each engine picks its listen port
    pub port_selection: PortSelection,
    /// Replaces the platform listen address policy when set
    pub listen_address: Option<IpAddr>,
    /// HTTP timeout for tracker announces
    pub tracker_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle time after which a peer session is dropped
    pub peer_timeout: Duration,
    pub user_agent: String,
    pub max_peer_connections: usize,
    /// Peers dialed without asking a tracker
    pub initial_peers: Vec<SocketAddr>,
    pub rediscover_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port_selection: PortSelection::Ephemeral,
            listen_address: None,
            tracker_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(30),
            user_agent: format!("tidefetch/{}", env!("CARGO_PKG_VERSION")),
            max_peer_connections: 50,
            initial_peers: Vec::new(),
            rediscover_interval: Duration::from_secs(15),
        }
    }
}

/// Limits of a single download invocation.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Upper bound on the completion wait; `None` waits indefinitely
    pub completion_deadline: Option<Duration>,
    /// Passed through as the engine's `debug` toggle
    pub debug_engine: bool,
    /// Engine abandons the swarm after this long without progress
    pub engine_give_up_after: Option<Duration>,
    /// Descriptor bodies above this size are rejected
    pub max_descriptor_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            completion_deadline: Some(Duration::from_secs(3600)),
            debug_engine: false,
            engine_give_up_after: None,
            max_descriptor_bytes: 16 * 1024 * 1024,
        }
    }
}

impl FetchConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("TIDEFETCH_LISTEN_PORT") {
            config.network.port_selection = PortSelection::Fixed(port);
        }

        if let Some(address) = env_parse::<IpAddr>("TIDEFETCH_LISTEN_ADDR") {
            config.network.listen_address = Some(address);
        }

        if let Some(seconds) = env_parse::<u64>("TIDEFETCH_DEADLINE_SECS") {
            config.download.completion_deadline =
                (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Some(count) = env_parse::<usize>("TIDEFETCH_MAX_PEERS") {
            config.network.max_peer_connections = count;
        }

        if let Some(seconds) = env_parse::<u64>("TIDEFETCH_TRACKER_TIMEOUT") {
            config.network.tracker_timeout = Duration::from_secs(seconds);
        }

        if let Some(debug) = env_parse::<bool>("TIDEFETCH_DEBUG_ENGINE") {
            config.download.debug_engine = debug;
        }

        config
    }

    /// Loopback, short timeouts and a bounded wait, for local swarms in tests.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                listen_address: Some(IpAddr::from([127, 0, 0, 1])),
                tracker_timeout: Duration::from_secs(2),
                connect_timeout: Duration::from_secs(1),
                peer_timeout: Duration::from_secs(5),
                rediscover_interval: Duration::from_millis(200),
                ..NetworkConfig::default()
            },
            download: DownloadConfig {
                completion_deadline: Some(Duration::from_secs(30)),
                ..DownloadConfig::default()
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = FetchConfig::default();

        assert_eq!(config.network.port_selection, PortSelection::Ephemeral);
        assert_eq!(config.network.max_peer_connections, 50);
        assert_eq!(config.network.tracker_timeout, Duration::from_secs(30));
        assert!(config.network.listen_address.is_none());
        assert_eq!(
            config.download.completion_deadline,
            Some(Duration::from_secs(3600))
        );
        assert!(!config.download.debug_engine);
        assert_eq!(config.download.max_descriptor_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_testing_preset_is_loopback() {
        let config = FetchConfig::for_testing();
        assert_eq!(
            config.network.listen_address,
            Some(IpAddr::from([127, 0, 0, 1]))
        );
        assert!(config.network.rediscover_interval < Duration::from_secs(1));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("TIDEFETCH_LISTEN_PORT", "7001");
            std::env::set_var("TIDEFETCH_LISTEN_ADDR", "::1");
            std::env::set_var("TIDEFETCH_DEADLINE_SECS", "0");
            std::env::set_var("TIDEFETCH_MAX_PEERS", "12");
            std::env::set_var("TIDEFETCH_TRACKER_TIMEOUT", "not-a-number");
            std::env::set_var("TIDEFETCH_DEBUG_ENGINE", "true");
        }

        let config = FetchConfig::from_env();

        assert_eq!(config.network.port_selection, PortSelection::Fixed(7001));
        assert_eq!(
            config.network.listen_address,
            Some("::1".parse::<IpAddr>().unwrap())
        );
        assert_eq!(config.download.completion_deadline, None);
        assert_eq!(config.network.max_peer_connections, 12);
        assert_eq!(config.network.tracker_timeout, Duration::from_secs(30));
        assert!(config.download.debug_engine);

        unsafe {
            std::env::remove_var("TIDEFETCH_LISTEN_PORT");
            std::env::remove_var("TIDEFETCH_LISTEN_ADDR");
            std::env::remove_var("TIDEFETCH_DEADLINE_SECS");
            std::env::remove_var("TIDEFETCH_MAX_PEERS");
            std::env::remove_var("TIDEFETCH_TRACKER_TIMEOUT");
            std::env::remove_var("TIDEFETCH_DEBUG_ENGINE");
        }
    }
}
