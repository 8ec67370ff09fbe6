//! HTTP tracker client with URL building and response parsing

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use super::types::{AnnounceRequest, AnnounceResponse};
use crate::engine::EngineError;

const DEFAULT_INTERVAL: u32 = 1800;

/// Announces to HTTP(S) trackers.
///
/// One client is shared across every tracker URL of every transfer in an
/// engine, so connection pooling and the configured timeout apply to all.
#[derive(Clone)]
pub struct HttpTrackerClient {
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// # Errors
    /// - `EngineError::Tracker` - HTTP client could not be built
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| EngineError::Tracker {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// True for schemes this client can announce to.
    pub fn supports(announce_url: &str) -> bool {
        url::Url::parse(announce_url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    /// Sends an announce and returns the peers the tracker knows about.
    ///
    /// # Errors
    /// - `EngineError::Tracker` - Network failure, non-success status,
    ///   tracker-reported failure or undecodable response
    pub async fn announce(
        &self,
        announce_url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, EngineError> {
        let url = Self::build_announce_url(announce_url, request);
        tracing::debug!(tracker = %announce_url, event = ?request.event, "Announcing to tracker");

        let tracker_error = |reason: String| EngineError::Tracker {
            url: announce_url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| tracker_error(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(tracker_error(format!("HTTP status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| tracker_error(format!("Failed to read body: {e}")))?;

        let parsed = Self::parse_announce_response(&body).map_err(tracker_error)?;
        tracing::debug!(
            tracker = %announce_url,
            peers = parsed.peers.len(),
            interval = parsed.interval,
            "Tracker announce succeeded"
        );
        Ok(parsed)
    }

    /// Appends the announce query, respecting any query already in the URL.
    pub(crate) fn build_announce_url(announce_url: &str, request: &AnnounceRequest) -> String {
        // Raw bytes must be percent-encoded by hand; url::Url would re-encode '%'
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            urlencoding::encode_binary(request.info_hash.as_bytes()),
            urlencoding::encode_binary(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
        );
        if let Some(event) = request.event.as_query_value() {
            query.push_str("&event=");
            query.push_str(event);
        }

        let separator = if announce_url.contains('?') { '&' } else { '?' };
        format!("{announce_url}{separator}{query}")
    }

    pub(crate) fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, String> {
        let parsed = bencode_rs::Value::parse(body)
            .map_err(|e| format!("Failed to parse tracker response: {e:?}"))?;

        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err("Invalid tracker response format".to_string());
        };

        if let Some(bencode_rs::Value::Bytes(reason)) = dict.get(b"failure reason".as_slice()) {
            return Err(format!(
                "Tracker reported failure: {}",
                String::from_utf8_lossy(reason)
            ));
        }

        let integer = |key: &[u8]| match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) if *value >= 0 => {
                Some(u32::try_from(*value).unwrap_or(u32::MAX))
            }
            _ => None,
        };

        let mut peers = match dict.get(b"peers".as_slice()) {
            Some(bencode_rs::Value::Bytes(compact)) => Self::parse_compact_peers_v4(compact)?,
            Some(bencode_rs::Value::List(entries)) => Self::parse_dictionary_peers(entries),
            _ => Vec::new(),
        };
        if let Some(bencode_rs::Value::Bytes(compact)) = dict.get(b"peers6".as_slice()) {
            peers.extend(Self::parse_compact_peers_v6(compact)?);
        }

        Ok(AnnounceResponse {
            interval: integer(b"interval".as_slice()).unwrap_or(DEFAULT_INTERVAL),
            complete: integer(b"complete".as_slice()).unwrap_or(0),
            incomplete: integer(b"incomplete".as_slice()).unwrap_or(0),
            peers,
        })
    }

    pub(crate) fn parse_compact_peers_v4(bytes: &[u8]) -> Result<Vec<SocketAddr>, String> {
        if !bytes.len().is_multiple_of(6) {
            return Err("Invalid compact peer data length".to_string());
        }
        Ok(bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([chunk[4], chunk[5]]))
            })
            .collect())
    }

    pub(crate) fn parse_compact_peers_v6(bytes: &[u8]) -> Result<Vec<SocketAddr>, String> {
        if !bytes.len().is_multiple_of(18) {
            return Err("Invalid compact IPv6 peer data length".to_string());
        }
        Ok(bytes
            .chunks_exact(18)
            .map(|chunk| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&chunk[..16]);
                SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::from(octets)),
                    u16::from_be_bytes([chunk[16], chunk[17]]),
                )
            })
            .collect())
    }

    /// Non-compact `peers` list; entries with unusable fields are skipped.
    fn parse_dictionary_peers(entries: &[bencode_rs::Value<'_>]) -> Vec<SocketAddr> {
        entries
            .iter()
            .filter_map(|entry| {
                let bencode_rs::Value::Dictionary(peer) = entry else {
                    return None;
                };
                let ip = match peer.get(b"ip".as_slice()) {
                    Some(bencode_rs::Value::Bytes(ip)) => {
                        std::str::from_utf8(ip).ok()?.parse::<IpAddr>().ok()?
                    }
                    _ => return None,
                };
                let port = match peer.get(b"port".as_slice()) {
                    Some(bencode_rs::Value::Integer(port)) => u16::try_from(*port).ok()?,
                    _ => return None,
                };
                Some(SocketAddr::new(ip, port))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::InfoHash;
    use crate::protocol::PeerId;
    use crate::tracker::AnnounceEvent;

    fn request(event: AnnounceEvent) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([0x12; 20]),
            peer_id: PeerId::new(*b"-TF0001-abcdefghijkl"),
            port: 6881,
            uploaded: 0,
            downloaded: 100,
            left: 900,
            event,
        }
    }

    #[test]
    fn test_announce_url_encoding() {
        let url = HttpTrackerClient::build_announce_url(
            "http://tracker.example/announce",
            &request(AnnounceEvent::Started),
        );
        assert!(url.starts_with("http://tracker.example/announce?info_hash=%12%12"));
        assert!(url.contains("peer_id=-TF0001-abcdefghijkl"));
        assert!(url.contains("&left=900&compact=1&event=started"));
    }

    #[test]
    fn test_existing_query_and_periodic_event() {
        let url = HttpTrackerClient::build_announce_url(
            "http://tracker.example/announce?passkey=abc",
            &request(AnnounceEvent::Periodic),
        );
        assert!(url.contains("?passkey=abc&info_hash="));
        assert!(!url.contains("event="));
    }

    #[test]
    fn test_supported_schemes() {
        assert!(HttpTrackerClient::supports("http://127.0.0.1/announce"));
        assert!(HttpTrackerClient::supports("https://tracker.example/announce"));
        assert!(!HttpTrackerClient::supports("udp://127.0.0.1:6969"));
        assert!(!HttpTrackerClient::supports("not a url"));
    }

    #[test]
    fn test_parse_compact_response() {
        let body = b"d8:completei1e10:incompletei0e8:intervali60e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();
        assert_eq!(response.interval, 60);
        assert_eq!(response.complete, 1);
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_dictionary_peers() {
        let body = b"d8:intervali30e5:peersld2:ip9:127.0.0.14:porti7000eed2:ip3:bad4:porti1eeee";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();
        assert_eq!(response.peers, vec!["127.0.0.1:7000".parse().unwrap()]);
    }

    #[test]
    fn test_parse_ipv6_peers() {
        let mut body = b"d8:intervali30e5:peers0:6:peers618:".to_vec();
        body.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        body.extend_from_slice(&[0x1a, 0xe1]);
        body.push(b'e');
        let response = HttpTrackerClient::parse_announce_response(&body).unwrap();
        assert_eq!(response.peers, vec!["[::1]:6881".parse().unwrap()]);
    }

    #[test]
    fn test_failure_reason_surfaces() {
        let body = b"d14:failure reason17:torrent not founde";
        let err = HttpTrackerClient::parse_announce_response(body).unwrap_err();
        assert!(err.contains("torrent not found"));
    }

    #[test]
    fn test_truncated_compact_peers_rejected() {
        let body = b"d8:intervali30e5:peers5:\x7f\x00\x00\x01\x1ae";
        assert!(HttpTrackerClient::parse_announce_response(body).is_err());
    }
}
