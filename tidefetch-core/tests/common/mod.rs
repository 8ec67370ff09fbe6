//! Local swarm fixture: an axum server for the descriptor and a tracker
//! stub, plus an optional seeding engine holding the content.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use parking_lot::Mutex;
use tempfile::TempDir;
use sha1::{Digest, Sha1};
use tidefetch_core::descriptor::{BencodeValue, DescriptorCreator};
use tidefetch_core::engine::{EngineConfig, SwarmEngine, SwarmEngineFactory};
use tidefetch_core::network::{NetworkIdentity, PortSelection};
use tidefetch_core::{EngineFactory, TorrentDescriptor, TorrentEngine};
use tokio::task::JoinHandle;

/// 18-byte payload of the single-file torrent.
pub const CONTENT: &[u8] = b"tidefetch test 18b";
pub const FILE_NAME: &str = "foo.txt";

/// Multi-file torrent: directory name and `(file, content)` entries.
pub const BUNDLE_NAME: &str = "bundle";
pub const BUNDLE_FILES: &[(&str, &[u8])] = &[("data.txt", CONTENT), ("empty.txt", b"")];

/// Single-file torrent without any content.
pub const EMPTY_NAME: &str = "nothing.txt";

/// How the seeder takes part in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeding {
    /// Seeder runs and the tracker hands it out.
    Announced,
    /// Seeder runs but the tracker returns no peers.
    Unannounced,
    /// Nobody has the content.
    Absent,
}

pub struct Swarm {
    pub http_addr: SocketAddr,
    pub torrent: Vec<u8>,
    pub descriptor: TorrentDescriptor,
    pub bundle: TorrentDescriptor,
    pub seeder: Option<SwarmEngine>,
    _seed_dir: TempDir,
    server: JoinHandle<()>,
}

impl Swarm {
    pub async fn start(seeding: Seeding) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = listener.local_addr().unwrap();

        let seed_dir = tempfile::tempdir().unwrap();
        let source = seed_dir.path().join(FILE_NAME);
        tokio::fs::write(&source, CONTENT).await.unwrap();
        let created = DescriptorCreator::new()
            .create_from_file(&source, vec![format!("http://{http_addr}/announce")])
            .await
            .unwrap();

        let announce = format!("http://{http_addr}/announce");
        let bundle_bytes = bundle_torrent(&announce);
        let bundle = TorrentDescriptor::from_bytes(&bundle_bytes).unwrap();
        let empty_bytes = empty_torrent(&announce);
        for (name, content) in BUNDLE_FILES {
            let path = seed_dir.path().join(BUNDLE_NAME).join(name);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(path, content).await.unwrap();
        }

        let seeder = match seeding {
            Seeding::Absent => None,
            Seeding::Announced | Seeding::Unannounced => {
                let config = EngineConfig::configure(
                    seed_dir.path(),
                    NetworkIdentity::loopback(PortSelection::Ephemeral),
                    false,
                );
                let engine = SwarmEngineFactory.construct(config).await.unwrap();
                engine
                    .register_torrent(created.descriptor.clone())
                    .await
                    .unwrap();
                engine.register_torrent(bundle.clone()).await.unwrap();
                Some(engine)
            }
        };

        let announced = match (&seeder, seeding) {
            (Some(engine), Seeding::Announced) => vec![engine.local_addr()],
            _ => Vec::new(),
        };
        let torrents = vec![
            ("/foo.torrent", created.bytes.clone()),
            ("/bundle.torrent", bundle_bytes),
            ("/empty.torrent", empty_bytes),
        ];
        let router = router(torrents, announced);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            http_addr,
            torrent: created.bytes,
            descriptor: created.descriptor,
            bundle,
            seeder,
            _seed_dir: seed_dir,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.http_addr)
    }

    pub fn torrent_url(&self) -> String {
        self.url("/foo.torrent")
    }

    pub fn bundle_url(&self) -> String {
        self.url("/bundle.torrent")
    }

    pub fn empty_url(&self) -> String {
        self.url("/empty.torrent")
    }

    pub fn seeder_addr(&self) -> Option<SocketAddr> {
        self.seeder.as_ref().map(SwarmEngine::local_addr)
    }

    pub async fn shutdown(self) {
        if let Some(seeder) = &self.seeder {
            seeder.close().await;
        }
        self.server.abort();
    }
}

fn router(torrents: Vec<(&'static str, Vec<u8>)>, peers: Vec<SocketAddr>) -> Router {
    let announce = compact_announce(&peers);
    let router = torrents
        .into_iter()
        .fold(Router::new(), |router, (path, bytes)| {
            router.route(path, get(move || async move { bytes }))
        });
    router
        .route("/garbage.torrent", get(|| async { "this is not bencode" }))
        .route(
            "/forbidden.torrent",
            get(|| async { (StatusCode::FORBIDDEN, "no") }),
        )
        .route("/announce", get(move || async move { announce }))
}

/// Two files in one piece; the second is empty.
fn bundle_torrent(announce: &str) -> Vec<u8> {
    let files: Vec<BencodeValue> = BUNDLE_FILES
        .iter()
        .map(|(name, content)| {
            BencodeValue::dict()
                .with("length", content.len() as i64)
                .with("path", vec![BencodeValue::from(*name)])
        })
        .collect();
    let data: Vec<u8> = BUNDLE_FILES.iter().flat_map(|(_, content)| content.iter().copied()).collect();
    let info = BencodeValue::dict()
        .with("files", files)
        .with("name", BUNDLE_NAME)
        .with("piece length", 262_144i64)
        .with("pieces", Sha1::digest(&data).to_vec());
    BencodeValue::dict()
        .with("announce", announce)
        .with("info", info)
        .encode()
}

fn empty_torrent(announce: &str) -> Vec<u8> {
    let info = BencodeValue::dict()
        .with("length", 0i64)
        .with("name", EMPTY_NAME)
        .with("piece length", 262_144i64)
        .with("pieces", Vec::<u8>::new());
    BencodeValue::dict()
        .with("announce", announce)
        .with("info", info)
        .encode()
}

fn compact_announce(peers: &[SocketAddr]) -> Vec<u8> {
    let mut compact = Vec::new();
    for peer in peers {
        if let IpAddr::V4(ip) = peer.ip() {
            compact.extend_from_slice(&ip.octets());
            compact.extend_from_slice(&peer.port().to_be_bytes());
        }
    }
    BencodeValue::dict()
        .with("interval", 1800i64)
        .with("peers", compact)
        .encode()
}

/// In-memory log writer for `tracing_subscriber::fmt`.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn dispatch(&self, level: tracing::Level) -> tracing::Dispatch {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(level)
            .finish();
        tracing::Dispatch::new(subscriber)
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
