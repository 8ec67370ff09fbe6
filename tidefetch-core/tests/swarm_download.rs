//! End-to-end downloads through the swarm engine against a local seeder.

mod common;

use std::time::Duration;

use common::{BUNDLE_FILES, BUNDLE_NAME, CONTENT, EMPTY_NAME, FILE_NAME, LogBuffer, Seeding, Swarm};
use tidefetch_core::engine::{EngineConfig, SwarmEngineFactory};
use tidefetch_core::fetch::{FetchErrorKind, IncompleteReason};
use tidefetch_core::network::{NetworkIdentity, PortSelection};
use tidefetch_core::{
    DownloadOrchestrator, EngineFactory, FetchConfig, FetchError, TorrentEngine,
};
use tokio_test::{assert_err, assert_ok};

fn entry_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn orchestrator(config: FetchConfig) -> DownloadOrchestrator<SwarmEngineFactory> {
    DownloadOrchestrator::new(SwarmEngineFactory, config)
}

#[tokio::test]
async fn test_downloads_single_file_from_announced_seeder() {
    let swarm = Swarm::start(Seeding::Announced).await;
    let destination = tempfile::tempdir().unwrap();
    let client = reqwest::Client::new();

    let completed = assert_ok!(
        orchestrator(FetchConfig::for_testing())
            .download_file(destination.path(), &client, &swarm.torrent_url())
            .await
    );

    assert_eq!(completed.total_length, 18);
    assert_eq!(completed.info_hash, swarm.descriptor.info_hash);
    assert_eq!(completed.files, vec![destination.path().join(FILE_NAME)]);
    assert_eq!(swarm.descriptor.piece_length, 262_144);

    let written = tokio::fs::read(destination.path().join(FILE_NAME)).await.unwrap();
    assert_eq!(written, CONTENT);
    assert_eq!(entry_names(destination.path()), vec![FILE_NAME.to_string()]);

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_multi_file_download_writes_empty_entry() {
    let swarm = Swarm::start(Seeding::Announced).await;
    let destination = tempfile::tempdir().unwrap();

    let completed = assert_ok!(
        orchestrator(FetchConfig::for_testing())
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.bundle_url())
            .await
    );

    assert_eq!(completed.info_hash, swarm.bundle.info_hash);
    assert_eq!(completed.files.len(), BUNDLE_FILES.len());
    for path in &completed.files {
        assert!(path.exists(), "{} missing", path.display());
    }
    for (name, content) in BUNDLE_FILES {
        let written = tokio::fs::read(destination.path().join(BUNDLE_NAME).join(name))
            .await
            .unwrap();
        assert_eq!(&written, content);
    }

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_zero_byte_torrent_creates_its_file() {
    let swarm = Swarm::start(Seeding::Absent).await;
    let destination = tempfile::tempdir().unwrap();

    let completed = assert_ok!(
        orchestrator(FetchConfig::for_testing())
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.empty_url())
            .await
    );

    assert_eq!(completed.total_length, 0);
    assert_eq!(completed.files, vec![destination.path().join(EMPTY_NAME)]);
    let metadata = tokio::fs::metadata(destination.path().join(EMPTY_NAME))
        .await
        .unwrap();
    assert_eq!(metadata.len(), 0);

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_downloads_from_initial_peer_without_tracker_help() {
    let swarm = Swarm::start(Seeding::Unannounced).await;
    let destination = tempfile::tempdir().unwrap();

    let mut config = FetchConfig::for_testing();
    config.network.initial_peers = swarm.seeder_addr().into_iter().collect();

    assert_ok!(
        orchestrator(config)
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.torrent_url())
            .await
    );
    let written = tokio::fs::read(destination.path().join(FILE_NAME)).await.unwrap();
    assert_eq!(written, CONTENT);

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_missing_descriptor_leaves_destination_empty() {
    let swarm = Swarm::start(Seeding::Absent).await;
    let destination = tempfile::tempdir().unwrap();

    let err = assert_err!(
        orchestrator(FetchConfig::for_testing())
            .download_file(
                destination.path(),
                &reqwest::Client::new(),
                &swarm.url("/nope.torrent"),
            )
            .await
    );

    match err {
        FetchError::NonSuccessStatus { status, .. } => assert_eq!(status.as_u16(), 404),
        other => panic!("expected NonSuccessStatus, got {other:?}"),
    }
    let entries = std::fs::read_dir(destination.path()).unwrap().count();
    assert_eq!(entries, 0);

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_no_peers_hits_deadline() {
    let swarm = Swarm::start(Seeding::Absent).await;
    let destination = tempfile::tempdir().unwrap();

    let mut config = FetchConfig::for_testing();
    config.download.completion_deadline = Some(Duration::from_millis(500));

    let err = assert_err!(
        orchestrator(config)
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.torrent_url())
            .await
    );
    match err {
        FetchError::IncompleteTransfer {
            reason,
            completed,
            total,
            ..
        } => {
            assert_eq!(reason, IncompleteReason::DeadlineElapsed);
            assert_eq!(completed, 0);
            assert_eq!(total, 18);
        }
        other => panic!("expected IncompleteTransfer, got {other:?}"),
    }

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_engine_gives_up_without_progress() {
    let swarm = Swarm::start(Seeding::Absent).await;
    let destination = tempfile::tempdir().unwrap();

    let mut config = FetchConfig::for_testing();
    config.download.engine_give_up_after = Some(Duration::from_millis(300));

    let err = assert_err!(
        orchestrator(config)
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.torrent_url())
            .await
    );
    assert!(matches!(
        err,
        FetchError::IncompleteTransfer {
            reason: IncompleteReason::EngineGaveUp,
            ..
        }
    ));

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_port_collision_is_construction_failure() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    let destination = tempfile::tempdir().unwrap();

    let mut config = FetchConfig::for_testing();
    config.network.port_selection = PortSelection::Fixed(port);

    let err = assert_err!(
        orchestrator(config)
            .download_file(
                destination.path(),
                &reqwest::Client::new(),
                "http://127.0.0.1:9/unused.torrent",
            )
            .await
    );
    assert_eq!(err.kind(), FetchErrorKind::EngineConstructionFailed);
}

#[tokio::test]
async fn test_concurrent_engines_bind_distinct_ports() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let config = |dir: &std::path::Path| {
        EngineConfig::configure(dir, NetworkIdentity::loopback(PortSelection::Ephemeral), false)
    };

    let (first, second) = tokio::join!(
        SwarmEngineFactory.construct(config(first_dir.path())),
        SwarmEngineFactory.construct(config(second_dir.path())),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_ne!(first.local_port(), second.local_port());

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_never_used_engine_can_be_closed_or_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let config =
        EngineConfig::configure(dir.path(), NetworkIdentity::loopback(PortSelection::Ephemeral), false);

    let closed = SwarmEngineFactory.construct(config.clone()).await.unwrap();
    closed.close().await;
    closed.close().await;
    drop(closed);

    let dropped = SwarmEngineFactory.construct(config).await.unwrap();
    drop(dropped);
}

#[tokio::test]
async fn test_log_sink_captures_engine_properties() {
    let swarm = Swarm::start(Seeding::Announced).await;
    let destination = tempfile::tempdir().unwrap();
    let logs = LogBuffer::default();

    assert_ok!(
        orchestrator(FetchConfig::for_testing())
            .with_log_sink(logs.dispatch(tracing::Level::DEBUG))
            .download_file(destination.path(), &reqwest::Client::new(), &swarm.torrent_url())
            .await
    );

    let output = logs.contents();
    let properties = output
        .lines()
        .filter(|line| line.contains("engine property"))
        .count();
    assert_eq!(properties, 13);
    assert!(output.contains("Download state changed"));
    assert!(output.contains("Download complete"));

    swarm.shutdown().await;
}
