//! Scriptable engine for orchestrator tests
//!
//! Every trait call is appended to a shared log so tests can assert call
//! order, e.g. that `close` follows `wait_all_complete` on every path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::config::EngineConfig;
use super::transfer::wait_for_terminal;
use super::{EngineError, EngineFactory, TorrentEngine, TransferHandle, TransferStatus};
use crate::descriptor::{InfoHash, TorrentDescriptor};

/// Trait method invoked on a mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    Construct,
    Register,
    RequestFullDownload,
    WaitAll,
    Close,
}

/// What happens once a full download is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Every byte arrives and the transfer completes.
    Complete,
    /// Engine gives up with only `completed` bytes on disk.
    Stall { completed: u64 },
    /// Transfer never reaches a terminal status.
    NeverFinish,
    /// Engine stops the transfer.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct MockBehaviour {
    pub fail_construction: bool,
    pub fail_registration: bool,
    pub fail_request: bool,
    pub outcome: MockOutcome,
    /// Port reported by constructed engines
    pub port: u16,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            fail_construction: false,
            fail_registration: false,
            fail_request: false,
            outcome: MockOutcome::Complete,
            port: 51413,
        }
    }
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

/// Factory producing [`MockEngine`]s that share one call log.
#[derive(Debug, Clone, Default)]
pub struct MockEngineFactory {
    behaviour: MockBehaviour,
    calls: CallLog,
    configs: Arc<Mutex<Vec<EngineConfig>>>,
}

impl MockEngineFactory {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            ..Self::default()
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Configuration passed to the most recent `construct`.
    pub fn last_config(&self) -> Option<EngineConfig> {
        self.configs.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    type Engine = MockEngine;

    async fn construct(&self, config: EngineConfig) -> Result<MockEngine, EngineError> {
        self.calls.lock().push(MockCall::Construct);
        let addr = config.listen_addr();
        self.configs.lock().push(config);

        if self.behaviour.fail_construction {
            return Err(EngineError::Bind {
                addr,
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }

        let (closed, _) = watch::channel(false);
        Ok(MockEngine {
            behaviour: self.behaviour,
            calls: Arc::clone(&self.calls),
            closed,
            transfers: Mutex::new(Vec::new()),
        })
    }
}

pub struct MockEngine {
    behaviour: MockBehaviour,
    calls: CallLog,
    closed: watch::Sender<bool>,
    transfers: Mutex<Vec<MockTransfer>>,
}

impl MockEngine {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl TorrentEngine for MockEngine {
    type Handle = MockTransfer;

    async fn register_torrent(
        &self,
        descriptor: TorrentDescriptor,
    ) -> Result<MockTransfer, EngineError> {
        self.calls.lock().push(MockCall::Register);
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }
        if self.behaviour.fail_registration {
            return Err(EngineError::DuplicateTorrent {
                info_hash: descriptor.info_hash,
            });
        }

        let (status, _) = watch::channel(TransferStatus::Registered);
        let transfer = MockTransfer {
            info_hash: descriptor.info_hash,
            total_length: descriptor.total_length,
            completed: Arc::new(AtomicU64::new(0)),
            status: Arc::new(status),
            requested: Arc::new(AtomicBool::new(false)),
            behaviour: self.behaviour,
            calls: Arc::clone(&self.calls),
        };
        self.transfers.lock().push(transfer.clone());
        Ok(transfer)
    }

    async fn wait_all_complete(&self) -> bool {
        self.calls.lock().push(MockCall::WaitAll);
        let receivers: Vec<_> = self
            .transfers
            .lock()
            .iter()
            .map(|transfer| transfer.status.subscribe())
            .collect();
        wait_for_terminal(receivers, self.closed.subscribe()).await
    }

    fn local_port(&self) -> u16 {
        self.behaviour.port
    }

    async fn close(&self) {
        self.calls.lock().push(MockCall::Close);
        for transfer in self.transfers.lock().iter() {
            transfer.finish(TransferStatus::Stopped);
        }
        self.closed.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct MockTransfer {
    info_hash: InfoHash,
    total_length: u64,
    completed: Arc<AtomicU64>,
    status: Arc<watch::Sender<TransferStatus>>,
    requested: Arc<AtomicBool>,
    behaviour: MockBehaviour,
    calls: CallLog,
}

impl MockTransfer {
    fn finish(&self, next: TransferStatus) {
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn was_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransferHandle for MockTransfer {
    async fn request_full_download(&self) -> Result<(), EngineError> {
        self.calls.lock().push(MockCall::RequestFullDownload);
        if self.behaviour.fail_request {
            return Err(EngineError::EngineClosed);
        }
        self.requested.store(true, Ordering::Release);

        match self.behaviour.outcome {
            MockOutcome::Complete => {
                self.completed.store(self.total_length, Ordering::Release);
                self.finish(TransferStatus::Complete);
            }
            MockOutcome::Stall { completed } => {
                self.completed
                    .store(completed.min(self.total_length), Ordering::Release);
                self.finish(TransferStatus::GaveUp);
            }
            MockOutcome::NeverFinish => {
                self.finish(TransferStatus::Downloading);
            }
            MockOutcome::Stopped => self.finish(TransferStatus::Stopped),
        }
        Ok(())
    }

    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }

    fn bytes_completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn completion(&self) -> watch::Receiver<TransferStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TorrentFile;
    use crate::network::{NetworkIdentity, PortSelection};

    fn descriptor() -> TorrentDescriptor {
        TorrentDescriptor {
            info_hash: InfoHash::new([1u8; 20]),
            name: "mock".to_string(),
            piece_length: 16,
            piece_hashes: vec![[0u8; 20]],
            total_length: 10,
            files: vec![TorrentFile {
                path: vec!["mock".to_string()],
                length: 10,
            }],
            announce_urls: vec![],
            multi_file: false,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::configure("/tmp", NetworkIdentity::loopback(PortSelection::Fixed(1)), false)
    }

    #[tokio::test]
    async fn test_complete_outcome() {
        let factory = MockEngineFactory::default();
        let engine = factory.construct(config()).await.unwrap();
        let transfer = engine.register_torrent(descriptor()).await.unwrap();
        assert!(!transfer.was_requested());
        transfer.request_full_download().await.unwrap();
        assert!(transfer.was_requested());

        assert!(engine.wait_all_complete().await);
        assert_eq!(transfer.bytes_completed(), 10);
        engine.close().await;

        assert_eq!(
            factory.calls(),
            vec![
                MockCall::Construct,
                MockCall::Register,
                MockCall::RequestFullDownload,
                MockCall::WaitAll,
                MockCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_stall_reports_partial_bytes() {
        let factory = MockEngineFactory::new(MockBehaviour {
            outcome: MockOutcome::Stall { completed: 4 },
            ..MockBehaviour::default()
        });
        let engine = factory.construct(config()).await.unwrap();
        let transfer = engine.register_torrent(descriptor()).await.unwrap();
        transfer.request_full_download().await.unwrap();

        assert!(engine.wait_all_complete().await);
        assert_eq!(transfer.bytes_completed(), 4);
    }

    #[tokio::test]
    async fn test_close_unblocks_waiters() {
        let factory = MockEngineFactory::new(MockBehaviour {
            outcome: MockOutcome::NeverFinish,
            ..MockBehaviour::default()
        });
        let engine = Arc::new(factory.construct(config()).await.unwrap());
        let transfer = engine.register_torrent(descriptor()).await.unwrap();
        transfer.request_full_download().await.unwrap();

        let waiter = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.wait_all_complete().await }
        });
        tokio::task::yield_now().await;
        engine.close().await;
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_construction_failure_is_bind_error() {
        let factory = MockEngineFactory::new(MockBehaviour {
            fail_construction: true,
            ..MockBehaviour::default()
        });
        assert!(matches!(
            factory.construct(config()).await,
            Err(EngineError::Bind { .. })
        ));
        assert_eq!(factory.count(MockCall::Construct), 1);
        assert!(factory.last_config().is_some());
    }
}
